mod settings;

pub use settings::{DispatchConfig, ServerConfig, Settings};
