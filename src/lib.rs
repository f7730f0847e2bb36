// Core model and dispatch engine
pub mod backend;
pub mod dispatch;
pub mod error;
pub mod push;
pub mod scheduler;

// Collaborators at the dispatcher's seams
pub mod events;
pub mod store;

// Application layer
pub mod api;
pub mod server;
pub mod service;

// Supporting modules
pub mod config;
pub mod metrics;
