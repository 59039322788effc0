// Shared infrastructure
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Pooling core
pub mod balancer;
pub mod compression;
pub mod manager;
pub mod pool;
pub mod queue;
pub mod throttle;
pub mod transport;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod tasks;
