pub mod autosave;
pub mod calendar;
pub mod client;
pub mod config;
pub mod context;
pub mod engine;
pub mod model;
pub mod observability;
pub mod persist;
pub mod pool;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod wire;
