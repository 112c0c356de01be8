pub mod agent;
pub mod config;
pub mod helpers;
pub mod server;

pub use agent::AgentRegistry;
