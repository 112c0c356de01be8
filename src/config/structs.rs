use serde::{Deserialize, Serialize};

pub mod prelude {
    pub use super::{Config, Server};
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: Server,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Server {
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

fn default_address() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 4320 }
