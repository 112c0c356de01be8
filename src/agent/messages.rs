use super::types::{AgentDescription, AgentRemoteConfig, ComponentHealth, ConnectionSettingsOffers, EffectiveConfig, InstanceId, RemoteConfigStatus};
use serde::{Deserialize, Serialize};

/// Bit flags carried in [`ServerToAgent::flags`]
pub struct ServerToAgentFlags;

impl ServerToAgentFlags {
    pub const UNSPECIFIED: u64 = 0;
    /// Ask the agent to resend its complete status on the next report
    pub const REPORT_FULL_STATE: u64 = 1;
}

/// Status report sent by an agent over its connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentToServer {
    pub instance_uid: InstanceId,
    #[serde(default)]
    pub sequence_num: u64,
    pub agent_description: Option<AgentDescription>,
    pub health: Option<ComponentHealth>,
    pub effective_config: Option<EffectiveConfig>,
    pub remote_config_status: Option<RemoteConfigStatus>,
    #[serde(default)]
    pub capabilities: u64,
    #[serde(default)]
    pub flags: u64,
    pub agent_disconnect: Option<AgentDisconnect>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDisconnect {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerErrorResponse {
    pub error_message: String,
}

/// Message pushed from the server to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerToAgent {
    pub instance_uid: InstanceId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_response: Option<ServerErrorResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_config: Option<AgentRemoteConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_settings: Option<ConnectionSettingsOffers>,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub capabilities: u64,
}

impl Default for AgentToServer {
    fn default() -> Self {
        Self {
            instance_uid: InstanceId::nil(),
            sequence_num: 0,
            agent_description: None,
            health: None,
            effective_config: None,
            remote_config_status: None,
            capabilities: 0,
            flags: 0,
            agent_disconnect: None,
        }
    }
}

/// An unaddressed message; `Agent::send_to_agent` stamps the recipient
impl Default for ServerToAgent {
    fn default() -> Self {
        Self {
            instance_uid: InstanceId::nil(),
            error_response: None,
            remote_config: None,
            connection_settings: None,
            flags: ServerToAgentFlags::UNSPECIFIED,
            capabilities: 0,
        }
    }
}

impl ServerToAgent {
    pub fn requests_full_state(&self) -> bool { self.flags & ServerToAgentFlags::REPORT_FULL_STATE != 0 }
}
