use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Globally unique identifier of one agent instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// A fresh random id
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self { Self(Uuid::new_v4()) }

    /// The all-zero id carried by messages that have not been addressed yet
    pub const fn nil() -> Self { Self(Uuid::nil()) }

    pub fn is_nil(&self) -> bool { self.0.is_nil() }

    pub fn as_uuid(&self) -> &Uuid { &self.0 }
}

impl From<Uuid> for InstanceId {
    fn from(uuid: Uuid) -> Self { Self(uuid) }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> { Uuid::parse_str(s).map(Self) }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnyValue {
    String(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: AnyValue,
}

impl KeyValue {
    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: AnyValue::String(value.into()),
        }
    }
}

/// Attributes an agent reports about itself
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentDescription {
    #[serde(default)]
    pub identifying_attributes: Vec<KeyValue>,
    #[serde(default)]
    pub non_identifying_attributes: Vec<KeyValue>,
}

/// Compares two descriptions attribute by attribute, in order.
///
/// The same attributes listed in a different order compare unequal. Agents
/// are expected to report their attributes in a stable order, so a reorder
/// is treated as a description change.
pub fn is_equal_description(d1: Option<&AgentDescription>, d2: Option<&AgentDescription>) -> bool {
    match (d1, d2) {
        (None, None) => true,
        (Some(d1), Some(d2)) => {
            is_equal_attrs(&d1.identifying_attributes, &d2.identifying_attributes)
                && is_equal_attrs(&d1.non_identifying_attributes, &d2.non_identifying_attributes)
        }
        _ => false,
    }
}

fn is_equal_attrs(attrs1: &[KeyValue], attrs2: &[KeyValue]) -> bool {
    attrs1.len() == attrs2.len() && attrs1.iter().zip(attrs2).all(|(a1, a2)| a1 == a2)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfigFile {
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub content_type: String,
}

impl AgentConfigFile {
    pub fn yaml(body: impl Into<String>) -> Self {
        Self {
            body: body.into().into_bytes(),
            content_type: "text/yaml".to_string(),
        }
    }
}

/// Named config files, ordered by name so hashing is stable
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfigMap {
    #[serde(default)]
    pub config_map: BTreeMap<String, AgentConfigFile>,
}

impl AgentConfigMap {
    pub fn single(name: impl Into<String>, file: AgentConfigFile) -> Self {
        Self {
            config_map: BTreeMap::from([(name.into(), file)]),
        }
    }

    pub fn is_empty(&self) -> bool { self.config_map.is_empty() }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRemoteConfig {
    pub config: AgentConfigMap,
    pub config_hash: Vec<u8>,
}

impl AgentRemoteConfig {
    pub fn new(config: AgentConfigMap) -> Self {
        let config_hash = config_hash(&config);
        Self { config, config_hash }
    }
}

fn config_hash(config: &AgentConfigMap) -> Vec<u8> {
    let mut hasher = Sha256::new();

    for (name, file) in &config.config_map {
        hasher.update(name.as_bytes());
        hasher.update(file.content_type.as_bytes());
        hasher.update(&file.body);
    }

    hasher.finalize().to_vec()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub config_map: AgentConfigMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteConfigStatuses {
    #[default]
    Unset,
    Applied,
    Applying,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteConfigStatus {
    #[serde(default)]
    pub last_remote_config_hash: Vec<u8>,
    #[serde(default)]
    pub status: RemoteConfigStatuses,
    #[serde(default)]
    pub error_message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub healthy: bool,
    #[serde(default)]
    pub start_time_unix_nano: u64,
    #[serde(default)]
    pub last_error: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TlsCertificate {
    #[serde(default)]
    pub cert: Vec<u8>,
    #[serde(default)]
    pub private_key: Vec<u8>,
    #[serde(default)]
    pub ca_cert: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpAmpConnectionSettings {
    #[serde(default)]
    pub destination_endpoint: String,
    #[serde(default)]
    pub headers: Vec<KeyValue>,
    pub certificate: Option<TlsCertificate>,
}

/// New connection settings offered to an agent, e.g. a rotated client certificate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettingsOffers {
    #[serde(default)]
    pub hash: Vec<u8>,
    pub opamp: Option<OpAmpConnectionSettings>,
}
