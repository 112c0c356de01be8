use super::connection::{ConnectionError, ConnectionRef};
use super::messages::{AgentToServer, ServerToAgent, ServerToAgentFlags};
use super::types::{
    AgentConfigMap, AgentDescription, AgentRemoteConfig, ComponentHealth, ConnectionSettingsOffers, EffectiveConfig, InstanceId, RemoteConfigStatus,
    is_equal_description,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::SocketAddr;
use tokio::sync::oneshot;

/// Last status an agent reported, merged across partial reports
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentStatus {
    pub sequence_num: u64,
    pub description: Option<AgentDescription>,
    pub health: Option<ComponentHealth>,
    pub effective_config: Option<EffectiveConfig>,
    pub remote_config_status: Option<RemoteConfigStatus>,
    pub capabilities: u64,
}

/// Server-side record of one connected agent
///
/// All state sits behind the agent's own lock. Methods never hold that lock
/// across an await, so sends to the agent only wait on the connection.
pub struct Agent {
    instance_id: InstanceId,
    conn: ConnectionRef,
    state: Mutex<AgentState>,
}

struct AgentState {
    status: Option<AgentStatus>,
    started_at: DateTime<Utc>,
    custom_config: Option<AgentConfigMap>,
    remote_config: Option<AgentRemoteConfig>,
    status_update_watchers: Vec<oneshot::Sender<()>>,
}

/// Detached copy of an [`Agent`], safe to hold and serialize without locks
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub instance_id: InstanceId,
    pub status: Option<AgentStatus>,
    pub started_at: DateTime<Utc>,
    pub custom_config: Option<AgentConfigMap>,
    pub remote_config: Option<AgentRemoteConfig>,
    pub remote_addr: Option<SocketAddr>,
}

impl AgentSnapshot {
    pub fn description(&self) -> Option<&AgentDescription> { self.status.as_ref().and_then(|status| status.description.as_ref()) }
}

impl Agent {
    pub fn new(instance_id: InstanceId, conn: ConnectionRef) -> Self {
        Self {
            instance_id,
            conn,
            state: Mutex::new(AgentState {
                status: None,
                started_at: Utc::now(),
                custom_config: None,
                remote_config: None,
                status_update_watchers: Vec::new(),
            }),
        }
    }

    pub fn instance_id(&self) -> InstanceId { self.instance_id }

    pub fn connection(&self) -> &ConnectionRef { &self.conn }

    pub fn started_at(&self) -> DateTime<Utc> { self.state.lock().started_at }

    pub fn clone_readonly(&self) -> AgentSnapshot {
        let state = self.state.lock();

        AgentSnapshot {
            instance_id: self.instance_id,
            status: state.status.clone(),
            started_at: state.started_at,
            custom_config: state.custom_config.clone(),
            remote_config: state.remote_config.clone(),
            remote_addr: self.conn.remote_addr(),
        }
    }

    /// Merge a status report into the agent and fill in the reply.
    ///
    /// Anyone waiting on a status update is notified once the report has been
    /// applied.
    pub fn update_status(&self, report: &AgentToServer, response: &mut ServerToAgent) {
        let watchers = {
            let mut state = self.state.lock();
            state.process_status_update(report, response);
            std::mem::take(&mut state.status_update_watchers)
        };

        for watcher in watchers {
            let _ = watcher.send(());
        }
    }

    /// Record a custom config for this agent and push the resulting remote
    /// config to it.
    ///
    /// `notify` fires after the agent's next status report. When the remote
    /// config is unchanged nothing is sent and `notify` fires right away.
    pub async fn set_custom_config(&self, config: AgentConfigMap, notify: oneshot::Sender<()>) -> Result<(), ConnectionError> {
        let msg = {
            let mut state = self.state.lock();
            state.custom_config = Some(config);

            if state.calc_remote_config() {
                state.status_update_watchers.push(notify);
                Some(ServerToAgent {
                    remote_config: state.remote_config.clone(),
                    ..Default::default()
                })
            } else {
                let _ = notify.send(());
                None
            }
        };

        match msg {
            Some(msg) => self.send_to_agent(msg).await,
            None => Ok(()),
        }
    }

    pub async fn offer_connection_settings(&self, offers: ConnectionSettingsOffers) -> Result<(), ConnectionError> {
        let msg = ServerToAgent {
            connection_settings: Some(offers),
            ..Default::default()
        };

        self.send_to_agent(msg).await
    }

    pub async fn send_to_agent(&self, mut msg: ServerToAgent) -> Result<(), ConnectionError> {
        msg.instance_uid = self.instance_id;
        self.conn.send(&msg).await
    }
}

impl AgentState {
    fn process_status_update(&mut self, report: &AgentToServer, response: &mut ServerToAgent) {
        let lost_previous_update = match &self.status {
            None => true,
            Some(status) => status.sequence_num.wrapping_add(1) != report.sequence_num,
        };

        let status = self.status.get_or_insert_with(AgentStatus::default);
        let description_omitted = report.agent_description.is_none();

        let description_changed = match &report.agent_description {
            Some(description) if !is_equal_description(status.description.as_ref(), Some(description)) => {
                status.description = Some(description.clone());
                true
            }
            _ => false,
        };

        if let Some(health) = &report.health {
            status.health = Some(health.clone());
        }
        if let Some(effective_config) = &report.effective_config {
            status.effective_config = Some(effective_config.clone());
        }
        if let Some(remote_config_status) = &report.remote_config_status {
            status.remote_config_status = Some(remote_config_status.clone());
        }

        status.capabilities = report.capabilities;
        status.sequence_num = report.sequence_num;

        if lost_previous_update && description_omitted {
            response.flags |= ServerToAgentFlags::REPORT_FULL_STATE;
        }

        let config_changed = description_changed && self.calc_remote_config();

        let agent_has_stale_config = match (&self.remote_config, self.status.as_ref().and_then(|s| s.remote_config_status.as_ref())) {
            (Some(remote_config), Some(reported)) => reported.last_remote_config_hash != remote_config.config_hash,
            _ => false,
        };

        if config_changed || agent_has_stale_config {
            response.remote_config = self.remote_config.clone();
        }
    }

    /// Rebuild the remote config from the custom config. Returns whether the hash moved.
    fn calc_remote_config(&mut self) -> bool {
        let config = AgentRemoteConfig::new(self.custom_config.clone().unwrap_or_default());
        let changed = self.remote_config.as_ref().is_none_or(|current| current.config_hash != config.config_hash);

        self.remote_config = Some(config);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::connection::testing::RecordingConnection;
    use crate::agent::types::{AgentConfigFile, KeyValue};

    fn report(id: InstanceId, sequence_num: u64) -> AgentToServer {
        AgentToServer {
            instance_uid: id,
            sequence_num,
            ..Default::default()
        }
    }

    fn described(id: InstanceId, sequence_num: u64, name: &str) -> AgentToServer {
        AgentToServer {
            agent_description: Some(AgentDescription {
                identifying_attributes: vec![KeyValue::string("service.name", name)],
                non_identifying_attributes: vec![],
            }),
            ..report(id, sequence_num)
        }
    }

    #[test]
    fn test_clone_is_isolated_from_later_updates() {
        let (_, conn) = RecordingConnection::shared();
        let id = InstanceId::new();
        let agent = Agent::new(id, conn);

        agent.update_status(&described(id, 0, "collector"), &mut ServerToAgent::default());
        let snapshot = agent.clone_readonly();

        agent.update_status(&described(id, 1, "gateway"), &mut ServerToAgent::default());

        let name = &snapshot.description().unwrap().identifying_attributes[0];
        assert_eq!(name, &KeyValue::string("service.name", "collector"));
        assert_eq!(snapshot.status.as_ref().unwrap().sequence_num, 0);
        assert_eq!(agent.clone_readonly().status.unwrap().sequence_num, 1);
    }

    #[test]
    fn test_sequence_gap_requests_full_state() {
        let (_, conn) = RecordingConnection::shared();
        let id = InstanceId::new();
        let agent = Agent::new(id, conn);

        let mut first = ServerToAgent::default();
        agent.update_status(&report(id, 5), &mut first);
        assert!(first.requests_full_state());

        let mut next = ServerToAgent::default();
        agent.update_status(&report(id, 6), &mut next);
        assert!(!next.requests_full_state());

        let mut gap = ServerToAgent::default();
        agent.update_status(&report(id, 9), &mut gap);
        assert!(gap.requests_full_state());

        let mut full = ServerToAgent::default();
        agent.update_status(&described(id, 20, "collector"), &mut full);
        assert!(!full.requests_full_state());
    }

    #[test]
    fn test_description_change_sends_remote_config() {
        let (_, conn) = RecordingConnection::shared();
        let id = InstanceId::new();
        let agent = Agent::new(id, conn);

        let mut response = ServerToAgent::default();
        agent.update_status(&described(id, 0, "collector"), &mut response);
        let remote_config = response.remote_config.expect("first description computes a config");

        let mut unchanged = ServerToAgent::default();
        let mut applied = described(id, 1, "collector");
        applied.remote_config_status = Some(RemoteConfigStatus {
            last_remote_config_hash: remote_config.config_hash.clone(),
            ..Default::default()
        });
        agent.update_status(&applied, &mut unchanged);
        assert!(unchanged.remote_config.is_none());

        let mut stale = ServerToAgent::default();
        let mut outdated = report(id, 2);
        outdated.remote_config_status = Some(RemoteConfigStatus {
            last_remote_config_hash: vec![0; 32],
            ..Default::default()
        });
        agent.update_status(&outdated, &mut stale);
        assert_eq!(stale.remote_config, Some(remote_config));
    }

    #[tokio::test]
    async fn test_custom_config_notifies_after_next_status() {
        let (recorder, conn) = RecordingConnection::shared();
        let id = InstanceId::new();
        let agent = Agent::new(id, conn);
        let config = AgentConfigMap::single("", AgentConfigFile::yaml("receivers: {}"));

        let (tx, mut rx) = oneshot::channel();
        agent.set_custom_config(config.clone(), tx).await.unwrap();

        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].instance_uid, id);
        assert_eq!(sent[0].remote_config.as_ref().unwrap().config, config);
        assert!(rx.try_recv().is_err());

        agent.update_status(&report(id, 0), &mut ServerToAgent::default());
        assert!(rx.await.is_ok());
        assert_eq!(agent.clone_readonly().custom_config, Some(config));
    }

    #[tokio::test]
    async fn test_unchanged_custom_config_is_not_resent() {
        let (recorder, conn) = RecordingConnection::shared();
        let id = InstanceId::new();
        let agent = Agent::new(id, conn);
        let config = AgentConfigMap::single("", AgentConfigFile::yaml("receivers: {}"));

        let (first, _pending) = oneshot::channel();
        agent.set_custom_config(config.clone(), first).await.unwrap();

        let (again, mut rx) = oneshot::channel();
        agent.set_custom_config(config, again).await.unwrap();

        assert_eq!(recorder.sent().len(), 1);
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_send_failure_is_returned() {
        let (recorder, conn) = RecordingConnection::shared();
        let agent = Agent::new(InstanceId::new(), conn);
        recorder.fail_sends();

        let result = agent.offer_connection_settings(ConnectionSettingsOffers::default()).await;
        assert!(matches!(result, Err(ConnectionError::Transport(_))));
    }
}
