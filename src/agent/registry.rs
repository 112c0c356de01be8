use super::connection::{ConnectionError, ConnectionRef};
use super::instance::{Agent, AgentSnapshot};
use super::messages::ServerToAgent;
use super::types::{AgentConfigMap, ConnectionSettingsOffers, InstanceId};
use crate::helpers;
use futures_util::future::join_all;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// How long `shutdown` waits for one connection to close
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Registry of connected agents on the server side
///
/// Maps every agent to the connection carrying it and every connection to the
/// agents reachable through it. Both maps sit under one lock and are always
/// updated together. Cloning the registry clones the handle, not the state.
#[derive(Clone, Default)]
pub struct AgentRegistry {
    state: Arc<RwLock<RegistryState>>,
    next_response: Arc<RwLock<Option<ServerToAgent>>>,
}

#[derive(Default)]
struct RegistryState {
    agents_by_id: HashMap<InstanceId, Arc<Agent>>,
    connections: HashMap<ConnectionRef, HashSet<InstanceId>>,
}

impl AgentRegistry {
    pub fn new() -> Self { Self::default() }

    pub fn find_agent(&self, id: &InstanceId) -> Option<Arc<Agent>> { self.state.read().agents_by_id.get(id).cloned() }

    /// Return the agent for `id`, creating it on `conn` if it is new.
    ///
    /// A known agent is returned as is, even when `conn` is not the
    /// connection it was created on.
    pub fn find_or_create_agent(&self, id: InstanceId, conn: &ConnectionRef) -> Arc<Agent> {
        let mut state = self.state.write();

        if let Some(agent) = state.agents_by_id.get(&id) {
            if agent.connection() != conn {
                log::debug!("[Registry] Agent {id} seen on {conn:?} but stays bound to {:?}", agent.connection());
            }
            return Arc::clone(agent);
        }

        let agent = Arc::new(Agent::new(id, conn.clone()));
        state.agents_by_id.insert(id, Arc::clone(&agent));
        state.connections.entry(conn.clone()).or_default().insert(id);

        log::info!("[Registry] Agent {id} registered on {conn:?}");
        agent
    }

    /// Drop a connection and every agent it carried. Unknown connections are ignored.
    pub fn remove_connection(&self, conn: &ConnectionRef) {
        let mut state = self.state.write();

        let Some(ids) = state.connections.remove(conn) else {
            return;
        };

        for id in &ids {
            let Some(agent) = state.agents_by_id.remove(id) else {
                panic!("connection {conn:?} referenced unknown agent {id}");
            };
            log::debug!("[Registry] Agent {id} removed after {}", helpers::format_duration(agent.started_at()));
        }

        log::info!("[Registry] Connection {conn:?} removed with {} agent(s)", ids.len());
    }

    pub fn get_agent_readonly_clone(&self, id: &InstanceId) -> Option<AgentSnapshot> {
        let agent = self.find_agent(id)?;
        Some(agent.clone_readonly())
    }

    /// Snapshot every agent.
    ///
    /// The set of agents is taken under one read lock. Each agent is then
    /// cloned after the lock is released, so a clone may include writes made
    /// after the set was taken. The result as a whole is not a single
    /// point-in-time view.
    pub fn get_all_agents_readonly_clone(&self) -> HashMap<InstanceId, AgentSnapshot> { clone_agents(self.members()) }

    fn members(&self) -> Vec<Arc<Agent>> { self.state.read().agents_by_id.values().cloned().collect() }

    /// Apply a custom config to a connected agent. Unknown agents are ignored.
    pub async fn set_custom_config_for_agent(
        &self,
        id: &InstanceId,
        config: AgentConfigMap,
        notify: oneshot::Sender<()>,
    ) -> Result<(), ConnectionError> {
        match self.find_agent(id) {
            Some(agent) => agent.set_custom_config(config, notify).await,
            None => {
                log::debug!("[Registry] Custom config for unknown agent {id} dropped");
                Ok(())
            }
        }
    }

    /// Offer new connection settings (e.g. a rotated client certificate) to an agent
    pub async fn offer_connection_settings(&self, id: &InstanceId, offers: ConnectionSettingsOffers) -> Result<(), ConnectionError> {
        log::info!("[Registry] Begin connection settings offer for {id}");

        let Some(agent) = self.find_agent(id) else {
            log::warn!("[Registry] Agent {id} not found");
            return Ok(());
        };

        agent.offer_connection_settings(offers).await?;
        log::info!("[Registry] Connection settings offers sent to {id}");
        Ok(())
    }

    /// Template every status reply starts from
    pub fn next_response(&self) -> ServerToAgent { self.next_response.read().clone().unwrap_or_default() }

    pub fn set_next_response(&self, response: ServerToAgent) { *self.next_response.write() = Some(response); }

    pub fn agent_count(&self) -> usize { self.state.read().agents_by_id.len() }

    pub fn connection_count(&self) -> usize { self.state.read().connections.len() }

    /// Close every tracked connection and forget all agents.
    ///
    /// Connections are closed concurrently and each close gets at most
    /// [`CLOSE_TIMEOUT`], so a peer that stopped reading cannot hold up the
    /// rest of the teardown.
    pub async fn shutdown(&self) {
        let connections: Vec<ConnectionRef> = self.state.read().connections.keys().cloned().collect();

        join_all(connections.iter().map(|conn| async move {
            match tokio::time::timeout(CLOSE_TIMEOUT, conn.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => log::warn!("[Registry] Failed to close {conn:?}: {err}"),
                Err(_) => log::warn!("[Registry] Gave up closing {conn:?} after {}s", CLOSE_TIMEOUT.as_secs()),
            }
        }))
        .await;

        let mut state = self.state.write();
        state.agents_by_id.clear();
        state.connections.clear();
        log::info!("[Registry] Shut down, closed {} connection(s)", connections.len());
    }

    #[cfg(test)]
    fn is_consistent(&self) -> bool {
        let state = self.state.read();
        let reachable: usize = state.connections.values().map(HashSet::len).sum();

        reachable == state.agents_by_id.len()
            && state.connections.iter().all(|(conn, ids)| {
                ids.iter()
                    .all(|id| state.agents_by_id.get(id).is_some_and(|agent| agent.connection() == conn))
            })
    }
}

fn clone_agents(agents: Vec<Arc<Agent>>) -> HashMap<InstanceId, AgentSnapshot> {
    agents.into_iter().map(|agent| (agent.instance_id(), agent.clone_readonly())).collect()
}
