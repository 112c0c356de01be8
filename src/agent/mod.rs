/// Server-side tracking of remote agents
///
/// Agents connect over persistent WebSocket connections and report their
/// status; the server answers through the same connection.
///
/// # Architecture
///
/// - **Connection**: one transport to a peer. Outbound writes are serialized
///   per connection, since a WebSocket accepts a single writer at a time.
/// - **Agent**: per-agent state (description, status, custom and remote
///   config) bound to the connection it was first seen on.
/// - **Registry**: maps agents to connections and back. Agents are created
///   on first sight and dropped when their connection goes away.
///
/// Readers that need to expose agent state take an [`AgentSnapshot`], a
/// detached copy that can be held without locking anything.
pub mod connection;
pub mod instance;
pub mod messages;
pub mod registry;
pub mod types;

pub use connection::{Connection, ConnectionError, ConnectionRef, WsConnection};
pub use instance::{Agent, AgentSnapshot, AgentStatus};
pub use registry::AgentRegistry;
pub use types::{AgentDescription, InstanceId, is_equal_description};
