//! Graph service boundary
//!
//! The audio server is reached only through these traits. A backend opens a
//! [`GraphSession`] per connection and reports server notifications through
//! a [`GraphEvents`] sink supplied by the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Server-side handle of a port. Only meaningful within the session that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub u32);

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only snapshot of one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    #[serde(skip)]
    pub id: PortId,
    pub canonical_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,
    pub direction: PortDirection,
}

impl Default for PortId {
    fn default() -> Self {
        PortId(u32::MAX)
    }
}

impl Port {
    pub fn new(id: PortId, canonical_name: impl Into<String>, direction: PortDirection) -> Self {
        Self {
            id,
            canonical_name: canonical_name.into(),
            aliases: Vec::new(),
            pretty_name: None,
            direction,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_pretty_name(mut self, pretty_name: impl Into<String>) -> Self {
        self.pretty_name = Some(pretty_name.into());
        self
    }

    /// Every name a pattern may match: canonical name, aliases, pretty name.
    pub fn match_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.canonical_name.as_str())
            .chain(self.aliases.iter().map(String::as_str))
            .chain(self.pretty_name.as_deref())
    }
}

/// A proposed connection between two ports, by canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionIntent {
    pub output: String,
    pub input: String,
}

impl ConnectionIntent {
    pub fn new(output: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            input: input.into(),
        }
    }
}

impl fmt::Display for ConnectionIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}' --> '{}'", self.output, self.input)
    }
}

/// An existing link between two ports, by canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Connection {
    pub output: String,
    pub input: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Failed to connect to graph server: {0}")]
    Connect(String),

    #[error("Port not found: {0}")]
    UnknownPort(String),

    #[error("Link failed: {0}")]
    Link(String),

    #[error("Session is closed")]
    Closed,

    #[error("Could not determine client name: {0}")]
    ClientName(String),
}

/// Notifications delivered by a backend, usually from its own thread.
///
/// Implementations must return quickly: the calling thread may be the
/// server's notification loop.
pub trait GraphEvents: Send + Sync {
    fn port_registered(&self, port: &str);

    fn port_unregistered(&self, port: &str);

    fn port_renamed(&self, old_name: &str, new_name: &str);

    fn property_changed(&self, subject: &str);

    /// The server went away; the session that delivered this is dead.
    fn client_shutdown(&self, reason: &str);

    fn error(&self, message: &str);
}

/// Opens sessions against a graph server.
#[async_trait]
pub trait GraphService: Send + Sync {
    /// Open a client session named `client_name`. Dropping the returned
    /// session closes it.
    async fn open(
        &self,
        client_name: &str,
        events: Arc<dyn GraphEvents>,
    ) -> Result<Box<dyn GraphSession>, GraphError>;
}

/// A live client connection. Valid until dropped or until the server
/// reports shutdown.
pub trait GraphSession: Send + Sync {
    /// Effective client name, which the server may have changed on open.
    fn client_name(&self) -> Result<String, GraphError>;

    fn ports(&self, direction: PortDirection) -> Result<Vec<Port>, GraphError>;

    fn port_by_name(&self, name: &str) -> Option<PortId>;

    fn is_connected(&self, output: PortId, input: PortId) -> Result<bool, GraphError>;

    fn connect(&self, output: PortId, input: PortId) -> Result<(), GraphError>;

    fn connections(&self) -> Result<Vec<Connection>, GraphError>;
}
