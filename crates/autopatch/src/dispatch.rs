//! Server notifications → session work
//!
//! Callbacks arrive on the backend's thread and must not block, so they only
//! post messages: port changes ask for a refresh, shutdown ends the session.
//! A removed or renamed port also invalidates its cached handle.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::graph::GraphEvents;
use crate::queue::IntentSender;

/// Why a refresh was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshRequest {
    PortRegistered(String),
    PortUnregistered(String),
    PortRenamed { old_name: String, new_name: String },
    PropertyChanged(String),
    PatternsReloaded,
}

impl RefreshRequest {
    /// Port name whose cached handle no longer refers to it.
    pub fn stale_port(&self) -> Option<&str> {
        match self {
            Self::PortUnregistered(name) => Some(name.as_str()),
            Self::PortRenamed { old_name, .. } => Some(old_name.as_str()),
            _ => None,
        }
    }
}

pub type RefreshReceiver = mpsc::UnboundedReceiver<RefreshRequest>;

/// Cheap handle for asking the session manager to re-run matching.
#[derive(Debug, Clone)]
pub struct RefreshHandle {
    tx: mpsc::UnboundedSender<RefreshRequest>,
}

impl RefreshHandle {
    pub fn request(&self, reason: RefreshRequest) -> bool {
        self.tx.send(reason).is_ok()
    }
}

pub fn refresh_channel() -> (RefreshHandle, RefreshReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RefreshHandle { tx }, rx)
}

/// Event sink for one session.
pub struct EventDispatcher {
    refresh: RefreshHandle,
    queue: IntentSender,
}

impl EventDispatcher {
    pub fn new(refresh: RefreshHandle, queue: IntentSender) -> Self {
        Self { refresh, queue }
    }
}

impl GraphEvents for EventDispatcher {
    fn port_registered(&self, port: &str) {
        debug!("Port registered: {}", port);
        self.refresh
            .request(RefreshRequest::PortRegistered(port.to_string()));
    }

    fn port_unregistered(&self, port: &str) {
        debug!("Port unregistered: {}", port);
        self.refresh
            .request(RefreshRequest::PortUnregistered(port.to_string()));
    }

    fn port_renamed(&self, old_name: &str, new_name: &str) {
        debug!("Port renamed: '{}' -> '{}'", old_name, new_name);
        self.refresh.request(RefreshRequest::PortRenamed {
            old_name: old_name.to_string(),
            new_name: new_name.to_string(),
        });
    }

    fn property_changed(&self, subject: &str) {
        debug!("Property changed on {}", subject);
        self.refresh
            .request(RefreshRequest::PropertyChanged(subject.to_string()));
    }

    fn client_shutdown(&self, reason: &str) {
        warn!("Graph server shut down: {}", reason);
        if !self.queue.end_session() {
            info!("Session already finished");
        }
    }

    fn error(&self, message: &str) {
        error!("Graph server error: {}", message);
    }
}
