//! Turns connection intents into links on the server.

use tracing::{debug, error, info, warn};

use crate::cache::PortCache;
use crate::graph::{ConnectionIntent, GraphError, GraphSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Connected,
    AlreadyConnected,
    /// One side no longer exists.
    PortMissing,
    Failed,
}

/// Applies intents one at a time. Never fails as a whole; every problem is
/// logged and confined to the intent that caused it.
#[derive(Debug, Default)]
pub struct ConnectionApplier {
    connected: u64,
    failed: u64,
}

impl ConnectionApplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(
        &mut self,
        session: &dyn GraphSession,
        cache: &mut PortCache,
        intent: &ConnectionIntent,
    ) -> ApplyOutcome {
        let result = match Self::link(session, cache, intent) {
            // a port was re-registered under the same name
            Err(GraphError::UnknownPort(port)) => {
                debug!("Stale handle {} for {}, resolving again", port, intent);
                cache.evict(&intent.output);
                cache.evict(&intent.input);
                Self::link(session, cache, intent)
            }
            other => other,
        };

        match result {
            Ok(outcome) => {
                if outcome == ApplyOutcome::Connected {
                    self.connected += 1;
                }
                outcome
            }
            Err(e) => {
                error!("Error connecting ports {}: {}", intent, e);
                self.forget(cache, intent);
                ApplyOutcome::Failed
            }
        }
    }

    fn link(
        session: &dyn GraphSession,
        cache: &mut PortCache,
        intent: &ConnectionIntent,
    ) -> Result<ApplyOutcome, GraphError> {
        let Some(output) = cache.resolve(session, &intent.output) else {
            warn!("Output port '{}' has vanished", intent.output);
            return Ok(ApplyOutcome::PortMissing);
        };
        let Some(input) = cache.resolve(session, &intent.input) else {
            warn!("Input port '{}' has vanished", intent.input);
            return Ok(ApplyOutcome::PortMissing);
        };

        if session.is_connected(output, input)? {
            debug!("Ports '{}' and '{}' already connected", intent.output, intent.input);
            return Ok(ApplyOutcome::AlreadyConnected);
        }

        info!("Connecting ports {}", intent);
        session.connect(output, input)?;
        Ok(ApplyOutcome::Connected)
    }

    /// Drop both handles so the next attempt re-resolves them.
    fn forget(&mut self, cache: &mut PortCache, intent: &ConnectionIntent) {
        self.failed += 1;
        cache.evict(&intent.output);
        cache.evict(&intent.input);
    }

    pub fn connected_count(&self) -> u64 {
        self.connected
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }
}
