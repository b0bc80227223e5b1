//! Session lifecycle
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ──► Disconnected ──► ...
//!                      │              │
//!                      └──────────────┴──► Aborted (cancelled, attempts exhausted, fatal)
//! ```
//!
//! The manager owns the port cache and the applier. While connected it
//! multiplexes three sources: cancellation, refresh requests from event
//! callbacks or a pattern reload, and the connection queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::applier::ConnectionApplier;
use crate::cache::PortCache;
use crate::dispatch::{
    refresh_channel, EventDispatcher, RefreshHandle, RefreshReceiver, RefreshRequest,
};
use crate::engine::MatchEngine;
use crate::graph::{GraphError, GraphService, GraphSession};
use crate::pattern::PatternStore;
use crate::queue::{connection_queue, Dequeued, IntentReceiver, IntentSender};

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Aborted,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub client_name: String,
    /// Wait between failed open attempts.
    pub connect_interval: Duration,
    /// 0 retries forever.
    pub max_attempts: u32,
    /// Upper bound on one wait for queued work.
    pub poll_interval: Duration,
    /// Reopen after the server goes away instead of returning.
    pub reconnect: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            client_name: autopatch_conf::DEFAULT_CLIENT_NAME.to_string(),
            connect_interval: Duration::from_secs(3),
            max_attempts: 0,
            poll_interval: Duration::from_millis(100),
            reconnect: true,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Giving up after {attempts} connection attempts: {last_error}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        last_error: GraphError,
    },

    #[error("Could not read client name: {0}")]
    ClientName(#[source] GraphError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Cancelled from outside.
    Aborted,
    /// Server went away and reconnecting is off.
    Finished,
}

/// An open session and its connection queue. Dropping it closes the session.
pub struct LiveSession {
    session: Box<dyn GraphSession>,
    queue: IntentReceiver,
    intents: IntentSender,
}

impl LiveSession {
    pub fn graph(&self) -> &dyn GraphSession {
        self.session.as_ref()
    }
}

enum Served {
    Cancelled,
    Ended,
}

pub struct SessionManager<S: GraphService> {
    service: S,
    options: SessionOptions,
    patterns: PatternStore,
    cache: PortCache,
    applier: ConnectionApplier,
    refresh_handle: RefreshHandle,
    refresh_rx: RefreshReceiver,
    state: watch::Sender<SessionState>,
}

impl<S: GraphService> SessionManager<S> {
    pub fn new(service: S, patterns: PatternStore, mut options: SessionOptions) -> Self {
        options.poll_interval = options.poll_interval.max(MIN_POLL_INTERVAL);
        let (refresh_handle, refresh_rx) = refresh_channel();
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            service,
            options,
            patterns,
            cache: PortCache::new(),
            applier: ConnectionApplier::new(),
            refresh_handle,
            refresh_rx,
            state,
        }
    }

    /// Handle for requesting a refresh from outside, e.g. after a reload.
    pub fn refresh_handle(&self) -> RefreshHandle {
        self.refresh_handle.clone()
    }

    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state {:?} -> {:?}", previous, state);
        }
    }

    /// Connect, serve, and reconnect until cancelled, or until the first
    /// session ends when reconnecting is off.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunOutcome, SessionError> {
        loop {
            let Some(live) = self.connect(&cancel).await? else {
                self.set_state(SessionState::Aborted);
                return Ok(RunOutcome::Aborted);
            };

            match self.serve(live, &cancel).await {
                Served::Cancelled => {
                    self.set_state(SessionState::Aborted);
                    return Ok(RunOutcome::Aborted);
                }
                Served::Ended => {
                    self.cache.clear();
                    self.set_state(SessionState::Disconnected);
                    if !self.options.reconnect {
                        return Ok(RunOutcome::Finished);
                    }
                    info!("Reconnecting to graph server");
                }
            }
        }
    }

    /// Open a session, retrying per the options. `None` if cancelled first.
    pub async fn connect(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<LiveSession>, SessionError> {
        self.set_state(SessionState::Connecting);
        self.cache.clear();

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            attempts += 1;

            let (intents, queue) = connection_queue();
            let events = Arc::new(EventDispatcher::new(
                self.refresh_handle.clone(),
                intents.clone(),
            ));

            let err = match self.service.open(&self.options.client_name, events).await {
                Ok(session) => {
                    if let Err(e) = self.check_client_name(session.as_ref()) {
                        self.set_state(SessionState::Aborted);
                        return Err(e);
                    }
                    self.set_state(SessionState::Connected);
                    return Ok(Some(LiveSession {
                        session,
                        queue,
                        intents,
                    }));
                }
                Err(e) => e,
            };

            let max = self.options.max_attempts;
            if max != 0 && attempts >= max {
                error!("Could not connect to graph server after {} attempts", attempts);
                self.set_state(SessionState::Aborted);
                return Err(SessionError::AttemptsExhausted {
                    attempts,
                    last_error: err,
                });
            }

            warn!("Could not connect to graph server: {}", err);
            debug!("Retrying in {:?}", self.options.connect_interval);
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.options.connect_interval) => {}
            }
        }
    }

    fn check_client_name(&self, session: &dyn GraphSession) -> Result<(), SessionError> {
        let name = session.client_name().map_err(SessionError::ClientName)?;
        info!("Client name: {}", name);
        if name != self.options.client_name {
            warn!(
                "Server assigned client name '{}' instead of '{}'",
                name, self.options.client_name
            );
        }
        Ok(())
    }

    async fn serve(&mut self, live: LiveSession, cancel: &CancellationToken) -> Served {
        let LiveSession {
            session,
            mut queue,
            intents,
        } = live;

        // requests from a previous session are covered by the initial pass
        while self.refresh_rx.try_recv().is_ok() {}
        self.enqueue_refresh(session.as_ref(), &intents);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Closing session");
                    return Served::Cancelled;
                }

                Some(request) = self.refresh_rx.recv() => {
                    self.forget_stale(&request);
                    let mut coalesced = 0;
                    while let Ok(next) = self.refresh_rx.try_recv() {
                        self.forget_stale(&next);
                        coalesced += 1;
                    }
                    debug!("Refresh requested: {:?} (+{} coalesced)", request, coalesced);
                    self.enqueue_refresh(session.as_ref(), &intents);
                }

                item = queue.recv_timeout(self.options.poll_interval) => match item {
                    Dequeued::Intent(intent) => {
                        self.applier.apply(session.as_ref(), &mut self.cache, &intent);
                    }
                    Dequeued::SessionEnded => {
                        info!("Session ended");
                        return Served::Ended;
                    }
                    Dequeued::Timeout => {}
                },
            }
        }
    }

    fn forget_stale(&mut self, request: &RefreshRequest) {
        if let Some(name) = request.stale_port() {
            self.cache.evict(name);
        }
    }

    fn enqueue_refresh(&self, session: &dyn GraphSession, intents: &IntentSender) {
        let patterns = self.patterns.snapshot();
        match MatchEngine::refresh(session, &patterns) {
            Ok(found) => {
                intents.push_all(found);
            }
            Err(e) => warn!("Could not list ports: {}", e),
        }
    }
}
