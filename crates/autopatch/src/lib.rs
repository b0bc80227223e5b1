//! autopatch: pattern-driven port auto-connection
//!
//! Watches an audio/MIDI graph and connects every output port whose name
//! matches a pattern to the input ports its paired template selects. Runs
//! against PipeWire in production and an in-memory graph in tests.
//!
//! ```text
//! GraphEvents ──► EventDispatcher ──► refresh request ─┐
//!                                                      ▼
//! PatternStore ──snapshot──► MatchEngine ──intents──► queue ──► ConnectionApplier
//!                                                      ▲
//!                          SessionManager (connect / backoff / reconnect)
//! ```

pub mod applier;
pub mod backend;
pub mod cache;
pub mod cli;
pub mod dispatch;
pub mod engine;
pub mod graph;
pub mod listing;
pub mod logging;
pub mod pattern;
pub mod queue;
pub mod session;

pub use applier::{ApplyOutcome, ConnectionApplier};
pub use dispatch::{EventDispatcher, RefreshHandle, RefreshRequest};
pub use engine::MatchEngine;
pub use graph::{
    Connection, ConnectionIntent, GraphError, GraphEvents, GraphService, GraphSession, Port,
    PortDirection, PortId,
};
pub use pattern::{Matcher, Pattern, PatternError, PatternSet, PatternStore};
pub use session::{RunOutcome, SessionError, SessionManager, SessionOptions, SessionState};
