//! In-memory graph server
//!
//! A scriptable stand-in for a real server: ports, links, failing opens,
//! server restarts and event delivery are all driven by the caller. Cloning
//! shares the same graph.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::graph::{
    Connection, ConnectionIntent, GraphError, GraphEvents, GraphService, GraphSession, Port,
    PortDirection, PortId,
};

#[derive(Default)]
struct MemoryState {
    ports: Vec<Port>,
    links: BTreeSet<(PortId, PortId)>,
    next_id: u32,
    /// Bumped whenever the server goes away; sessions from an older
    /// generation are dead.
    generation: u64,
    failing_opens: u32,
    offline: bool,
    assigned_name: Option<String>,
    client_name_fails: bool,
    broken_ports: HashSet<String>,
    events: Option<Arc<dyn GraphEvents>>,
    open_attempts: u32,
    closes: u32,
    connect_calls: Vec<ConnectionIntent>,
}

impl MemoryState {
    fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.iter().find(|p| p.id == id)
    }

    fn fresh_id(&mut self) -> PortId {
        self.next_id += 1;
        PortId(self.next_id)
    }
}

#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<Mutex<MemoryState>>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // a panicking test thread must not wedge the others
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn events(&self) -> Option<Arc<dyn GraphEvents>> {
        self.state().events.clone()
    }

    pub fn add_port(&self, name: &str, direction: PortDirection) -> PortId {
        self.insert_port(Port::new(PortId::default(), name, direction))
    }

    /// Register a port built by the caller; its id is replaced with a fresh one.
    pub fn insert_port(&self, mut port: Port) -> PortId {
        let id = {
            let mut state = self.state();
            port.id = state.fresh_id();
            let id = port.id;
            state.ports.push(port.clone());
            id
        };
        if let Some(events) = self.events() {
            events.port_registered(&port.canonical_name);
        }
        id
    }

    pub fn remove_port(&self, name: &str) {
        let removed = {
            let mut state = self.state();
            let Some(pos) = state.ports.iter().position(|p| p.canonical_name == name) else {
                return;
            };
            let port = state.ports.remove(pos);
            state.links.retain(|(o, i)| *o != port.id && *i != port.id);
            port
        };
        if let Some(events) = self.events() {
            events.port_unregistered(&removed.canonical_name);
        }
    }

    pub fn rename_port(&self, old_name: &str, new_name: &str) {
        {
            let mut state = self.state();
            let Some(port) = state.ports.iter_mut().find(|p| p.canonical_name == old_name) else {
                return;
            };
            port.canonical_name = new_name.to_string();
        }
        if let Some(events) = self.events() {
            events.port_renamed(old_name, new_name);
        }
    }

    pub fn set_pretty_name(&self, name: &str, pretty_name: &str) {
        {
            let mut state = self.state();
            let Some(port) = state.ports.iter_mut().find(|p| p.canonical_name == name) else {
                return;
            };
            port.pretty_name = Some(pretty_name.to_string());
        }
        if let Some(events) = self.events() {
            events.property_changed(name);
        }
    }

    /// Pre-existing link, as if made by someone else.
    pub fn link(&self, output: &str, input: &str) -> bool {
        let mut state = self.state();
        let ids = (
            state.ports.iter().find(|p| p.canonical_name == output).map(|p| p.id),
            state.ports.iter().find(|p| p.canonical_name == input).map(|p| p.id),
        );
        match ids {
            (Some(o), Some(i)) => state.links.insert((o, i)),
            _ => false,
        }
    }

    pub fn is_linked(&self, output: &str, input: &str) -> bool {
        self.links()
            .iter()
            .any(|c| c.output == output && c.input == input)
    }

    pub fn links(&self) -> Vec<Connection> {
        let state = self.state();
        state
            .links
            .iter()
            .filter_map(|(o, i)| {
                Some(Connection {
                    output: state.port(*o)?.canonical_name.clone(),
                    input: state.port(*i)?.canonical_name.clone(),
                })
            })
            .collect()
    }

    /// Fail the next `count` open attempts.
    pub fn fail_next_opens(&self, count: u32) {
        self.state().failing_opens = count;
    }

    /// While offline every open attempt fails.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Name the server hands out instead of the requested one.
    pub fn assign_client_name(&self, name: &str) {
        self.state().assigned_name = Some(name.to_string());
    }

    pub fn fail_client_name(&self, fail: bool) {
        self.state().client_name_fails = fail;
    }

    /// Connect requests touching `name` fail.
    pub fn break_port(&self, name: &str) {
        self.state().broken_ports.insert(name.to_string());
    }

    /// The server terminates: live sessions die, links vanish, and the
    /// current session's event sink hears about it.
    pub fn shutdown(&self, reason: &str) {
        let events = {
            let mut state = self.state();
            state.generation += 1;
            state.links.clear();
            state.events.take()
        };
        if let Some(events) = events {
            events.client_shutdown(reason);
        }
    }

    /// The server comes back with every port under a new handle.
    pub fn restart(&self) {
        let mut state = self.state();
        state.generation += 1;
        state.links.clear();
        state.events = None;
        let mut ports = std::mem::take(&mut state.ports);
        for port in &mut ports {
            port.id = state.fresh_id();
        }
        state.ports = ports;
    }

    pub fn open_attempts(&self) -> u32 {
        self.state().open_attempts
    }

    pub fn close_count(&self) -> u32 {
        self.state().closes
    }

    pub fn has_listener(&self) -> bool {
        self.state().events.is_some()
    }

    /// Every connect request that reached the server, in order.
    pub fn connect_calls(&self) -> Vec<ConnectionIntent> {
        self.state().connect_calls.clone()
    }

    /// Open a session without registering an event sink.
    pub fn open_direct(&self, client_name: &str) -> Box<dyn GraphSession> {
        let generation = self.state().generation;
        Box::new(MemorySession {
            graph: self.clone(),
            generation,
            requested_name: client_name.to_string(),
        })
    }
}

#[async_trait]
impl GraphService for MemoryGraph {
    async fn open(
        &self,
        client_name: &str,
        events: Arc<dyn GraphEvents>,
    ) -> Result<Box<dyn GraphSession>, GraphError> {
        let generation = {
            let mut state = self.state();
            state.open_attempts += 1;
            if state.offline {
                return Err(GraphError::Connect("server offline".to_string()));
            }
            if state.failing_opens > 0 {
                state.failing_opens -= 1;
                return Err(GraphError::Connect("server not responding".to_string()));
            }
            state.events = Some(events);
            state.generation
        };

        Ok(Box::new(MemorySession {
            graph: self.clone(),
            generation,
            requested_name: client_name.to_string(),
        }))
    }
}

struct MemorySession {
    graph: MemoryGraph,
    generation: u64,
    requested_name: String,
}

impl MemorySession {
    fn live_state(&self) -> Result<MutexGuard<'_, MemoryState>, GraphError> {
        let state = self.graph.state();
        if state.generation == self.generation {
            Ok(state)
        } else {
            Err(GraphError::Closed)
        }
    }
}

impl GraphSession for MemorySession {
    fn client_name(&self) -> Result<String, GraphError> {
        let state = self.live_state()?;
        if state.client_name_fails {
            return Err(GraphError::ClientName("server did not report a name".to_string()));
        }
        Ok(state
            .assigned_name
            .clone()
            .unwrap_or_else(|| self.requested_name.clone()))
    }

    fn ports(&self, direction: PortDirection) -> Result<Vec<Port>, GraphError> {
        let state = self.live_state()?;
        Ok(state
            .ports
            .iter()
            .filter(|p| p.direction == direction)
            .cloned()
            .collect())
    }

    fn port_by_name(&self, name: &str) -> Option<PortId> {
        let state = self.live_state().ok()?;
        state
            .ports
            .iter()
            .find(|p| p.canonical_name == name)
            .map(|p| p.id)
    }

    fn is_connected(&self, output: PortId, input: PortId) -> Result<bool, GraphError> {
        let state = self.live_state()?;
        if state.port(output).is_none() {
            return Err(GraphError::UnknownPort(output.to_string()));
        }
        Ok(state.links.contains(&(output, input)))
    }

    fn connect(&self, output: PortId, input: PortId) -> Result<(), GraphError> {
        let mut state = self.live_state()?;
        let (out_name, in_name) = match (state.port(output), state.port(input)) {
            (Some(o), Some(i)) => (o.canonical_name.clone(), i.canonical_name.clone()),
            (None, _) => return Err(GraphError::UnknownPort(output.to_string())),
            (_, None) => return Err(GraphError::UnknownPort(input.to_string())),
        };

        state
            .connect_calls
            .push(ConnectionIntent::new(&out_name, &in_name));

        if state.broken_ports.contains(&out_name) || state.broken_ports.contains(&in_name) {
            return Err(GraphError::Link(format!("cannot connect {out_name} to {in_name}")));
        }

        state.links.insert((output, input));
        Ok(())
    }

    fn connections(&self) -> Result<Vec<Connection>, GraphError> {
        self.live_state()?;
        Ok(self.graph.links())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        let mut state = self.graph.state();
        state.closes += 1;
        if state.generation == self.generation {
            state.events = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_and_query() {
        let graph = MemoryGraph::new();
        let out = graph.add_port("a:out", PortDirection::Output);
        let inp = graph.add_port("b:in", PortDirection::Input);
        let session = graph.open_direct("t");

        assert!(!session.is_connected(out, inp).unwrap());
        session.connect(out, inp).unwrap();
        assert!(session.is_connected(out, inp).unwrap());
        assert!(graph.is_linked("a:out", "b:in"));
        assert_eq!(graph.connect_calls(), vec![ConnectionIntent::new("a:out", "b:in")]);
    }

    #[test]
    fn test_restart_invalidates_sessions_and_handles() {
        let graph = MemoryGraph::new();
        let old = graph.add_port("a:out", PortDirection::Output);
        let session = graph.open_direct("t");

        graph.restart();
        assert!(matches!(session.ports(PortDirection::Output), Err(GraphError::Closed)));

        let fresh = graph.open_direct("t");
        let new = fresh.port_by_name("a:out").unwrap();
        assert_ne!(old, new);
    }

    #[test]
    fn test_drop_counts_close() {
        let graph = MemoryGraph::new();
        drop(graph.open_direct("t"));
        assert_eq!(graph.close_count(), 1);
    }
}
