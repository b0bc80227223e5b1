//! PipeWire graph backend
//!
//! Each session runs its own PipeWire main loop on a dedicated thread:
//!
//! ```text
//!  session manager (tokio)            pipewire-graph thread
//!         │                                   │
//!   ports()/is_connected() ──read──► GraphState ◄──write── registry listener
//!         │                                   │
//!   connect() ──► command channel ──► timer ──► link-factory
//!                                             │
//!                     GraphEvents ◄───────────┘ (port added/removed, core error)
//! ```
//!
//! Port names are `node.name:port.name`. `port.alias` and `object.path` act
//! as aliases; `node.description:port.name` is the pretty name.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, Once, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_trait::async_trait;
use pipewire as pw;
use pw::proxy::ProxyT;
use pw::registry::GlobalObject;
use pw::spa::utils::dict::DictRef;
use pw::types::ObjectType;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::graph::{
    Connection, GraphError, GraphEvents, GraphService, GraphSession, Port, PortDirection, PortId,
};

static PIPEWIRE_INIT: Once = Once::new();

/// How often the loop thread checks for commands and the stop flag.
const COMMAND_POLL: Duration = Duration::from_millis(10);

const EPIPE: i32 = 32;

#[derive(Debug, Clone)]
struct NodeInfo {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Clone)]
struct PortInfo {
    node_id: u32,
    name: String,
    direction: PortDirection,
    alias: Option<String>,
    object_path: Option<String>,
}

#[derive(Debug, Default)]
struct GraphState {
    nodes: HashMap<u32, NodeInfo>,
    ports: BTreeMap<u32, PortInfo>,
    /// link id → (output port, input port)
    links: HashMap<u32, (u32, u32)>,
    /// Requested but not yet announced by the registry.
    pending: HashSet<(u32, u32)>,
    alive: bool,
}

impl GraphState {
    fn canonical_name(&self, port: &PortInfo) -> Option<String> {
        let node = self.nodes.get(&port.node_id)?;
        Some(format!("{}:{}", node.name, port.name))
    }

    fn snapshot(&self, id: u32, port: &PortInfo) -> Option<Port> {
        let node = self.nodes.get(&port.node_id)?;
        let canonical = format!("{}:{}", node.name, port.name);

        let mut snapshot = Port::new(PortId(id), canonical.clone(), port.direction);
        for alias in [&port.alias, &port.object_path].into_iter().flatten() {
            if *alias != canonical && !snapshot.aliases.contains(alias) {
                snapshot.aliases.push(alias.clone());
            }
        }
        if let Some(description) = &node.description {
            snapshot.pretty_name = Some(format!("{}:{}", description, port.name));
        }
        Some(snapshot)
    }
}

type SharedState = Arc<RwLock<GraphState>>;

fn read_state(shared: &SharedState) -> RwLockReadGuard<'_, GraphState> {
    shared.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_state(shared: &SharedState) -> RwLockWriteGuard<'_, GraphState> {
    shared.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
enum Command {
    Link {
        output_node: u32,
        output_port: u32,
        input_node: u32,
        input_port: u32,
    },
}

/// Opens sessions against the local PipeWire daemon.
#[derive(Debug, Clone, Default)]
pub struct PipeWireGraph;

impl PipeWireGraph {
    pub fn new() -> Self {
        PIPEWIRE_INIT.call_once(|| {
            pw::init();
        });
        Self
    }
}

#[async_trait]
impl GraphService for PipeWireGraph {
    async fn open(
        &self,
        client_name: &str,
        events: Arc<dyn GraphEvents>,
    ) -> Result<Box<dyn GraphSession>, GraphError> {
        let shared: SharedState = Arc::default();
        let running = Arc::new(AtomicBool::new(true));
        let (commands_tx, commands_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("pipewire-graph".to_string())
            .spawn({
                let client_name = client_name.to_string();
                let shared = Arc::clone(&shared);
                let running = Arc::clone(&running);
                move || {
                    let loop_ctx = LoopContext {
                        client_name,
                        shared,
                        running,
                        events,
                        commands: commands_rx,
                    };
                    if let Err(e) = run_graph_loop(loop_ctx, ready_tx) {
                        error!("PipeWire loop failed: {}", e);
                    }
                    debug!("PipeWire loop exited");
                }
            })
            .map_err(|e| GraphError::Connect(format!("Failed to spawn PipeWire thread: {e}")))?;

        let ready = ready_rx
            .await
            .unwrap_or_else(|_| Err(GraphError::Connect("PipeWire loop exited early".to_string())));

        let session = PipeWireSession {
            client_name: client_name.to_string(),
            shared,
            running,
            commands: Mutex::new(commands_tx),
            thread: Mutex::new(Some(thread)),
        };

        // dropping the session stops and joins the thread
        ready?;
        info!("Connected to PipeWire");
        Ok(Box::new(session))
    }
}

struct PipeWireSession {
    client_name: String,
    shared: SharedState,
    running: Arc<AtomicBool>,
    commands: Mutex<mpsc::Sender<Command>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PipeWireSession {
    fn live_state(&self) -> Result<RwLockReadGuard<'_, GraphState>, GraphError> {
        let state = read_state(&self.shared);
        if state.alive {
            Ok(state)
        } else {
            Err(GraphError::Closed)
        }
    }
}

impl GraphSession for PipeWireSession {
    fn client_name(&self) -> Result<String, GraphError> {
        self.live_state()?;
        Ok(self.client_name.clone())
    }

    fn ports(&self, direction: PortDirection) -> Result<Vec<Port>, GraphError> {
        let state = self.live_state()?;
        Ok(state
            .ports
            .iter()
            .filter(|(_, port)| port.direction == direction)
            .filter_map(|(id, port)| state.snapshot(*id, port))
            .collect())
    }

    fn port_by_name(&self, name: &str) -> Option<PortId> {
        let state = self.live_state().ok()?;
        state
            .ports
            .iter()
            .find(|(_, port)| state.canonical_name(port).as_deref() == Some(name))
            .map(|(id, _)| PortId(*id))
    }

    fn is_connected(&self, output: PortId, input: PortId) -> Result<bool, GraphError> {
        let state = self.live_state()?;
        if !state.ports.contains_key(&output.0) {
            return Err(GraphError::UnknownPort(output.to_string()));
        }
        let pair = (output.0, input.0);
        Ok(state.pending.contains(&pair) || state.links.values().any(|link| *link == pair))
    }

    fn connect(&self, output: PortId, input: PortId) -> Result<(), GraphError> {
        let command = {
            let state = self.live_state()?;
            let out = state
                .ports
                .get(&output.0)
                .ok_or_else(|| GraphError::UnknownPort(output.to_string()))?;
            let inp = state
                .ports
                .get(&input.0)
                .ok_or_else(|| GraphError::UnknownPort(input.to_string()))?;
            Command::Link {
                output_node: out.node_id,
                output_port: output.0,
                input_node: inp.node_id,
                input_port: input.0,
            }
        };

        self.commands
            .lock()
            .map_err(|_| GraphError::Closed)?
            .send(command)
            .map_err(|_| GraphError::Closed)?;
        write_state(&self.shared).pending.insert((output.0, input.0));
        Ok(())
    }

    fn connections(&self) -> Result<Vec<Connection>, GraphError> {
        let state = self.live_state()?;
        let name_of = |id: &u32| state.ports.get(id).and_then(|p| state.canonical_name(p));

        let mut connections: Vec<Connection> = state
            .links
            .values()
            .filter_map(|(o, i)| {
                Some(Connection {
                    output: name_of(o)?,
                    input: name_of(i)?,
                })
            })
            .collect();
        connections.sort();
        Ok(connections)
    }
}

impl Drop for PipeWireSession {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        let handle = self
            .thread
            .get_mut()
            .map(Option::take)
            .unwrap_or_else(|poisoned| poisoned.into_inner().take());
        if let Some(handle) = handle {
            debug!("Waiting for PipeWire thread to stop...");
            let _ = handle.join();
        }
        write_state(&self.shared).alive = false;
        info!("Closed PipeWire session");
    }
}

struct LoopContext {
    client_name: String,
    shared: SharedState,
    running: Arc<AtomicBool>,
    events: Arc<dyn GraphEvents>,
    commands: mpsc::Receiver<Command>,
}

/// Startup bookkeeping shared between the loop's callbacks.
#[derive(Default)]
struct Startup {
    ready: Option<oneshot::Sender<Result<(), GraphError>>>,
    sync_seq: Option<i32>,
    synced: bool,
}

impl Startup {
    fn finish(&mut self, result: Result<(), GraphError>) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(result);
        }
    }
}

fn run_graph_loop(
    ctx: LoopContext,
    ready: oneshot::Sender<Result<(), GraphError>>,
) -> Result<(), GraphError> {
    use pw::properties::properties;

    let startup = Rc::new(RefCell::new(Startup {
        ready: Some(ready),
        ..Default::default()
    }));
    let fail = |msg: String| {
        startup.borrow_mut().finish(Err(GraphError::Connect(msg.clone())));
        GraphError::Connect(msg)
    };

    let mainloop =
        pw::main_loop::MainLoopRc::new(None).map_err(|e| fail(format!("Failed to create main loop: {e}")))?;
    let context = pw::context::ContextRc::new(&mainloop, None)
        .map_err(|e| fail(format!("Failed to create context: {e}")))?;
    let core = context
        .connect_rc(Some(properties! {
            *pw::keys::APP_NAME => ctx.client_name.as_str(),
        }))
        .map_err(|e| fail(format!("Failed to connect to PipeWire: {e}")))?;
    let registry = core
        .get_registry_rc()
        .map_err(|e| fail(format!("Failed to get registry: {e}")))?;

    write_state(&ctx.shared).alive = true;

    let _registry_listener = registry
        .add_listener_local()
        .global({
            let shared = Arc::clone(&ctx.shared);
            let events = Arc::clone(&ctx.events);
            let startup = Rc::clone(&startup);
            move |global| {
                let synced = startup.borrow().synced;
                process_global(&shared, events.as_ref(), synced, global);
            }
        })
        .global_remove({
            let shared = Arc::clone(&ctx.shared);
            let events = Arc::clone(&ctx.events);
            move |id| process_global_remove(&shared, events.as_ref(), id)
        })
        .register();

    let _core_listener = core
        .add_listener_local()
        .done({
            let startup = Rc::clone(&startup);
            move |id, seq| {
                let mut startup = startup.borrow_mut();
                if id == pw::core::PW_ID_CORE && startup.sync_seq == Some(seq.seq()) {
                    startup.synced = true;
                    startup.finish(Ok(()));
                }
            }
        })
        .error({
            let shared = Arc::clone(&ctx.shared);
            let events = Arc::clone(&ctx.events);
            let startup = Rc::clone(&startup);
            let mainloop = mainloop.downgrade();
            move |id, _seq, res, message| {
                if id != pw::core::PW_ID_CORE {
                    // link proxies report their own failures
                    debug!("Error on object {}: {}", id, message);
                    return;
                }

                // any core error once running is treated as loss of the server
                let was_synced = {
                    let mut startup = startup.borrow_mut();
                    startup.finish(Err(GraphError::Connect(message.to_string())));
                    startup.synced
                };
                write_state(&shared).alive = false;
                if was_synced {
                    let reason = if res == -EPIPE {
                        "server disconnected".to_string()
                    } else {
                        message.to_string()
                    };
                    events.client_shutdown(&reason);
                }
                if let Some(mainloop) = mainloop.upgrade() {
                    mainloop.quit();
                }
            }
        })
        .register();

    let seq = core
        .sync(0)
        .map_err(|e| fail(format!("Failed to sync with server: {e}")))?;
    startup.borrow_mut().sync_seq = Some(seq.seq());

    let created_links: Rc<RefCell<CreatedLinks>> = Rc::default();
    let timer = mainloop.loop_().add_timer({
        let mainloop = mainloop.downgrade();
        let core = core.clone();
        let shared = Arc::clone(&ctx.shared);
        let events = Arc::clone(&ctx.events);
        let running = Arc::clone(&ctx.running);
        let commands = ctx.commands;
        let created_links = Rc::clone(&created_links);
        move |_| {
            if !running.load(Ordering::Acquire) {
                if let Some(mainloop) = mainloop.upgrade() {
                    mainloop.quit();
                }
                return;
            }

            prune_settled(&mut created_links.borrow_mut(), &read_state(&shared));

            while let Ok(Command::Link {
                output_node,
                output_port,
                input_node,
                input_port,
            }) = commands.try_recv()
            {
                let props = properties! {
                    "link.output.node" => output_node.to_string(),
                    "link.output.port" => output_port.to_string(),
                    "link.input.node" => input_node.to_string(),
                    "link.input.port" => input_port.to_string(),
                    "object.linger" => "true",
                };
                match core.create_object::<pw::link::Link>("link-factory", &props) {
                    Ok(link) => {
                        let pair = (output_port, input_port);
                        let listener = link
                            .upcast_ref()
                            .add_listener_local()
                            .error({
                                let shared = Arc::clone(&shared);
                                let events = Arc::clone(&events);
                                move |_seq, _res, message| {
                                    abandon_link(&shared, pair);
                                    events.error(&format!(
                                        "Failed to link port {output_port} to {input_port}: {message}"
                                    ));
                                }
                            })
                            .register();
                        created_links.borrow_mut().insert(pair, (link, listener));
                    }
                    Err(e) => {
                        abandon_link(&shared, (output_port, input_port));
                        events.error(&format!(
                            "Failed to link port {output_port} to {input_port}: {e}"
                        ));
                    }
                }
            }
        }
    });
    timer
        .update_timer(Some(COMMAND_POLL), Some(COMMAND_POLL))
        .into_result()
        .map_err(|e| fail(format!("Failed to set timer: {e}")))?;

    mainloop.run();

    write_state(&ctx.shared).alive = false;
    startup
        .borrow_mut()
        .finish(Err(GraphError::Connect("PipeWire loop stopped".to_string())));
    Ok(())
}

/// Link proxies we are still waiting on, by (output port, input port).
/// Links linger, so a proxy can go once its link is settled.
type CreatedLinks = HashMap<(u32, u32), (pw::link::Link, pw::proxy::ProxyListener)>;

/// Forget a requested link so the pair is tried again on the next pass.
fn abandon_link(shared: &SharedState, pair: (u32, u32)) {
    write_state(shared).pending.remove(&pair);
}

/// Drop proxies whose link was announced by the registry or failed.
fn prune_settled<T>(created: &mut HashMap<(u32, u32), T>, state: &GraphState) {
    created.retain(|pair, _| state.pending.contains(pair));
}

fn parse_id(props: &DictRef, key: &str) -> Option<u32> {
    props.get(key).and_then(|s| s.parse().ok())
}

fn process_global<P: AsRef<DictRef>>(
    shared: &SharedState,
    events: &dyn GraphEvents,
    synced: bool,
    global: &GlobalObject<P>,
) {
    let props = match &global.props {
        Some(p) => p.as_ref(),
        None => return,
    };

    match global.type_ {
        ObjectType::Node => {
            let node = NodeInfo {
                name: props
                    .get(*pw::keys::NODE_NAME)
                    .map(String::from)
                    .unwrap_or_else(|| format!("node-{}", global.id)),
                description: props.get(*pw::keys::NODE_DESCRIPTION).map(String::from),
            };
            let name = node.name.clone();
            write_state(shared).nodes.insert(global.id, node);
            // ports seen before their node only become nameable now
            if synced {
                events.property_changed(&name);
            }
        }
        ObjectType::Port => {
            let Some(node_id) = parse_id(props, *pw::keys::NODE_ID) else {
                warn!("Port {} has no node id", global.id);
                return;
            };
            let direction = match props.get(*pw::keys::PORT_DIRECTION) {
                Some("in") => PortDirection::Input,
                _ => PortDirection::Output,
            };
            let port = PortInfo {
                node_id,
                name: props
                    .get(*pw::keys::PORT_NAME)
                    .map(String::from)
                    .unwrap_or_else(|| format!("port-{}", global.id)),
                direction,
                alias: props.get(*pw::keys::PORT_ALIAS).map(String::from),
                object_path: props.get(*pw::keys::OBJECT_PATH).map(String::from),
            };

            let name = {
                let mut state = write_state(shared);
                let name = state.canonical_name(&port);
                state.ports.insert(global.id, port);
                name
            };
            if synced {
                if let Some(name) = name {
                    events.port_registered(&name);
                }
            }
        }
        ObjectType::Link => {
            let (Some(output), Some(input)) = (
                parse_id(props, *pw::keys::LINK_OUTPUT_PORT),
                parse_id(props, *pw::keys::LINK_INPUT_PORT),
            ) else {
                return;
            };
            let mut state = write_state(shared);
            state.pending.remove(&(output, input));
            state.links.insert(global.id, (output, input));
        }
        _ => {}
    }
}

fn process_global_remove(shared: &SharedState, events: &dyn GraphEvents, id: u32) {
    let removed_port = {
        let mut state = write_state(shared);
        if state.links.remove(&id).is_some() || state.nodes.remove(&id).is_some() {
            return;
        }
        let Some(port) = state.ports.remove(&id) else {
            return;
        };
        state.pending.retain(|(o, i)| *o != id && *i != id);
        state.canonical_name(&port)
    };

    if let Some(name) = removed_port {
        events.port_unregistered(&name);
    }
}
