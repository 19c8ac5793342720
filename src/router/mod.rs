//! MIDI router
//!
//! A directed graph from input ports to output ports. Every connection has
//! its own enabled flag, filter chain and transform chain. Messages submitted
//! on input ports go through one queue and are routed by a single worker in
//! arrival order; each message finishes routing before the next is taken.

mod filter;
mod port;
mod stats;
mod transform;

pub use filter::MidiFilter;
pub use port::{MidiPort, PortDirection, PortInfo};
pub use stats::ThroughputMeter;
pub use transform::MidiTransform;

use crate::config::RouterSettings;
use crate::error::{Error, Result};
use crate::midi::{MidiBackend, MidiMessage};
use crate::registry::{CallbackResult, Registry, SubscriptionId};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Callback receiving each routed message and its destination port id.
pub type MessageObserver = dyn Fn(&MidiMessage, &str) -> CallbackResult + Send + Sync;

/// An edge from an input port to an output port.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiConnection {
    pub input_port: String,
    pub output_port: String,
    pub enabled: bool,
    pub filters: Vec<MidiFilter>,
    pub transforms: Vec<MidiTransform>,
}

impl MidiConnection {
    pub fn new(input_port: impl Into<String>, output_port: impl Into<String>) -> Self {
        Self {
            input_port: input_port.into(),
            output_port: output_port.into(),
            enabled: true,
            filters: Vec::new(),
            transforms: Vec::new(),
        }
    }

    fn links(&self, input_port: &str, output_port: &str) -> bool {
        self.input_port == input_port && self.output_port == output_port
    }

    fn touches(&self, port_id: &str) -> bool {
        self.input_port == port_id || self.output_port == port_id
    }

    /// Runs the filter chain, then the transform chain. `None` if the
    /// connection is disabled or any filter rejects the message.
    pub fn process(&self, message: &MidiMessage) -> Option<MidiMessage> {
        if !self.enabled || !self.filters.iter().all(|f| f.passes(message)) {
            return None;
        }

        Some(
            self.transforms
                .iter()
                .fold(message.clone(), |msg, transform| transform.apply(&msg)),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterStatistics {
    pub total_ports: usize,
    pub input_ports: usize,
    pub output_ports: usize,
    pub total_connections: usize,
    pub active_connections: usize,
    pub messages_per_second: f64,
    pub total_messages_processed: u64,
    pub queued_messages: usize,
}

#[derive(Default)]
struct RoutingTables {
    ports: BTreeMap<String, MidiPort>,
    connections: Vec<MidiConnection>,
}

impl RoutingTables {
    fn connection_mut(&mut self, input_port: &str, output_port: &str) -> Result<&mut MidiConnection> {
        self.connections
            .iter_mut()
            .find(|c| c.links(input_port, output_port))
            .ok_or_else(|| Error::ConnectionNotFound(input_port.to_string(), output_port.to_string()))
    }

    fn check_direction(&self, port_id: &str, expected: PortDirection) -> Result<()> {
        let port = self
            .ports
            .get(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        if port.direction() != expected {
            return Err(Error::PortDirection {
                port: port_id.to_string(),
                expected,
            });
        }
        Ok(())
    }
}

struct RouterShared {
    tables: Mutex<RoutingTables>,
    meter: Mutex<ThroughputMeter>,
    observers: Registry<MessageObserver>,
    queue_tx: Sender<(MidiMessage, String)>,
    queue_rx: Receiver<(MidiMessage, String)>,
    running: AtomicBool,
    poll_timeout: Duration,
}

impl RouterShared {
    fn tables(&self) -> MutexGuard<'_, RoutingTables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn meter(&self) -> MutexGuard<'_, ThroughputMeter> {
        self.meter.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn route(&self, message: &MidiMessage, input_port: &str) -> usize {
        self.meter().record();

        let routed: Vec<(MidiMessage, String)> = {
            let mut tables = self.tables();
            let RoutingTables { ports, connections } = &mut *tables;
            let mut routed = Vec::new();

            for connection in connections
                .iter()
                .filter(|c| c.enabled && c.input_port == input_port)
            {
                let Some(processed) = connection.process(message) else {
                    continue;
                };
                let Some(port) = ports.get_mut(&connection.output_port) else {
                    continue;
                };
                if let Err(e) = port.send(&processed) {
                    warn!("Failed to send MIDI to {}: {}", port.name(), e);
                }
                routed.push((processed, connection.output_port.clone()));
            }
            routed
        };

        for (processed, output_port) in &routed {
            self.observers
                .dispatch(|observer| observer(processed, output_port.as_str()));
        }
        routed.len()
    }

    fn run(&self) {
        info!("MIDI router worker started");
        while self.running.load(Ordering::SeqCst) {
            match self.queue_rx.recv_timeout(self.poll_timeout) {
                Ok((message, input_port)) => {
                    self.route(&message, &input_port);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    error!("MIDI router queue disconnected");
                    break;
                }
            }
            self.meter().refresh(Instant::now());
        }
        info!("MIDI router worker stopped");
    }
}

/// Routes MIDI between ports through per-connection filters and transforms.
pub struct MidiRouter {
    shared: Arc<RouterShared>,
    backend: Arc<dyn MidiBackend>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MidiRouter {
    pub fn new(settings: &RouterSettings, backend: Arc<dyn MidiBackend>) -> Self {
        let (queue_tx, queue_rx) = channel::unbounded();
        Self {
            shared: Arc::new(RouterShared {
                tables: Mutex::new(RoutingTables::default()),
                meter: Mutex::new(ThroughputMeter::new(Instant::now())),
                observers: Registry::new("message observer"),
                queue_tx,
                queue_rx,
                running: AtomicBool::new(false),
                poll_timeout: Duration::from_millis(settings.poll_timeout_ms.max(1)),
            }),
            backend,
            thread_handle: Mutex::new(None),
        }
    }

    /// Registers a port. Output ports open their sink through the backend.
    pub fn add_port(&self, port_id: &str, name: &str, direction: PortDirection) -> Result<()> {
        let mut tables = self.shared.tables();
        if tables.ports.contains_key(port_id) {
            return Err(Error::PortExists(port_id.to_string()));
        }

        let port = match direction {
            PortDirection::Input => MidiPort::input(port_id, name),
            PortDirection::Output => {
                MidiPort::output(port_id, name, self.backend.open_output(port_id, name)?)
            }
        };
        tables.ports.insert(port_id.to_string(), port);
        info!("Added MIDI port: {} ({})", name, direction);
        Ok(())
    }

    /// Removes a port together with every connection that uses it.
    pub fn remove_port(&self, port_id: &str) -> Result<()> {
        let mut tables = self.shared.tables();
        if !tables.ports.contains_key(port_id) {
            return Err(Error::PortNotFound(port_id.to_string()));
        }

        let before = tables.connections.len();
        tables.connections.retain(|c| !c.touches(port_id));
        let removed = before - tables.connections.len();

        if let Some(port) = tables.ports.remove(port_id) {
            info!(
                "Removed MIDI port: {} and {} connection(s)",
                port.name(),
                removed
            );
        }
        Ok(())
    }

    pub fn set_port_connected(&self, port_id: &str, connected: bool) -> Result<()> {
        let mut tables = self.shared.tables();
        let port = tables
            .ports
            .get_mut(port_id)
            .ok_or_else(|| Error::PortNotFound(port_id.to_string()))?;
        port.set_connected(connected);
        Ok(())
    }

    pub fn add_connection(&self, input_port: &str, output_port: &str) -> Result<()> {
        let mut tables = self.shared.tables();
        let checked = tables
            .check_direction(input_port, PortDirection::Input)
            .and_then(|_| tables.check_direction(output_port, PortDirection::Output));
        if let Err(e) = checked {
            error!("Invalid connection {} -> {}: {}", input_port, output_port, e);
            return Err(e);
        }
        if tables.connections.iter().any(|c| c.links(input_port, output_port)) {
            return Err(Error::ConnectionExists(
                input_port.to_string(),
                output_port.to_string(),
            ));
        }

        tables
            .connections
            .push(MidiConnection::new(input_port, output_port));
        info!("Added MIDI connection: {} -> {}", input_port, output_port);
        Ok(())
    }

    pub fn remove_connection(&self, input_port: &str, output_port: &str) -> Result<()> {
        let mut tables = self.shared.tables();
        let index = tables
            .connections
            .iter()
            .position(|c| c.links(input_port, output_port))
            .ok_or_else(|| {
                Error::ConnectionNotFound(input_port.to_string(), output_port.to_string())
            })?;
        tables.connections.remove(index);
        info!("Removed MIDI connection: {} -> {}", input_port, output_port);
        Ok(())
    }

    pub fn set_connection_enabled(
        &self,
        input_port: &str,
        output_port: &str,
        enabled: bool,
    ) -> Result<()> {
        self.shared
            .tables()
            .connection_mut(input_port, output_port)?
            .enabled = enabled;
        debug!(
            "Connection {} -> {} {}",
            input_port,
            output_port,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    /// Appends `filter` to the connection's filter chain.
    pub fn add_filter(&self, input_port: &str, output_port: &str, filter: MidiFilter) -> Result<()> {
        let mut tables = self.shared.tables();
        let connection = tables.connection_mut(input_port, output_port)?;
        info!(
            "Added filter '{}' to connection {} -> {}",
            filter.name, input_port, output_port
        );
        connection.filters.push(filter);
        Ok(())
    }

    /// Appends `transform` to the connection's transform chain.
    pub fn add_transform(
        &self,
        input_port: &str,
        output_port: &str,
        transform: MidiTransform,
    ) -> Result<()> {
        transform.validate()?;
        let mut tables = self.shared.tables();
        let connection = tables.connection_mut(input_port, output_port)?;
        info!(
            "Added transform '{}' to connection {} -> {}",
            transform.name, input_port, output_port
        );
        connection.transforms.push(transform);
        Ok(())
    }

    /// Queues a message received on `input_port` for the worker.
    pub fn submit(&self, input_port: &str, message: MidiMessage) -> Result<()> {
        self.shared
            .tables()
            .check_direction(input_port, PortDirection::Input)?;
        self.shared
            .queue_tx
            .send((message, input_port.to_string()))
            .map_err(|e| Error::Send {
                port: input_port.to_string(),
                reason: e.to_string(),
            })
    }

    /// Routes a message immediately on the calling thread. Returns the number
    /// of connections whose filters let it through.
    pub fn route_message(&self, message: &MidiMessage, input_port: &str) -> usize {
        self.shared.route(message, input_port)
    }

    pub fn register_observer(
        &self,
        name: impl Into<String>,
        observer: Arc<MessageObserver>,
    ) -> SubscriptionId {
        self.shared.observers.register(name, observer)
    }

    pub fn unregister_observer(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unregister(id)
    }

    pub fn ports(&self) -> Vec<PortInfo> {
        self.shared.tables().ports.values().map(MidiPort::info).collect()
    }

    pub fn port(&self, port_id: &str) -> Option<PortInfo> {
        self.shared.tables().ports.get(port_id).map(MidiPort::info)
    }

    pub fn connections(&self) -> Vec<MidiConnection> {
        self.shared.tables().connections.clone()
    }

    pub fn statistics(&self) -> RouterStatistics {
        let meter = {
            let mut meter = self.shared.meter();
            meter.refresh(Instant::now());
            meter.clone()
        };
        let tables = self.shared.tables();
        let input_ports = tables.ports.values().filter(|p| p.is_input()).count();

        RouterStatistics {
            total_ports: tables.ports.len(),
            input_ports,
            output_ports: tables.ports.len() - input_ports,
            total_connections: tables.connections.len(),
            active_connections: tables.connections.iter().filter(|c| c.enabled).count(),
            messages_per_second: meter.messages_per_second(),
            total_messages_processed: meter.processed(),
            queued_messages: self.shared.queue_rx.len(),
        }
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("MIDI router already running");
            return;
        }

        let shared = Arc::clone(&self.shared);
        let handle = thread::spawn(move || shared.run());
        *self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("MIDI router started");
    }

    /// Stops the worker and waits for it to exit. Queued messages stay
    /// queued until the next start.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("MIDI router worker panicked");
            }
        }
        info!("MIDI router stopped");
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for MidiRouter {
    fn drop(&mut self) {
        self.stop();
    }
}
