//! Device connections and the registry that names them.
//!
//! A [`Connection`] is the executor's handle on one piece of hardware: a FIFO
//! of outbound commands, the device's reported state bits, and the named
//! values the device publishes (`que_size` for image processors, `ra`/`dec`
//! for mounts). The [`ConnectionRegistry`] maps device names to connections;
//! it is built once by the orchestrating process and handed to every device
//! client that needs to reach another device.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use bitflags::bitflags;
use shared::config_storage::ExecConfig;
use shared::{Command, DeviceKind, Equatorial};
use thiserror::Error;
use tracing::debug;

/// Value name under which image processors report their pending queue depth.
pub const QUE_SIZE: &str = "que_size";

/// Value names under which mounts report their pointing, in degrees.
pub const RA: &str = "ra";
pub const DEC: &str = "dec";

bitflags! {
    /// Activity bits reported by a device.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeviceState: u32 {
        /// Shutter open / integrating
        const EXPOSING = 1 << 0;
        /// Sensor readout in progress
        const READING = 1 << 1;
        /// Mount or focuser in motion
        const MOVING = 1 << 2;
        /// Executing some other command
        const BUSY = 1 << 3;
    }
}

impl DeviceState {
    /// True when no exposure or readout is in progress.
    pub fn is_exposure_idle(&self) -> bool {
        !self.intersects(DeviceState::EXPOSING | DeviceState::READING)
    }
}

/// A named value reported by a device.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceValue {
    Integer(i64),
    Double(f64),
    Text(String),
}

/// Errors raised when a device name cannot be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// No connection or client carries this name.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A connection or client with this name already exists.
    #[error("Device {0} registered twice")]
    DuplicateDevice(String),
}

/// Handle on one device: outbound command FIFO plus reported state.
#[derive(Debug)]
pub struct Connection {
    name: String,
    kind: DeviceKind,
    queue: RefCell<VecDeque<Command>>,
    state: Cell<DeviceState>,
    values: RefCell<HashMap<String, DeviceValue>>,
}

impl Connection {
    pub fn new(name: impl Into<String>, kind: DeviceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            queue: RefCell::new(VecDeque::new()),
            state: Cell::new(DeviceState::empty()),
            values: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Append a command to the device queue. The queue owns it from here.
    pub fn enqueue(&self, command: Command) {
        debug!(device = %self.name, %command, "enqueue");
        self.queue.borrow_mut().push_back(command);
    }

    /// Take the oldest queued command; called by whatever drives the device.
    pub fn pop_command(&self) -> Option<Command> {
        self.queue.borrow_mut().pop_front()
    }

    /// Number of commands waiting to be sent to the device.
    pub fn queue_depth(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Snapshot of the queued commands, oldest first.
    pub fn queued(&self) -> Vec<Command> {
        self.queue.borrow().iter().cloned().collect()
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn set_state(&self, state: DeviceState) {
        self.state.set(state);
    }

    pub fn insert_state(&self, bits: DeviceState) {
        self.state.set(self.state.get() | bits);
    }

    pub fn remove_state(&self, bits: DeviceState) {
        self.state.set(self.state.get() - bits);
    }

    pub fn set_value(&self, name: &str, value: DeviceValue) {
        self.values.borrow_mut().insert(name.to_string(), value);
    }

    pub fn value(&self, name: &str) -> Option<DeviceValue> {
        self.values.borrow().get(name).cloned()
    }

    pub fn value_integer(&self, name: &str) -> Option<i64> {
        match self.values.borrow().get(name) {
            Some(DeviceValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn value_double(&self, name: &str) -> Option<f64> {
        match self.values.borrow().get(name) {
            Some(DeviceValue::Double(v)) => Some(*v),
            Some(DeviceValue::Integer(v)) => Some(*v as f64),
            _ => None,
        }
    }

    /// Pending processing queue depth, if this device reports one.
    pub fn que_size(&self) -> Option<i64> {
        self.value_integer(QUE_SIZE)
    }

    /// Pointing reported by a mount.
    pub fn pointing(&self) -> Option<Equatorial> {
        Some(Equatorial::new(self.value_double(RA)?, self.value_double(DEC)?))
    }

    /// Record a mount's pointing as reported values.
    pub fn set_pointing(&self, pos: Equatorial) {
        self.set_value(RA, DeviceValue::Double(pos.ra));
        self.set_value(DEC, DeviceValue::Double(pos.dec));
    }
}

/// Name → connection map, in registration order.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Rc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open one connection per configured device.
    pub fn from_config(config: &ExecConfig) -> Result<Self, RoutingError> {
        let mut registry = Self::new();
        for device in &config.devices {
            registry.add(&device.name, device.kind)?;
        }
        Ok(registry)
    }

    /// Register a new device connection.
    pub fn add(&mut self, name: &str, kind: DeviceKind) -> Result<Rc<Connection>, RoutingError> {
        if self.get(name).is_some() {
            return Err(RoutingError::DuplicateDevice(name.to_string()));
        }
        let conn = Rc::new(Connection::new(name, kind));
        self.connections.push(conn.clone());
        Ok(conn)
    }

    pub fn get(&self, name: &str) -> Option<Rc<Connection>> {
        self.connections.iter().find(|c| c.name() == name).cloned()
    }

    /// Resolve a device name or report a routing failure.
    pub fn route(&self, name: &str) -> Result<Rc<Connection>, RoutingError> {
        self.get(name)
            .ok_or_else(|| RoutingError::UnknownDevice(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<Connection>> {
        self.connections.iter()
    }

    pub fn of_kind(&self, kind: DeviceKind) -> impl Iterator<Item = &Rc<Connection>> {
        self.connections.iter().filter(move |c| c.kind() == kind)
    }

    /// Connection reporting the smallest non-negative `que_size`.
    ///
    /// Ties go to the connection registered first. Connections that report
    /// no queue depth, or a negative one, are not candidates.
    pub fn least_loaded(&self) -> Option<Rc<Connection>> {
        let mut best: Option<(&Rc<Connection>, i64)> = None;
        for conn in &self.connections {
            let Some(depth) = conn.que_size() else {
                continue;
            };
            if depth < 0 {
                continue;
            }
            if best.map_or(true, |(_, lowest)| depth < lowest) {
                best = Some((conn, depth));
            }
        }
        best.map(|(conn, _)| conn.clone())
    }
}
