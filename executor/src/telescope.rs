//! Telescope exec client: owns the move/point half of the protocol.
//!
//! The mount is the authoritative target owner. On `SetTarget` it asks the
//! target whether a slew is needed; if not it announces `Observe` at once,
//! otherwise it polls the bus with `MoveQuestion` and slews only when no
//! client answers `DontMove`. A vetoed slew is parked and retried when a
//! camera reports `LastReadout` or `ScriptEnded`.
//!
//! Slew failures are reported as `MoveFailed` and never retried here; what
//! to do with the target is the scheduler's decision.

use std::any::Any;
use std::rc::Rc;

use shared::{Command, Equatorial, Event, ObservationStart, TargetRef, TelescopeInfo};
use tracing::{debug, info, warn};

use crate::bus::{BusContext, DeviceCallback, DeviceClient};
use crate::connection::{Connection, ConnectionRegistry, DeviceValue, RoutingError};

/// Coarse state of a telescope client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TelescopeState {
    Idle,
    /// Slew commanded, waiting for the mount
    Moving,
    /// On target, observation announced
    Observing,
}

/// Telescope-side exec client.
pub struct TelescopeExecClient {
    name: String,
    connection: Rc<Connection>,
    current_target: Option<TargetRef>,
    block_move: bool,
    /// Slew vetoed by another client, retried when exposures finish
    pending_move: Option<Equatorial>,
    /// Target replaced while a slew was in flight; planned again on arrival
    retarget: bool,
    state: TelescopeState,
    info: TelescopeInfo,
}

impl TelescopeExecClient {
    /// Create a client for mount `name`, which must be in `registry`.
    pub fn new(name: &str, registry: &ConnectionRegistry) -> Result<Self, RoutingError> {
        let connection = registry.route(name)?;
        Ok(Self {
            name: name.to_string(),
            connection,
            current_target: None,
            block_move: false,
            pending_move: None,
            retarget: false,
            state: TelescopeState::Idle,
            info: TelescopeInfo::default(),
        })
    }

    pub fn state(&self) -> TelescopeState {
        self.state
    }

    pub fn current_target(&self) -> Option<&TargetRef> {
        self.current_target.as_ref()
    }

    pub fn block_move(&self) -> bool {
        self.block_move
    }

    /// Slew waiting for the move veto to lift.
    pub fn pending_move(&self) -> Option<Equatorial> {
        self.pending_move
    }

    /// Last mount status received.
    pub fn info(&self) -> &TelescopeInfo {
        &self.info
    }

    /// Current pointing: reported values first, last status otherwise.
    fn pointing(&self) -> Equatorial {
        self.connection.pointing().unwrap_or(self.info.position)
    }

    fn set_target(&mut self, target: &TargetRef, bus: &mut BusContext<'_>) {
        self.current_target = Some(target.clone());
        self.pending_move = None;

        if self.state == TelescopeState::Moving {
            // Pointing is unknown until the mount stops
            info!(telescope = %self.name, target = target.id(), "slew in progress, target deferred");
            self.retarget = true;
            return;
        }
        self.retarget = false;

        target.before_move();
        match target.start_observation(self.pointing()) {
            ObservationStart::NoMoveNeeded => {
                info!(telescope = %self.name, target = target.id(), "on target, no move needed");
                self.state = TelescopeState::Observing;
                bus.publish(Event::Observe);
            }
            ObservationStart::MoveNeeded(pos) => self.request_move(pos, bus),
        }
    }

    /// Slew to `pos` unless another client vetoes the move.
    fn request_move(&mut self, pos: Equatorial, bus: &mut BusContext<'_>) {
        let answers = bus.ask(Event::MoveQuestion);
        if answers.iter().any(|e| matches!(e, Event::DontMove)) {
            info!(telescope = %self.name, target = %pos, "move vetoed, waiting for readout");
            self.pending_move = Some(pos);
            return;
        }

        info!(
            telescope = %self.name,
            target = %pos,
            hour_angle = self.info.hour_angle(&pos),
            "slewing"
        );
        self.pending_move = None;
        self.block_move = true;
        self.state = TelescopeState::Moving;
        self.connection.enqueue(Command::Move { target: pos });
    }

    fn retry_pending_move(&mut self, bus: &mut BusContext<'_>) {
        if let Some(pos) = self.pending_move {
            debug!(telescope = %self.name, "retrying vetoed move");
            self.request_move(pos, bus);
        }
    }

    fn move_end(&mut self, bus: &mut BusContext<'_>) {
        self.block_move = false;
        if let Some(pos) = self.connection.pointing() {
            self.info.position = pos;
        }

        if self.replan(bus) {
            return;
        }

        if self.current_target.is_none() {
            // Killed while slewing
            debug!(telescope = %self.name, "move ended without target");
            self.state = TelescopeState::Idle;
            return;
        }
        self.state = TelescopeState::Observing;
        bus.publish(Event::Observe);
    }

    fn move_failed(&mut self, status: i32, bus: &mut BusContext<'_>) {
        warn!(telescope = %self.name, status, "move failed");
        self.block_move = false;

        // The failed slew belonged to a target already replaced
        if self.replan(bus) {
            return;
        }
        self.state = TelescopeState::Idle;
        self.current_target = None;
        bus.publish(Event::MoveFailed { status });
    }

    /// Plan the target that arrived during the slew that just stopped.
    fn replan(&mut self, bus: &mut BusContext<'_>) -> bool {
        if !std::mem::take(&mut self.retarget) {
            return false;
        }
        self.state = TelescopeState::Idle;
        match self.current_target.clone() {
            Some(target) => self.set_target(&target, bus),
            None => debug!(telescope = %self.name, "deferred target killed"),
        }
        true
    }

    fn info_update(&mut self, info: TelescopeInfo) {
        self.connection.set_pointing(info.position);
        self.connection
            .set_value("type", DeviceValue::Text(info.mount_type.clone()));
        self.info = info;
    }
}

impl DeviceClient for TelescopeExecClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_event(&mut self, event: &Event, bus: &mut BusContext<'_>) {
        match event {
            Event::SetTarget(target) => self.set_target(target, bus),
            Event::MoveQuestion => {
                if self.block_move {
                    bus.publish(Event::DontMove);
                }
            }
            Event::LastReadout { .. } | Event::ScriptEnded { .. } => self.retry_pending_move(bus),
            Event::KillAll => {
                self.pending_move = None;
                self.current_target = None;
                self.retarget = false;
                if self.state == TelescopeState::Observing {
                    self.state = TelescopeState::Idle;
                }
            }
            Event::Observe
            | Event::DontMove
            | Event::ScriptStarted { .. }
            | Event::MoveFailed { .. } => {}
        }
    }

    fn on_callback(&mut self, callback: DeviceCallback, bus: &mut BusContext<'_>) {
        match callback {
            DeviceCallback::MoveEnd => self.move_end(bus),
            DeviceCallback::MoveFailed { status } => self.move_failed(status, bus),
            DeviceCallback::InfoUpdate(info) => self.info_update(*info),
            DeviceCallback::ExposureStarted { .. }
            | DeviceCallback::ExposureEnd
            | DeviceCallback::ReadoutEnd
            | DeviceCallback::ImageReady
            | DeviceCallback::CommandOk => {
                debug!(telescope = %self.name, ?callback, "ignored");
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
