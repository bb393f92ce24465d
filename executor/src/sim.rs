//! Simulated devices driving the executor without hardware.
//!
//! [`SimulatedRig`] plays the part of every device behind the registry: each
//! [`SimulatedRig::step`] takes the oldest queued command from every
//! connection and answers it with the callbacks real hardware would send.
//! Time is simulated; exposures advance the rig's clock instead of sleeping.

use std::time::Duration;

use chrono::{DateTime, Utc};
use shared::config_storage::ExecConfig;
use shared::{Command, DeviceKind, Equatorial, TelescopeInfo};
use tracing::{debug, info, warn};

use crate::bus::{DeviceCallback, Dispatch, EventBus};
use crate::connection::{
    Connection, ConnectionRegistry, DeviceState, DeviceValue, RoutingError, QUE_SIZE,
};

/// Status reported for a slew below the declination limit.
pub const MOVE_BELOW_LIMIT: i32 = -1;

/// Counters kept by the simulator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RigStats {
    pub exposures: usize,
    pub slews: usize,
    pub failed_slews: usize,
    pub images_processed: usize,
    pub other_commands: usize,
}

/// Simulated mount, cameras, and image processors.
#[derive(Debug)]
pub struct SimulatedRig {
    /// Slews to targets below this declination fail
    dec_limit: f64,
    readout: Duration,
    clock: DateTime<Utc>,
    stats: RigStats,
}

impl SimulatedRig {
    pub fn new(dec_limit: f64) -> Self {
        Self {
            dec_limit,
            readout: Duration::from_millis(50),
            clock: Utc::now(),
            stats: RigStats::default(),
        }
    }

    pub fn from_config(config: &ExecConfig) -> Self {
        Self::new(config.sim_dec_limit_deg).with_readout(Duration::from_millis(config.sim_readout_ms))
    }

    pub fn with_readout(mut self, readout: Duration) -> Self {
        self.readout = readout;
        self
    }

    pub fn stats(&self) -> &RigStats {
        &self.stats
    }

    /// Simulated time.
    pub fn clock(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Put every device in its power-on state: processors empty, mounts parked
    /// at the celestial equator.
    pub fn power_on(&self, registry: &ConnectionRegistry) {
        for conn in registry.of_kind(DeviceKind::ImageProcessor) {
            conn.set_value(QUE_SIZE, DeviceValue::Integer(0));
        }
        for conn in registry.of_kind(DeviceKind::Telescope) {
            conn.set_pointing(Equatorial::new(0.0, 0.0));
        }
    }

    /// True when no connection has a queued command.
    pub fn is_idle(&self, registry: &ConnectionRegistry) -> bool {
        registry.iter().all(|c| c.queue_depth() == 0)
    }

    /// Execute one queued command on every device that has one.
    ///
    /// Returns `None` when nothing was queued, otherwise every event the
    /// resulting callbacks caused.
    pub fn step(
        &mut self,
        bus: &mut EventBus,
        registry: &ConnectionRegistry,
    ) -> Result<Option<Dispatch>, RoutingError> {
        let work: Vec<_> = registry
            .iter()
            .filter_map(|conn| conn.pop_command().map(|cmd| (conn.clone(), cmd)))
            .collect();
        if work.is_empty() {
            return Ok(None);
        }

        let mut dispatch = Dispatch::default();
        for (conn, command) in work {
            dispatch.extend(self.execute(bus, &conn, command)?);
        }
        Ok(Some(dispatch))
    }

    /// Step until every queue is empty or `max_steps` is reached; returns the
    /// number of steps taken.
    pub fn run_until_idle(
        &mut self,
        bus: &mut EventBus,
        registry: &ConnectionRegistry,
        max_steps: usize,
    ) -> Result<usize, RoutingError> {
        for taken in 0..max_steps {
            if self.step(bus, registry)?.is_none() {
                return Ok(taken);
            }
        }
        warn!(max_steps, "simulation still busy after step limit");
        Ok(max_steps)
    }

    fn execute(
        &mut self,
        bus: &mut EventBus,
        conn: &Connection,
        command: Command,
    ) -> Result<Dispatch, RoutingError> {
        let device = conn.name();
        let mut dispatch = Dispatch::default();

        match (conn.kind(), command) {
            (DeviceKind::Camera, command) if command.is_exposure() => {
                let exposure = match command {
                    Command::Expose { exposure, .. } | Command::Dark { exposure } => exposure,
                    _ => Duration::ZERO,
                };
                self.stats.exposures += 1;

                conn.insert_state(DeviceState::EXPOSING);
                dispatch.extend(bus.callback(device, DeviceCallback::ExposureStarted { start: self.clock })?);
                self.advance(exposure);

                conn.remove_state(DeviceState::EXPOSING);
                conn.insert_state(DeviceState::READING);
                dispatch.extend(bus.callback(device, DeviceCallback::ExposureEnd)?);
                self.advance(self.readout);

                conn.remove_state(DeviceState::READING);
                dispatch.extend(bus.callback(device, DeviceCallback::ReadoutEnd)?);
                dispatch.extend(bus.callback(device, DeviceCallback::ImageReady)?);
            }
            (DeviceKind::Camera, command) => {
                debug!(device, %command, "camera command done");
                self.stats.other_commands += 1;
                dispatch.extend(bus.callback(device, DeviceCallback::CommandOk)?);
            }
            (DeviceKind::Telescope, Command::Move { target }) => {
                if target.dec < self.dec_limit {
                    info!(device, %target, limit = self.dec_limit, "slew below limit refused");
                    self.stats.failed_slews += 1;
                    return bus.callback(device, DeviceCallback::MoveFailed { status: MOVE_BELOW_LIMIT });
                }

                self.stats.slews += 1;
                conn.set_pointing(target);
                let info = TelescopeInfo {
                    mount_type: "SIM".to_string(),
                    position: target,
                    ..Default::default()
                };
                dispatch.extend(bus.callback(device, DeviceCallback::InfoUpdate(Box::new(info)))?);
                dispatch.extend(bus.callback(device, DeviceCallback::MoveEnd)?);
            }
            (DeviceKind::ImageProcessor, Command::QueueImage { image }) => {
                debug!(device, %image, "image processed");
                self.stats.images_processed += 1;
                conn.set_value(QUE_SIZE, DeviceValue::Integer(conn.queue_depth() as i64));
            }
            (_, command) => {
                debug!(device, %command, "command done");
                self.stats.other_commands += 1;
            }
        }
        Ok(dispatch)
    }

    fn advance(&mut self, by: Duration) {
        self.clock += chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraExecClient;
    use crate::telescope::TelescopeExecClient;
    use shared::{Event, EventKind, FixedTarget, ScriptStep};
    use std::rc::Rc;

    fn rig() -> (SimulatedRig, EventBus, Rc<ConnectionRegistry>) {
        let registry = Rc::new(ConnectionRegistry::from_config(&ExecConfig::default()).unwrap());
        let sim = SimulatedRig::new(-30.0);
        sim.power_on(&registry);

        let mut bus = EventBus::new();
        bus.register(Box::new(TelescopeExecClient::new("T0", &registry).unwrap()))
            .unwrap();
        bus.register(Box::new(CameraExecClient::new("C0", registry.clone()).unwrap()))
            .unwrap();
        (sim, bus, registry)
    }

    fn target(id: i32, pos: Equatorial, exposures: usize) -> Rc<FixedTarget> {
        let mut steps = vec![ScriptStep::new("W0", Command::Filter { filter: 2 })];
        steps.extend((0..exposures).map(|_| {
            ScriptStep::new(
                "C0",
                Command::Expose {
                    exposure: Duration::from_secs(30),
                    light: true,
                },
            )
        }));
        Rc::new(FixedTarget::new(id, format!("sim{id}"), pos).with_script("C0", steps))
    }

    #[test]
    fn test_idle_rig_does_nothing() {
        let (mut sim, mut bus, registry) = rig();
        assert!(sim.is_idle(&registry));
        assert!(sim.step(&mut bus, &registry).unwrap().is_none());
        assert_eq!(sim.run_until_idle(&mut bus, &registry, 10).unwrap(), 0);
    }

    #[test]
    fn test_full_observation() {
        let (mut sim, mut bus, registry) = rig();
        let start = sim.clock();
        bus.publish(Event::SetTarget(target(1, Equatorial::new(150.0, 20.0), 3)));
        sim.run_until_idle(&mut bus, &registry, 100).unwrap();

        let stats = sim.stats();
        assert_eq!(stats.slews, 1);
        assert_eq!(stats.exposures, 3);
        assert_eq!(stats.images_processed, 3);
        assert_eq!(stats.other_commands, 1);

        let elapsed = (sim.clock() - start).num_milliseconds() as f64 / 1000.0;
        approx::assert_relative_eq!(elapsed, 3.0 * 30.05, epsilon = 1e-6);

        let cam = bus.client::<CameraExecClient>("C0").unwrap();
        assert!(cam.script().is_none());
        assert!(!cam.block_move());
    }

    #[test]
    fn test_slew_below_limit_fails() {
        let (mut sim, mut bus, registry) = rig();
        bus.publish(Event::SetTarget(target(2, Equatorial::new(10.0, -60.0), 1)));

        let dispatch = sim.step(&mut bus, &registry).unwrap().unwrap();
        assert_eq!(dispatch.kinds(), vec![EventKind::MoveFailed]);
        assert_eq!(sim.stats().failed_slews, 1);
        assert!(sim.is_idle(&registry));
        assert_eq!(
            registry.get("T0").unwrap().pointing(),
            Some(Equatorial::new(0.0, 0.0))
        );
    }
}
