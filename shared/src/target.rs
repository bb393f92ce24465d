//! Target capability consumed by device clients.
//!
//! Targets are owned by whoever schedules them (a database-backed target
//! list in production, a [`FixedTarget`] in the simulator and tests). Device
//! clients hold a shared reference for the duration of one observation
//! attempt and only ever talk to the target through this trait.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::command::ScriptStep;
use crate::coords::Equatorial;
use crate::script::{Script, ScriptError, ScriptResult};

/// What the mount has to do before an observation can start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ObservationStart {
    /// Slew to the given position first
    MoveNeeded(Equatorial),
    /// Already on target (or tracking resumed); observe immediately
    NoMoveNeeded,
}

/// An astronomical pointing together with its per-device scripts.
///
/// Methods take `&self`: a target is shared between every device client
/// involved in the observation, so implementations keep their bookkeeping
/// in interior-mutable cells.
pub trait Target {
    /// Database identifier
    fn id(&self) -> i32;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Compile the script this target runs on `device`.
    fn compile_script(&self, device: &str) -> ScriptResult<Script>;

    /// Hook called by the telescope client before it computes a slew.
    fn before_move(&self);

    /// Start an observation given the mount's current pointing.
    fn start_observation(&self, current: Equatorial) -> ObservationStart;

    /// Where the target is right now.
    fn position(&self) -> Equatorial;

    /// Identifier of the observation currently in progress.
    fn obs_id(&self) -> i32;

    /// Allocate the next image number within the current observation.
    fn next_img_id(&self) -> i32;
}

/// Shared handle to a target, as carried by events.
pub type TargetRef = Rc<dyn Target>;

impl fmt::Debug for dyn Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Target #{} ({})", self.id(), self.name())
    }
}

/// Sidereal target at fixed J2000 coordinates.
#[derive(Debug)]
pub struct FixedTarget {
    id: i32,
    name: String,
    position: Equatorial,
    /// Pointing closer than this (degrees) counts as already on target
    tolerance: f64,
    scripts: HashMap<String, Vec<ScriptStep>>,
    move_count: Cell<u32>,
    obs_id: Cell<i32>,
    img_id: Cell<i32>,
}

impl FixedTarget {
    /// Default on-target tolerance: one arcminute.
    pub const DEFAULT_TOLERANCE: f64 = 1.0 / 60.0;

    pub fn new(id: i32, name: impl Into<String>, position: Equatorial) -> Self {
        Self {
            id,
            name: name.into(),
            position,
            tolerance: Self::DEFAULT_TOLERANCE,
            scripts: HashMap::new(),
            move_count: Cell::new(0),
            obs_id: Cell::new(0),
            img_id: Cell::new(0),
        }
    }

    /// Set the on-target tolerance in degrees.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Attach the script template for `device`.
    pub fn with_script(mut self, device: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        self.scripts.insert(device.into(), steps);
        self
    }

    /// Number of times a telescope prepared to move to this target.
    pub fn move_count(&self) -> u32 {
        self.move_count.get()
    }
}

impl Target for FixedTarget {
    fn id(&self) -> i32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn compile_script(&self, device: &str) -> ScriptResult<Script> {
        let steps = self
            .scripts
            .get(device)
            .ok_or_else(|| ScriptError::NotFound {
                target: self.id,
                device: device.to_string(),
            })?;

        if steps.is_empty() {
            return Err(ScriptError::Empty {
                device: device.to_string(),
            });
        }

        Ok(Script::new(device, steps.clone()))
    }

    fn before_move(&self) {
        self.move_count.set(self.move_count.get() + 1);
    }

    fn start_observation(&self, current: Equatorial) -> ObservationStart {
        self.obs_id.set(self.obs_id.get() + 1);
        self.img_id.set(0);

        if current.separation(&self.position) <= self.tolerance {
            ObservationStart::NoMoveNeeded
        } else {
            ObservationStart::MoveNeeded(self.position)
        }
    }

    fn position(&self) -> Equatorial {
        self.position
    }

    fn obs_id(&self) -> i32 {
        self.obs_id.get()
    }

    fn next_img_id(&self) -> i32 {
        let next = self.img_id.get() + 1;
        self.img_id.set(next);
        next
    }
}
