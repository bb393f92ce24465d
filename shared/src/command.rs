//! Device-directed commands issued by scripts and device clients.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::coords::Equatorial;

/// One instruction for a single device.
///
/// Ownership passes to the device's command queue when enqueued; the issuing
/// client keeps nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Take an exposure (`light = false` keeps the shutter closed)
    Expose { exposure: Duration, light: bool },
    /// Dark frame of the given length
    Dark { exposure: Duration },
    /// Select a filter wheel slot
    Filter { filter: u32 },
    /// Slew the mount to a position
    Move { target: Equatorial },
    /// Relative focuser move in motor steps
    Focus { steps: i32 },
    /// Hand a finished image to a processor
    QueueImage { image: String },
}

impl Command {
    /// Short opcode used in logs.
    pub fn opcode(&self) -> &'static str {
        match self {
            Command::Expose { .. } => "expose",
            Command::Dark { .. } => "dark",
            Command::Filter { .. } => "filter",
            Command::Move { .. } => "move",
            Command::Focus { .. } => "focus",
            Command::QueueImage { .. } => "que_image",
        }
    }

    /// True for commands that read the sensor and end with a readout.
    pub fn is_exposure(&self) -> bool {
        matches!(self, Command::Expose { .. } | Command::Dark { .. })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Command::Expose { exposure, light } => write!(
                f,
                "expose {:.3}s{}",
                exposure.as_secs_f64(),
                if *light { "" } else { " (shutter closed)" }
            ),
            Command::Dark { exposure } => write!(f, "dark {:.3}s", exposure.as_secs_f64()),
            Command::Filter { filter } => write!(f, "filter {filter}"),
            Command::Move { target } => write!(f, "move {target}"),
            Command::Focus { steps } => write!(f, "focus {steps:+}"),
            Command::QueueImage { image } => write!(f, "que_image {image}"),
        }
    }
}

/// A script entry: a command plus the name of the device it addresses.
///
/// A script compiled for one device may still contain steps for other
/// devices (a filter change in the middle of a camera sequence, say).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptStep {
    pub device: String,
    pub command: Command,
}

impl ScriptStep {
    pub fn new(device: impl Into<String>, command: Command) -> Self {
        Self {
            device: device.into(),
            command,
        }
    }
}
