//! Script engine: a cursor over a compiled command sequence.
//!
//! A [`Script`] is produced by a [`Target`](crate::target::Target) for one
//! executing device and is consumed strictly front to back. The engine never
//! invents commands: it hands out what it was compiled with and then reports
//! the end of the script.

use std::collections::VecDeque;

use thiserror::Error;

use crate::command::ScriptStep;

/// Errors reported when a target cannot produce a script.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// The target carries no script for the requested device.
    #[error("Target {target} has no script for device {device}")]
    NotFound { target: i32, device: String },

    /// The script template exists but contains no commands.
    #[error("Script for device {device} is empty")]
    Empty { device: String },
}

/// Result type for script compilation.
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Compiled, steppable command sequence for one (target, device) pair.
#[derive(Debug, Clone)]
pub struct Script {
    /// Device the script was compiled for
    device: String,
    /// Steps not yet handed out
    remaining: VecDeque<ScriptStep>,
    /// Number of steps handed out so far
    issued: usize,
}

impl Script {
    /// Build a script for `device` from an ordered list of steps.
    pub fn new(device: impl Into<String>, steps: Vec<ScriptStep>) -> Self {
        Self {
            device: device.into(),
            remaining: steps.into(),
            issued: 0,
        }
    }

    /// Device this script executes on.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Advance the cursor and return the next step.
    ///
    /// Returns `None` once the script is exhausted; further calls keep
    /// returning `None`.
    pub fn next_command(&mut self) -> Option<ScriptStep> {
        let step = self.remaining.pop_front()?;
        self.issued += 1;
        Some(step)
    }

    /// True when the next [`next_command`](Self::next_command) call ends the
    /// script, i.e. the step most recently handed out was the final one.
    pub fn is_last_command(&self) -> bool {
        self.remaining.is_empty()
    }

    /// True if `step` addresses the device this script runs on.
    pub fn is_local(&self, step: &ScriptStep) -> bool {
        step.device == self.device
    }

    /// Number of steps handed out so far.
    pub fn issued(&self) -> usize {
        self.issued
    }

    /// Number of steps still to be handed out.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}
