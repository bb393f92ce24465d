//! Camera exec client: runs a target's script through the exposure cycle.
//!
//! The camera client is a follower. It learns its target from `SetTarget`,
//! waits for the mount's `Observe`, then steps the target's script one
//! command per completion callback. While a script is stepping it holds
//! `block_move` and answers every `MoveQuestion` with `DontMove`.
//!
//! Targets are handed off, never preempted: a `SetTarget` arriving while a
//! script runs is staged as the next target, and an `Observe` arriving while
//! a script runs is remembered and acted on as soon as the script ends.

use std::any::Any;
use std::collections::VecDeque;
use std::rc::Rc;

use chrono::{DateTime, Utc};
use shared::{Command, Event, Script, TargetRef};
use tracing::{debug, info, warn};

use crate::bus::{BusContext, DeviceCallback, DeviceClient};
use crate::connection::{Connection, ConnectionRegistry, RoutingError};
use crate::image::ImageRecord;

/// Default number of images kept while no processor accepts work.
pub const DEFAULT_IMAGE_BACKLOG: usize = 64;

/// Coarse state of a camera client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum CameraState {
    /// No script
    Idle,
    /// Stepping a script
    ScriptActive,
}

/// Camera-side exec client.
pub struct CameraExecClient {
    name: String,
    connection: Rc<Connection>,
    registry: Rc<ConnectionRegistry>,
    current_target: Option<TargetRef>,
    next_target: Option<TargetRef>,
    script: Option<Script>,
    block_move: bool,
    /// `Observe` arrived while a script was running
    observe_start: bool,
    /// Exposures started by the running script
    exposure_count: u32,
    /// Exposures started whose images are not written yet, oldest first
    in_flight: VecDeque<ImageRecord>,
    /// Finished images waiting for a processor
    unprocessed: VecDeque<ImageRecord>,
    backlog_limit: usize,
    dropped_images: usize,
}

impl CameraExecClient {
    /// Create a client for camera `name`, which must be in `registry`.
    pub fn new(name: &str, registry: Rc<ConnectionRegistry>) -> Result<Self, RoutingError> {
        let connection = registry.route(name)?;
        Ok(Self {
            name: name.to_string(),
            connection,
            registry,
            current_target: None,
            next_target: None,
            script: None,
            block_move: false,
            observe_start: false,
            exposure_count: 0,
            in_flight: VecDeque::new(),
            unprocessed: VecDeque::new(),
            backlog_limit: DEFAULT_IMAGE_BACKLOG,
            dropped_images: 0,
        })
    }

    /// Set how many unprocessed images are kept before the oldest is dropped.
    pub fn with_image_backlog(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    pub fn state(&self) -> CameraState {
        if self.script.is_some() {
            CameraState::ScriptActive
        } else {
            CameraState::Idle
        }
    }

    pub fn current_target(&self) -> Option<&TargetRef> {
        self.current_target.as_ref()
    }

    pub fn next_target(&self) -> Option<&TargetRef> {
        self.next_target.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn block_move(&self) -> bool {
        self.block_move
    }

    /// True while an `Observe` is waiting for the running script to end.
    pub fn observe_pending(&self) -> bool {
        self.observe_start
    }

    pub fn exposure_count(&self) -> u32 {
        self.exposure_count
    }

    /// Images held back because no processor reported a queue.
    pub fn unprocessed_images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.unprocessed.iter()
    }

    /// Images discarded after the backlog overflowed.
    pub fn dropped_images(&self) -> usize {
        self.dropped_images
    }

    fn set_target(&mut self, target: &TargetRef) {
        if self.script.is_some() {
            debug!(camera = %self.name, target = target.id(), "script running, target staged");
            self.next_target = Some(target.clone());
        } else {
            self.current_target = Some(target.clone());
            self.next_target = None;
        }
    }

    fn start_target(&mut self, bus: &mut BusContext<'_>) {
        if self.current_target.is_none() {
            self.current_target = self.next_target.take();
        }
        let Some(target) = self.current_target.clone() else {
            debug!(camera = %self.name, "observe without target");
            return;
        };

        let script = match target.compile_script(&self.name) {
            Ok(script) => script,
            Err(e) => {
                warn!(camera = %self.name, target = target.id(), "cannot start target: {e}");
                self.current_target = None;
                return;
            }
        };

        info!(
            camera = %self.name,
            target = target.id(),
            name = target.name(),
            steps = script.remaining(),
            "script started"
        );
        self.script = Some(script);
        self.exposure_count = 0;
        self.block_move = true;
        bus.publish(Event::ScriptStarted {
            device: self.name.clone(),
        });

        // Mid-exposure: the first command goes out after readout ends
        if self.connection.state().is_exposure_idle() {
            self.next_command(bus);
        }
    }

    fn next_command(&mut self, bus: &mut BusContext<'_>) {
        loop {
            let Some(script) = self.script.as_mut() else {
                return;
            };

            let Some(step) = script.next_command() else {
                self.delete_script(bus);
                if self.observe_start {
                    self.observe_start = false;
                    self.start_target(bus);
                }
                return;
            };

            self.block_move = true;
            if script.is_local(&step) {
                self.connection.enqueue(step.command);
                return;
            }

            match self.registry.route(&step.device) {
                Ok(remote) => {
                    debug!(camera = %self.name, device = %step.device, command = %step.command, "forwarding");
                    remote.enqueue(step.command);
                }
                Err(e) => {
                    warn!(camera = %self.name, command = %step.command, "routing failure, command dropped: {e}");
                    // A dropped command never completes; only an exposure in
                    // progress still owes us a callback to resume on.
                    if !self.connection.state().is_exposure_idle() {
                        return;
                    }
                }
            }
        }
    }

    fn delete_script(&mut self, bus: &mut BusContext<'_>) {
        self.block_move = false;
        if let Some(script) = self.script.take() {
            info!(camera = %self.name, issued = script.issued(), "script ended");
            bus.publish(Event::ScriptEnded {
                device: self.name.clone(),
            });
        }
        self.current_target = None;
    }

    fn exposure_started(&mut self, start: DateTime<Utc>) {
        let image = match (&self.script, &self.current_target) {
            (Some(_), Some(target)) => {
                self.block_move = true;
                self.exposure_count += 1;
                ImageRecord::for_target(&self.name, target, self.exposure_count, start)
            }
            (None, Some(target)) => ImageRecord::for_target(&self.name, target, 0, start),
            (_, None) => {
                warn!(camera = %self.name, "exposure without target");
                ImageRecord::without_target(&self.name, start)
            }
        };
        self.in_flight.push_back(image);
    }

    fn exposure_end(&mut self, bus: &mut BusContext<'_>) {
        let last = self.script.as_ref().map_or(true, Script::is_last_command);
        if last {
            self.block_move = false;
            bus.publish(Event::LastReadout {
                device: self.name.clone(),
            });
        }
    }

    fn image_ready(&mut self) {
        let Some(image) = self.in_flight.pop_front() else {
            debug!(camera = %self.name, "image ready without a started exposure");
            return;
        };
        self.process_image(image);
    }

    /// Send a finished image to the least loaded processor.
    fn process_image(&mut self, image: ImageRecord) {
        let Some(processor) = self.registry.least_loaded() else {
            warn!(
                camera = %self.name,
                image = %image.file_name(),
                backlog = self.unprocessed.len() + 1,
                "no image processor available, holding image"
            );
            self.unprocessed.push_back(image);
            while self.unprocessed.len() > self.backlog_limit {
                if let Some(old) = self.unprocessed.pop_front() {
                    warn!(camera = %self.name, image = %old.file_name(), "image backlog full, dropping");
                    self.dropped_images += 1;
                }
            }
            return;
        };

        for held in self.unprocessed.drain(..) {
            processor.enqueue(Command::QueueImage {
                image: held.file_name(),
            });
        }
        debug!(camera = %self.name, processor = %processor.name(), "queueing image");
        processor.enqueue(Command::QueueImage {
            image: image.file_name(),
        });
    }
}

impl DeviceClient for CameraExecClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn post_event(&mut self, event: &Event, bus: &mut BusContext<'_>) {
        match event {
            Event::SetTarget(target) => self.set_target(target),
            Event::KillAll => {
                self.delete_script(bus);
                self.next_target = None;
                self.observe_start = false;
            }
            Event::Observe => {
                if self.script.is_some() {
                    // Acted on once the running script ends
                    self.observe_start = true;
                } else {
                    self.observe_start = false;
                    self.start_target(bus);
                }
            }
            Event::MoveQuestion => {
                if self.block_move {
                    bus.publish(Event::DontMove);
                }
            }
            Event::MoveFailed { status } => {
                if self.script.is_none() {
                    if let Some(target) = self.current_target.take() {
                        info!(camera = %self.name, target = target.id(), status, "move failed, target abandoned");
                    }
                }
            }
            Event::DontMove
            | Event::ScriptStarted { .. }
            | Event::ScriptEnded { .. }
            | Event::LastReadout { .. } => {}
        }
    }

    fn on_callback(&mut self, callback: DeviceCallback, bus: &mut BusContext<'_>) {
        match callback {
            DeviceCallback::ExposureStarted { start } => self.exposure_started(start),
            DeviceCallback::ExposureEnd => self.exposure_end(bus),
            DeviceCallback::ReadoutEnd | DeviceCallback::CommandOk => self.next_command(bus),
            DeviceCallback::ImageReady => self.image_ready(),
            DeviceCallback::MoveEnd
            | DeviceCallback::MoveFailed { .. }
            | DeviceCallback::InfoUpdate(_) => {
                debug!(camera = %self.name, ?callback, "ignored");
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
