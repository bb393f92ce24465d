//! Event bus connecting device clients.
//!
//! The bus owns every registered [`DeviceClient`] and delivers events to them
//! one at a time, in registration order, on a single logical thread. There is
//! no shared mutable state between clients: the only way one client learns
//! about another is through events published here.
//!
//! # Ordering
//!
//! Events published from inside a handler are queued and delivered once the
//! event currently being delivered has reached every client, so all clients
//! observe the same total order. A top-level [`EventBus::publish`] or
//! [`EventBus::callback`] returns only after the queue has drained, and
//! reports everything delivered in the pass as a [`Dispatch`].
//!
//! # Move veto
//!
//! [`BusContext::ask`] is the one synchronous path: the question is handed
//! to every other client immediately and the events they publish in response
//! are returned to the asker before it continues. This is how a mount polls
//! `MoveQuestion` and sees a camera's `DontMove` before it commits to a slew.
//! The answers are also queued for normal delivery to every client.

use std::any::Any;
use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use shared::{Event, EventKind, TelescopeInfo};
use tracing::{debug, warn};

use crate::connection::RoutingError;

/// Completion notifications delivered from a device into its client.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCallback {
    /// Shutter opened
    ExposureStarted { start: DateTime<Utc> },
    /// Shutter closed, readout starting
    ExposureEnd,
    /// Sensor read out; the device can take the next command
    ReadoutEnd,
    /// Oldest exposure's image finished writing
    ImageReady,
    /// A non-exposure command finished
    CommandOk,
    /// Slew finished on target
    MoveEnd,
    /// Slew aborted with a device status code
    MoveFailed { status: i32 },
    /// Fresh mount status
    InfoUpdate(Box<TelescopeInfo>),
}

/// In-process coordinator for one device's part in an observation.
pub trait DeviceClient: Any {
    /// Device name; matches the device's connection name.
    fn name(&self) -> &str;

    /// React to an event published on the bus.
    fn post_event(&mut self, event: &Event, bus: &mut BusContext<'_>);

    /// React to a completion callback from the device.
    fn on_callback(&mut self, callback: DeviceCallback, bus: &mut BusContext<'_>);

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Handle given to clients while they handle an event or callback.
pub struct BusContext<'a> {
    bus: &'a mut EventBus,
    /// Slot of the client currently running
    origin: usize,
}

impl BusContext<'_> {
    /// Queue an event for delivery to every client.
    pub fn publish(&mut self, event: Event) {
        self.bus.pending.push_back(event);
    }

    /// Deliver `question` to every other client right now and return the
    /// events they published in response.
    pub fn ask(&mut self, question: Event) -> Vec<Event> {
        self.bus.ask_from(Some(self.origin), question)
    }
}

/// Record of every event delivered during one top-level bus call.
#[derive(Debug, Default)]
pub struct Dispatch {
    events: Vec<Event>,
}

impl Dispatch {
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.iter().map(Event::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.iter().filter(|e| e.kind() == kind).count()
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        self.count(kind) > 0
    }

    /// Append another dispatch record after this one.
    pub fn extend(&mut self, other: Dispatch) {
        self.events.extend(other.events);
    }
}

struct Slot {
    name: String,
    /// Taken out while the client is running
    client: Option<Box<dyn DeviceClient>>,
}

/// Synchronous, ordered publish/subscribe relay between device clients.
#[derive(Default)]
pub struct EventBus {
    slots: Vec<Slot>,
    pending: VecDeque<Event>,
    /// Events delivered during the current top-level call
    pass: Vec<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a client. Clients receive events in registration order.
    pub fn register(&mut self, client: Box<dyn DeviceClient>) -> Result<(), RoutingError> {
        let name = client.name().to_string();
        if self.slots.iter().any(|s| s.name == name) {
            return Err(RoutingError::DuplicateDevice(name));
        }
        debug!(client = %name, "registered on bus");
        self.slots.push(Slot {
            name,
            client: Some(client),
        });
        Ok(())
    }

    /// Names of registered clients in delivery order.
    pub fn client_names(&self) -> impl Iterator<Item = &str> {
        self.slots.iter().map(|s| s.name.as_str())
    }

    /// Publish an event and deliver it, plus everything it triggers.
    pub fn publish(&mut self, event: Event) -> Dispatch {
        self.pending.push_back(event);
        self.drain()
    }

    /// Deliver a device callback to the client named `device`.
    pub fn callback(
        &mut self,
        device: &str,
        callback: DeviceCallback,
    ) -> Result<Dispatch, RoutingError> {
        let idx = self
            .slot_index(device)
            .ok_or_else(|| RoutingError::UnknownDevice(device.to_string()))?;

        debug!(device, ?callback, "callback");
        if let Some(mut client) = self.slots[idx].client.take() {
            client.on_callback(
                callback,
                &mut BusContext {
                    bus: self,
                    origin: idx,
                },
            );
            self.slots[idx].client = Some(client);
        }
        Ok(self.drain())
    }

    /// Poll every client with `MoveQuestion`; true if nobody vetoed.
    pub fn move_allowed(&mut self) -> bool {
        let answers = self.ask_from(None, Event::MoveQuestion);
        self.drain();
        !answers.iter().any(|e| e.kind() == EventKind::DontMove)
    }

    /// Borrow a registered client as its concrete type.
    pub fn client<T: DeviceClient>(&self, name: &str) -> Option<&T> {
        let idx = self.slot_index(name)?;
        self.slots[idx].client.as_ref()?.as_any().downcast_ref::<T>()
    }

    pub fn client_mut<T: DeviceClient>(&mut self, name: &str) -> Option<&mut T> {
        let idx = self.slot_index(name)?;
        self.slots[idx]
            .client
            .as_mut()?
            .as_any_mut()
            .downcast_mut::<T>()
    }

    fn slot_index(&self, name: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.name == name)
    }

    fn ask_from(&mut self, origin: Option<usize>, question: Event) -> Vec<Event> {
        debug!(%question, "asking");
        self.pass.push(question.clone());
        let before = self.pending.len();

        for idx in 0..self.slots.len() {
            if Some(idx) == origin {
                continue;
            }
            self.deliver(idx, &question);
        }

        self.pending.iter().skip(before).cloned().collect()
    }

    fn drain(&mut self) -> Dispatch {
        while let Some(event) = self.pending.pop_front() {
            debug!(%event, "delivering");
            self.pass.push(event.clone());
            for idx in 0..self.slots.len() {
                self.deliver(idx, &event);
            }
        }
        Dispatch {
            events: std::mem::take(&mut self.pass),
        }
    }

    fn deliver(&mut self, idx: usize, event: &Event) {
        let Some(mut client) = self.slots[idx].client.take() else {
            // Only happens for a nested ask reaching the client that is
            // already running; it handles its own state without the question.
            warn!(client = %self.slots[idx].name, %event, "client busy, event skipped");
            return;
        };
        client.post_event(
            event,
            &mut BusContext {
                bus: self,
                origin: idx,
            },
        );
        self.slots[idx].client = Some(client);
    }
}
