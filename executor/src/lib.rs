//! Observatory executor.
//!
//! Device clients coordinate one observation at a time over an in-process
//! event bus:
//!
//! - [`bus`]: the ordered event bus and the [`DeviceClient`] trait
//! - [`connection`]: per-device command queues and reported state
//! - [`telescope`]: mount client; owns targets and slews
//! - [`camera`]: camera client; runs target scripts and blocks moves while exposing
//! - [`image`]: per-exposure bookkeeping
//! - [`sim`]: simulated devices for running the executor without hardware

pub mod bus;
pub mod camera;
pub mod connection;
pub mod image;
pub mod sim;
pub mod telescope;

pub use bus::{BusContext, DeviceCallback, DeviceClient, Dispatch, EventBus};
pub use camera::{CameraExecClient, CameraState};
pub use connection::{Connection, ConnectionRegistry, DeviceState, DeviceValue, RoutingError};
pub use image::ImageRecord;
pub use sim::{RigStats, SimulatedRig};
pub use telescope::{TelescopeExecClient, TelescopeState};
