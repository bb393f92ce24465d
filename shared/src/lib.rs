//! Shared protocol vocabulary for observatory device clients.
//!
//! Everything a device client needs to agree on with its peers lives here:
//! pointing coordinates, device kinds, the commands a script can issue, the script engine
//! itself, the `Target` capability handed around by the scheduler, and the
//! events published on the executor bus.

pub mod command;
#[cfg(feature = "config-storage")]
pub mod config_storage;
pub mod coords;
pub mod device;
pub mod event;
pub mod script;
pub mod target;
pub mod telescope_info;

pub use command::{Command, ScriptStep};
pub use coords::Equatorial;
pub use device::DeviceKind;
pub use event::{Event, EventKind};
pub use script::{Script, ScriptError, ScriptResult};
pub use target::{FixedTarget, ObservationStart, Target, TargetRef};
pub use telescope_info::TelescopeInfo;
