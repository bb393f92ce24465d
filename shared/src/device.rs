//! Device classification shared by configuration and the connection registry.

use serde::{Deserialize, Serialize};

/// Kind of hardware behind a connection.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    Telescope,
    Dome,
    Focuser,
    FilterWheel,
    /// Image processing queue; reports `que_size`
    ImageProcessor,
}
