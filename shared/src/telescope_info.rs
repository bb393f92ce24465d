//! Snapshot of a mount's reported state.

use serde::{Deserialize, Serialize};

use crate::coords::Equatorial;

/// Latest values reported by a telescope mount.
///
/// Geographic coordinates are in degrees (longitude east positive), altitude
/// in meters above sea level, sidereal time in hours.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelescopeInfo {
    /// Mount model
    pub mount_type: String,
    pub serial_number: String,
    /// Current pointing
    pub position: Equatorial,
    /// Declination the mount parks at
    pub park_dec: f64,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: f32,
    /// Local sidereal time in hours
    pub sidereal_time: f64,
    /// Number of pointing corrections applied so far
    pub correction_mark: i32,
    /// True when a German equatorial mount is on the flipped side of the pier
    pub flip: bool,
}

impl Default for TelescopeInfo {
    fn default() -> Self {
        Self {
            mount_type: String::new(),
            serial_number: String::new(),
            position: Equatorial::new(0.0, 0.0),
            park_dec: 0.0,
            longitude: 0.0,
            latitude: 0.0,
            altitude: 0.0,
            sidereal_time: 0.0,
            correction_mark: 0,
            flip: false,
        }
    }
}

impl TelescopeInfo {
    /// Hour angle of `pos` in hours, normalised to [-12, 12).
    pub fn hour_angle(&self, pos: &Equatorial) -> f64 {
        let ha = self.sidereal_time - pos.ra / 15.0;
        (ha + 12.0).rem_euclid(24.0) - 12.0
    }
}
