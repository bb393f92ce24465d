//! Equatorial pointing coordinates.

use std::fmt;

use serde::{Deserialize, Serialize};

/// J2000 equatorial position, both axes in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Equatorial {
    /// Right ascension in degrees, [0, 360)
    pub ra: f64,
    /// Declination in degrees, [-90, 90]
    pub dec: f64,
}

impl Equatorial {
    /// Create a position, wrapping RA into [0, 360).
    pub fn new(ra: f64, dec: f64) -> Self {
        Self {
            ra: ra.rem_euclid(360.0),
            dec,
        }
    }

    /// Great-circle distance to `other` in degrees.
    ///
    /// Uses the haversine form, which stays accurate for the sub-arcminute
    /// separations that matter when deciding whether a slew is needed.
    pub fn separation(&self, other: &Equatorial) -> f64 {
        let (ra1, dec1) = (self.ra.to_radians(), self.dec.to_radians());
        let (ra2, dec2) = (other.ra.to_radians(), other.dec.to_radians());

        let hav_dec = ((dec2 - dec1) / 2.0).sin().powi(2);
        let hav_ra = ((ra2 - ra1) / 2.0).sin().powi(2);
        let h = hav_dec + dec1.cos() * dec2.cos() * hav_ra;

        (2.0 * h.sqrt().min(1.0).asin()).to_degrees()
    }
}

impl fmt::Display for Equatorial {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RA {:.4}° DEC {:+.4}°", self.ra, self.dec)
    }
}
