//! Bookkeeping for images produced by script exposures.

use chrono::{DateTime, Utc};
use shared::TargetRef;

/// Identity of one exposure, fixed when the shutter opens.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// Camera that took the image
    pub camera: String,
    /// Target, observation and image numbers; `None` for no-target images
    pub target_id: Option<i32>,
    pub obs_id: Option<i32>,
    pub img_id: Option<i32>,
    /// Exposure number within the running script (1-based), 0 outside scripts
    pub exposure_num: u32,
    pub exposure_start: DateTime<Utc>,
}

impl ImageRecord {
    /// Image belonging to an observation of `target`.
    pub fn for_target(
        camera: &str,
        target: &TargetRef,
        exposure_num: u32,
        exposure_start: DateTime<Utc>,
    ) -> Self {
        Self {
            camera: camera.to_string(),
            target_id: Some(target.id()),
            obs_id: Some(target.obs_id()),
            img_id: Some(target.next_img_id()),
            exposure_num,
            exposure_start,
        }
    }

    /// Image taken while no target was assigned.
    pub fn without_target(camera: &str, exposure_start: DateTime<Utc>) -> Self {
        Self {
            camera: camera.to_string(),
            target_id: None,
            obs_id: None,
            img_id: None,
            exposure_num: 0,
            exposure_start,
        }
    }

    /// File name the image is stored under.
    pub fn file_name(&self) -> String {
        let stamp = self.exposure_start.format("%Y%m%d%H%M%S%.3f");
        match (self.target_id, self.obs_id, self.img_id) {
            (Some(tar), Some(obs), Some(img)) => {
                format!("{}_{tar:05}_{obs}_{img:04}_{stamp}.fits", self.camera)
            }
            _ => format!("{}_notarget_{stamp}.fits", self.camera),
        }
    }
}
