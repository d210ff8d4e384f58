//! Sky Renderer Settings
//!
//! Global toggles consumed read-only by the reflection refresher and the
//! temporal compositor. The host owns a [`SkySettings`] value and passes it
//! into every call; nothing in this crate reads configuration from a global.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use stratus::renderer::{SkySettings, ReprojectionQuality, ScheduleMode};
//!
//! // Defaults: volumetrics on, time-sliced probe refresh, 4×4 reprojection
//! let settings = SkySettings::default();
//!
//! // Low-end preset
//! let settings = SkySettings {
//!     reprojection: ReprojectionQuality::High,
//!     downsample: 2,
//!     reflection_resolution: 64,
//!     ..Default::default()
//! };
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SkyError};
use crate::renderer::schedule::ScheduleMode;

// ---------------------------------------------------------------------------
// ReprojectionQuality
// ---------------------------------------------------------------------------

/// Reprojection tile factor for the volumetric layer.
///
/// With factor `F`, each frame renders one of `F²` interleaved sub-tiles at
/// `1/F` resolution per axis; the remaining pixels are reprojected from
/// history. A full refresh of every pixel takes `F²` frames.
///
/// | Variant  | Factor | Tiles per cycle |
/// |----------|--------|-----------------|
/// | `Off`    | 1      | 1 (no history)  |
/// | `Low`    | 2      | 4               |
/// | `Medium` | 4      | 16              |
/// | `High`   | 8      | 64              |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ReprojectionQuality {
    Off,
    Low,
    #[default]
    Medium,
    High,
}

impl ReprojectionQuality {
    /// Returns the per-axis tile factor `F`.
    #[inline]
    #[must_use]
    pub fn factor(self) -> u32 {
        match self {
            Self::Off => 1,
            Self::Low => 2,
            Self::Medium => 4,
            Self::High => 8,
        }
    }

    /// Returns the number of sub-tiles in one refresh cycle (`F²`).
    #[inline]
    #[must_use]
    pub fn tile_count(self) -> u32 {
        let f = self.factor();
        f * f
    }

    /// Returns `true` when history reprojection is active.
    #[inline]
    #[must_use]
    pub fn uses_history(self) -> bool {
        !matches!(self, Self::Off)
    }
}

// ---------------------------------------------------------------------------
// SkySettings
// ---------------------------------------------------------------------------

/// Global configuration for the amortized sky renderers.
///
/// # Fields
///
/// | Field                   | Description                                   | Default        |
/// |-------------------------|-----------------------------------------------|----------------|
/// | `volumetrics_enabled`   | Render the cloud layer at all                 | `true`         |
/// | `tone_mapping`          | Tone map probe faces in the mirror pass       | `true`         |
/// | `hdr`                   | Use float formats for probe targets           | `true`         |
/// | `refresh_mode`          | Instant or time-sliced probe refresh          | `TimeSliced`   |
/// | `reprojection`          | Cloud reprojection tile factor                | `Medium`       |
/// | `downsample`            | Extra divisor applied to camera resolution    | `1`            |
/// | `reflection_resolution` | Probe cubemap face size                       | `128`          |
/// | `schedule_seed`         | Seed of the sub-tile permutation              | `0x5EED`       |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkySettings {
    /// Enables the volumetric cloud layer.
    ///
    /// When `false` the compositor passes the camera image through unmodified.
    pub volumetrics_enabled: bool,

    /// Apply tone mapping in the probe's mirror pass.
    pub tone_mapping: bool,

    /// Use HDR (`Rgba16Float`) probe targets instead of `Rgba8Unorm`.
    pub hdr: bool,

    /// How reflection probe refreshes are spread over frames.
    pub refresh_mode: ScheduleMode,

    /// Cloud reprojection tile factor.
    pub reprojection: ReprojectionQuality,

    /// Resolution divisor applied before the tile factor. Must be at least 1.
    pub downsample: u32,

    /// Default probe cubemap face size in pixels.
    ///
    /// Individual probes may override this via
    /// [`ProbeSettings::resolution_override`](crate::renderer::probe::ProbeSettings).
    pub reflection_resolution: u32,

    /// Seed for the sub-tile permutation.
    pub schedule_seed: u64,
}

impl Default for SkySettings {
    fn default() -> Self {
        Self {
            volumetrics_enabled: true,
            tone_mapping: true,
            hdr: true,
            refresh_mode: ScheduleMode::TimeSliced,
            reprojection: ReprojectionQuality::default(),
            downsample: 1,
            reflection_resolution: 128,
            schedule_seed: 0x5EED,
        }
    }
}

impl SkySettings {
    /// Parses settings from a JSON document and validates them.
    ///
    /// Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Checks value ranges that the renderers rely on.
    pub fn validate(&self) -> Result<()> {
        if self.downsample == 0 {
            return Err(SkyError::InvalidSettings(
                "downsample must be at least 1".to_string(),
            ));
        }
        if self.reflection_resolution == 0 {
            return Err(SkyError::InvalidSettings(
                "reflection_resolution must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the color format used for probe targets.
    #[inline]
    #[must_use]
    pub fn probe_format(&self) -> wgpu::TextureFormat {
        if self.hdr {
            crate::renderer::HDR_TEXTURE_FORMAT
        } else {
            crate::renderer::LDR_TEXTURE_FORMAT
        }
    }
}
