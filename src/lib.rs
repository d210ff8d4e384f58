#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod renderer;
pub mod resources;

pub use errors::{Result, SkyError};
pub use renderer::{
    CompositeOutcome, CubeFace, CubemapRefresher, FrameInputs, HeadlessBackend, ProbeSettings,
    RenderBackend, ReprojectionQuality, ScheduleMode, SkySettings, TemporalCompositor,
    WgpuBackend,
};
pub use resources::{CameraState, EyeState, SkyTimeState, StereoMode, WeatherState};
