//! Per-frame inputs supplied by the host: camera, time of day and weather.

pub mod inputs;

pub use inputs::{CameraState, EyeState, SkyTimeState, StereoMode, WeatherState};
