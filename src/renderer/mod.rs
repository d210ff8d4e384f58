//! Amortized sky refresh
//!
//! - [`targets`]: owned GPU targets and their lifecycle
//! - [`frame_geometry`]: per-eye matrices captured once per frame
//! - [`schedule`]: which unit of work runs on which tick
//! - [`probe`]: reflection cubemap refreshed one face per tick
//! - [`temporal`]: interleaved cloud rendering with history reprojection
//!
//! All GPU work goes through [`RenderBackend`]. [`WgpuBackend`] records it
//! on a `wgpu::Device`, [`HeadlessBackend`] evaluates it on the CPU.

pub mod backend;
pub mod frame_geometry;
pub mod headless;
pub mod probe;
pub mod schedule;
pub mod settings;
pub mod targets;
pub mod temporal;
pub mod wgpu_backend;

pub use backend::{RenderBackend, ReprojectParams, SubframeParams, ViewParams};
pub use frame_geometry::{EyeMatrices, FrameGeometry, FrameGeometryState};
pub use headless::{BackendOp, HeadlessBackend};
pub use probe::{
    CubeFace, CubemapRefresher, ProbeSettings, PublishedCubemap, RefreshRequest, RefreshState,
    TickOutcome,
};
pub use schedule::{ScheduleMode, UnitOrder, WorkSchedule};
pub use settings::{ReprojectionQuality, SkySettings};
pub use targets::{RenderTargetSet, TargetDesc, TargetDimension, TargetId, TargetShape, TargetSlot};
pub use temporal::{CompositeOutcome, FrameDimensions, FrameInputs, TemporalCompositor};
pub use wgpu_backend::{GpuTarget, PassContext, SkyPasses, WgpuBackend};

/// Color format of HDR probes and cloud targets.
pub const HDR_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;

/// Color format used when HDR output is off.
pub const LDR_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
