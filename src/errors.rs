//! Error Types
//!
//! This module defines the error types used by the refresh engine.
//!
//! # Overview
//!
//! The main error type [`SkyError`] covers the failure modes of the amortized
//! renderers:
//! - Missing collaborator state (recovered locally by pass-through rendering)
//! - GPU render target allocation failures (fatal for the owning instance)
//! - Stale or foreign render target handles
//! - Settings validation and JSON loading
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, SkyError>`.
//!
//! ```rust,ignore
//! use stratus::errors::{SkyError, Result};
//!
//! fn bake() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the sky refresh engine.
#[derive(Error, Debug)]
pub enum SkyError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// A required collaborator (time of day, weather, global settings) was
    /// not supplied for this frame.
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(&'static str),

    /// Settings failed validation.
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    /// JSON parsing error while loading settings.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // GPU Resource Errors
    // ========================================================================
    /// The backend could not create a render target.
    #[error("Failed to allocate render target '{label}' ({width}x{height}): {reason}")]
    AllocationFailed {
        /// Debug label of the requested target
        label: &'static str,
        /// Requested width in pixels
        width: u32,
        /// Requested height in pixels
        height: u32,
        /// Backend-specific failure description
        reason: String,
    },

    /// A handle refers to a target that was released or never existed.
    #[error("Unknown render target handle")]
    UnknownTarget,

    /// Two targets involved in one operation have different dimensions.
    #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        /// Dimensions of the destination
        expected: (u32, u32),
        /// Dimensions of the source
        actual: (u32, u32),
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// The owning instance hit a fatal error earlier and refuses further work
    /// until it is explicitly reset.
    #[error("{0} is faulted after an allocation failure")]
    Faulted(&'static str),
}

impl SkyError {
    /// Returns `true` for errors that disable the owning instance.
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. } | Self::Faulted(_))
    }
}

/// Alias for `Result<T, SkyError>`.
pub type Result<T> = std::result::Result<T, SkyError>;
