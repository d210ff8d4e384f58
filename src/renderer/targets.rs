//! Render Target Lifecycle
//!
//! Owns GPU render targets keyed by shape (size, format, mip count,
//! dimension). A target is reused while the requested shape is identical and
//! recreated as soon as anything differs.
//!
//! # Design
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ RenderTargetSet  (one shared shape)         │
//! │   slots: [TargetSlot; N]                    │
//! │                                             │
//! │ ensure(shape)  → reuse or release+create    │
//! │ get(i)         → TargetId                   │
//! │ release()      → all slots freed            │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! The old target is always released before the replacement is created, so
//! stale content is never visible next to fresh content and peak memory
//! stays bounded. Any [`TargetId`] handed out before a release is invalid
//! afterwards.

use smallvec::SmallVec;

use crate::errors::Result;
use crate::renderer::backend::RenderBackend;

slotmap::new_key_type! {
    /// Handle to a render target owned by a [`RenderBackend`].
    pub struct TargetId;
}

/// Texture topology of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetDimension {
    /// Single 2D layer.
    D2,
    /// Six square layers addressed as a cube.
    Cube,
}

impl TargetDimension {
    /// Number of array layers backing this dimension.
    #[inline]
    #[must_use]
    pub fn layer_count(self) -> u32 {
        match self {
            Self::D2 => 1,
            Self::Cube => 6,
        }
    }
}

/// Everything that determines whether two targets are interchangeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetShape {
    pub width: u32,
    pub height: u32,
    pub format: wgpu::TextureFormat,
    pub mip_level_count: u32,
    pub dimension: TargetDimension,
}

impl TargetShape {
    /// A single-mip 2D target.
    #[must_use]
    pub fn d2(width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        Self {
            width,
            height,
            format,
            mip_level_count: 1,
            dimension: TargetDimension::D2,
        }
    }

    /// A square cube target, optionally with a full mip chain.
    #[must_use]
    pub fn cube(size: u32, format: wgpu::TextureFormat, mipmaps: bool) -> Self {
        Self {
            width: size,
            height: size,
            format,
            mip_level_count: if mipmaps { full_mip_chain(size) } else { 1 },
            dimension: TargetDimension::Cube,
        }
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Number of mip levels down to 1×1 for a square of `size`.
#[inline]
#[must_use]
pub fn full_mip_chain(size: u32) -> u32 {
    32 - size.max(1).leading_zeros()
}

/// Creation request passed to a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDesc {
    pub shape: TargetShape,
    pub label: &'static str,
}

// ─── TargetSlot ───────────────────────────────────────────────────────────────

/// A single lazily created render target.
#[derive(Debug)]
pub struct TargetSlot {
    label: &'static str,
    current: Option<(TargetId, TargetShape)>,
}

impl TargetSlot {
    #[must_use]
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            current: None,
        }
    }

    /// Returns a target with exactly `shape`.
    ///
    /// Reuses the existing target when its shape matches; otherwise releases
    /// it first and creates a new one. The boolean is `true` when a new
    /// target was created.
    pub fn acquire<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        shape: TargetShape,
    ) -> Result<(TargetId, bool)> {
        if let Some((id, current)) = self.current {
            if current == shape {
                return Ok((id, false));
            }
        }

        self.release(backend);

        let id = backend.create_target(&TargetDesc {
            shape,
            label: self.label,
        })?;
        log::debug!(
            "Created target '{}' {}x{} {:?} mips={} {:?}",
            self.label,
            shape.width,
            shape.height,
            shape.format,
            shape.mip_level_count,
            shape.dimension
        );
        self.current = Some((id, shape));
        Ok((id, true))
    }

    /// Releases the target if one exists.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some((id, _)) = self.current.take() {
            backend.release_target(id);
        }
    }

    #[inline]
    #[must_use]
    pub fn get(&self) -> Option<TargetId> {
        self.current.map(|(id, _)| id)
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> Option<TargetShape> {
        self.current.map(|(_, shape)| shape)
    }

    #[inline]
    #[must_use]
    pub fn label(&self) -> &'static str {
        self.label
    }
}

// ─── RenderTargetSet ──────────────────────────────────────────────────────────

/// A group of targets that always share one shape.
///
/// A shape change recreates every member before any of them is used again,
/// so buffers of different sizes are never mixed.
#[derive(Debug)]
pub struct RenderTargetSet {
    shape: Option<TargetShape>,
    slots: SmallVec<[TargetSlot; 4]>,
}

impl RenderTargetSet {
    #[must_use]
    pub fn new(labels: &[&'static str]) -> Self {
        Self {
            shape: None,
            slots: labels.iter().map(|&label| TargetSlot::new(label)).collect(),
        }
    }

    /// Makes sure every member exists with `shape`.
    ///
    /// Returns `true` when the set was (re)created. On failure the whole set
    /// is released so no partially built set survives.
    pub fn ensure<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        shape: TargetShape,
    ) -> Result<bool> {
        if self.shape == Some(shape) && self.slots.iter().all(|s| s.get().is_some()) {
            return Ok(false);
        }

        // Release everything up front so old and new never coexist.
        self.release(backend);

        for index in 0..self.slots.len() {
            if let Err(err) = self.slots[index].acquire(backend, shape) {
                self.release(backend);
                return Err(err);
            }
        }
        self.shape = Some(shape);
        Ok(true)
    }

    /// Releases every member.
    pub fn release<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        for slot in &mut self.slots {
            slot.release(backend);
        }
        self.shape = None;
    }

    /// Handle of member `index`, if allocated.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<TargetId> {
        self.slots.get(index).and_then(TargetSlot::get)
    }

    #[inline]
    #[must_use]
    pub fn shape(&self) -> Option<TargetShape> {
        self.shape
    }

    #[inline]
    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.shape.is_some()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
