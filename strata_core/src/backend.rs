// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Contracts with the platform collaborators.
//!
//! Nothing here talks to hardware. A platform layer implements these traits
//! over its display driver, buffer allocator and GPU; tests implement them
//! with in-memory fakes.

use alloc::vec::Vec;

use crate::composition::{CompositionRegion, DisplayMode, PowerMode};
use crate::error::{CommitError, CompositeError, ImportError};
use crate::fence::Fence;
use crate::geometry::IntRect;
use crate::layer::{BlendMode, BufferHandle, Layer, Transform};
use crate::output::PipeId;
use crate::plane::{PlaneId, UsablePlanes};

/// Enumerates the hardware planes a pipe may use.
pub trait ResourceEnumerator: Send + Sync {
    /// Planes usable on `pipe`, split into primary and overlay sets.
    fn usable_planes(&self, pipe: PipeId) -> UsablePlanes;
}

/// A buffer imported for scan-out. Opaque to the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImportedBuffer {
    /// Caller-side handle the import was made from.
    pub handle: BufferHandle,
    /// Backend-side object id.
    pub object: u64,
}

/// Imports caller buffers into objects the display hardware can scan out.
///
/// Each layer is imported once per frame and released when the frame is
/// retired.
pub trait BufferImporter: Send + Sync {
    /// Imports `handle`.
    fn import_buffer(&self, handle: BufferHandle) -> Result<ImportedBuffer, ImportError>;

    /// Releases a buffer returned by [`import_buffer`](Self::import_buffer).
    fn release_buffer(&self, buffer: ImportedBuffer);
}

/// Which off-screen buffer a composite renders into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompositeTarget {
    /// The per-frame precomposition.
    Precomposition,
    /// The cached composite of stable regions.
    Squash,
}

/// Input of [`OffscreenCompositor::composite`].
#[derive(Clone, Copy, Debug)]
pub struct CompositeRequest<'a> {
    /// Buffer being produced.
    pub target: CompositeTarget,
    /// The frame's full layer stack.
    pub layers: &'a [Layer],
    /// Disjoint areas to render, each naming its source layers front to back.
    pub regions: &'a [CompositionRegion],
    /// Buffer to render into, when an earlier buffer is being recycled.
    pub reuse: Option<BufferHandle>,
}

/// The GPU fallback renderer.
pub trait OffscreenCompositor: Send {
    /// Renders `request.regions` into an off-screen buffer.
    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<BufferHandle, CompositeError>;

    /// Renders `layer` with its transform applied into a scratch buffer the
    /// size of its display frame.
    fn pre_transform(&mut self, layer: &Layer) -> Result<BufferHandle, CompositeError>;
}

/// Whether a commit is applied or only validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CommitMode {
    /// Validate the configuration without changing what is shown.
    TestOnly,
    /// Apply the configuration.
    Apply,
}

/// One scan-out area of a plane.
#[derive(Clone, Debug)]
pub struct PlaneArea {
    /// Buffer scanned out.
    pub buffer: BufferHandle,
    /// Region of the buffer to sample.
    pub source_crop: kurbo::Rect,
    /// Destination on the display.
    pub display_frame: IntRect,
    /// Orientation the plane applies.
    pub transform: Transform,
    /// Blend mode.
    pub blending: BlendMode,
    /// Plane alpha.
    pub alpha: u8,
    /// Fence the hardware waits on before reading `buffer`.
    pub acquire_fence: Option<Fence>,
}

/// State of one enabled plane.
#[derive(Clone, Debug)]
pub struct PlaneCommit {
    /// Plane being configured.
    pub plane: PlaneId,
    /// Stacking position; higher values are nearer the viewer.
    pub zpos: u32,
    /// Areas shown. More than one only on multi-area planes.
    pub areas: Vec<PlaneArea>,
}

/// A complete configuration of one pipe.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    /// Pipe being configured.
    pub pipe: PipeId,
    /// Enabled planes, front to back.
    pub planes: Vec<PlaneCommit>,
    /// Planes to turn off.
    pub disables: Vec<PlaneId>,
}

/// The hardware commit transport.
pub trait CommitBackend: Send {
    /// Commits `request` atomically, or validates it for
    /// [`CommitMode::TestOnly`].
    fn commit(&mut self, request: &CommitRequest, mode: CommitMode) -> Result<(), CommitError>;

    /// Turns `planes` off. Best effort; used when clearing a display.
    fn disable_planes(&mut self, pipe: PipeId, planes: &[PlaneId]);

    /// Changes the power state of the pipe's display.
    fn set_power_mode(&mut self, pipe: PipeId, mode: PowerMode) -> Result<(), CommitError>;

    /// Switches the pipe's display mode.
    fn set_display_mode(&mut self, pipe: PipeId, mode: &DisplayMode) -> Result<(), CommitError>;
}
