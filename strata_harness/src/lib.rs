// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! In-memory stand-ins for the platform collaborators of a compositor.
//!
//! Every fake records what it was asked to do behind a shared handle, so a
//! test can hand the fake itself to the compositor and keep a probe to make
//! assertions with.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use strata_core::backend::{
    BufferImporter, CommitBackend, CommitMode, CommitRequest, CompositeRequest, CompositeTarget,
    ImportedBuffer, OffscreenCompositor, ResourceEnumerator,
};
use strata_core::composition::{DisplayMode, PowerMode};
use strata_core::error::{CommitError, CompositeError, FenceError, ImportError};
use strata_core::fence::{Fence, SoftwareTimeline, SyncTimeline, TimelineFactory};
use strata_core::geometry::IntRect;
use strata_core::layer::{BufferHandle, Layer, LayerFlags};
use strata_core::output::PipeId;
use strata_core::plane::{Plane, PlaneCaps, PlaneId, UsablePlanes};

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A fixed set of planes.
#[derive(Clone, Debug, Default)]
pub struct FakeResources {
    planes: Vec<Plane>,
}

impl FakeResources {
    /// Serves exactly `planes`.
    #[must_use]
    pub fn new(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// One primary and `total - 1` overlay planes, all able to scale and
    /// rotate, usable on every pipe. Ids start at 1.
    #[must_use]
    pub fn uniform(total: u32) -> Self {
        let full = PlaneCaps::SCALE | PlaneCaps::ROTATE;
        let planes = (1..=total)
            .map(|id| {
                let role = if id == 1 {
                    PlaneCaps::PRIMARY
                } else {
                    PlaneCaps::OVERLAY
                };
                Plane::new(PlaneId(id), role | full)
            })
            .collect();
        Self { planes }
    }

    /// Every plane served, whatever its pipe.
    #[must_use]
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }
}

impl ResourceEnumerator for FakeResources {
    fn usable_planes(&self, pipe: PipeId) -> UsablePlanes {
        UsablePlanes::from_planes(
            self.planes
                .iter()
                .filter(|p| p.supports_pipe(pipe))
                .copied(),
        )
    }
}

// ---------------------------------------------------------------------------
// Importer
// ---------------------------------------------------------------------------

/// Counts imports and releases; can be told to reject one handle.
#[derive(Debug, Default)]
pub struct FakeImporter {
    next_object: AtomicU64,
    imported: AtomicUsize,
    released: AtomicUsize,
    reject: Mutex<Option<BufferHandle>>,
}

impl FakeImporter {
    /// Creates an importer that accepts every handle.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes every later import of `handle` fail.
    pub fn reject(&self, handle: BufferHandle) {
        *self.reject.lock() = Some(handle);
    }

    /// Successful imports so far.
    #[must_use]
    pub fn imported(&self) -> usize {
        self.imported.load(Ordering::Acquire)
    }

    /// Releases so far.
    #[must_use]
    pub fn released(&self) -> usize {
        self.released.load(Ordering::Acquire)
    }

    /// Imports not yet released.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.imported().saturating_sub(self.released())
    }
}

impl BufferImporter for FakeImporter {
    fn import_buffer(&self, handle: BufferHandle) -> Result<ImportedBuffer, ImportError> {
        if *self.reject.lock() == Some(handle) {
            return Err(ImportError { handle, code: -22 });
        }
        self.imported.fetch_add(1, Ordering::AcqRel);
        Ok(ImportedBuffer {
            handle,
            object: self.next_object.fetch_add(1, Ordering::Relaxed) + 1,
        })
    }

    fn release_buffer(&self, _buffer: ImportedBuffer) {
        self.released.fetch_add(1, Ordering::AcqRel);
    }
}

// ---------------------------------------------------------------------------
// Off-screen compositor
// ---------------------------------------------------------------------------

/// First handle handed out for rendered buffers.
pub const RENDERED_HANDLE_BASE: u64 = 0x1000_0000;

/// One call received by a [`FakeCompositor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositeCall {
    /// Buffer produced.
    pub target: CompositeTarget,
    /// Rectangles rendered.
    pub regions: Vec<IntRect>,
    /// Buffer recycled, if any.
    pub reuse: Option<BufferHandle>,
    /// Handle returned.
    pub output: BufferHandle,
}

#[derive(Debug, Default)]
struct CompositorLog {
    calls: Vec<CompositeCall>,
    pre_transforms: Vec<BufferHandle>,
    fail: bool,
}

/// Renders nothing and records every request.
#[derive(Debug, Default)]
pub struct FakeCompositor {
    next: u64,
    log: Arc<Mutex<CompositorLog>>,
}

/// Observes a [`FakeCompositor`] after it has been handed away.
#[derive(Clone, Debug)]
pub struct CompositorProbe {
    log: Arc<Mutex<CompositorLog>>,
}

impl FakeCompositor {
    /// Creates a compositor and a probe observing it.
    #[must_use]
    pub fn new() -> (Self, CompositorProbe) {
        let compositor = Self::default();
        let probe = CompositorProbe {
            log: Arc::clone(&compositor.log),
        };
        (compositor, probe)
    }

    fn next_handle(&mut self, reuse: Option<BufferHandle>) -> BufferHandle {
        reuse.unwrap_or_else(|| {
            self.next += 1;
            BufferHandle(RENDERED_HANDLE_BASE + self.next)
        })
    }
}

impl OffscreenCompositor for FakeCompositor {
    fn composite(&mut self, request: &CompositeRequest<'_>) -> Result<BufferHandle, CompositeError> {
        if self.log.lock().fail {
            return Err(CompositeError { code: -12 });
        }
        let output = self.next_handle(request.reuse);
        self.log.lock().calls.push(CompositeCall {
            target: request.target,
            regions: request.regions.iter().map(|r| r.frame).collect(),
            reuse: request.reuse,
            output,
        });
        Ok(output)
    }

    fn pre_transform(&mut self, layer: &Layer) -> Result<BufferHandle, CompositeError> {
        if self.log.lock().fail {
            return Err(CompositeError { code: -12 });
        }
        let output = self.next_handle(None);
        self.log.lock().pre_transforms.push(layer.buffer);
        Ok(output)
    }
}

impl CompositorProbe {
    /// Every composite rendered so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CompositeCall> {
        self.log.lock().calls.clone()
    }

    /// Composites rendered into `target`.
    #[must_use]
    pub fn count(&self, target: CompositeTarget) -> usize {
        self.log
            .lock()
            .calls
            .iter()
            .filter(|c| c.target == target)
            .count()
    }

    /// Layers rendered into scratch buffers for pre-transform.
    #[must_use]
    pub fn pre_transforms(&self) -> Vec<BufferHandle> {
        self.log.lock().pre_transforms.clone()
    }

    /// Makes every later request fail.
    pub fn fail(&self, fail: bool) {
        self.log.lock().fail = fail;
    }
}

// ---------------------------------------------------------------------------
// Commit backend
// ---------------------------------------------------------------------------

/// One commit received by a [`ScriptedBackend`].
#[derive(Clone, Debug)]
pub struct RecordedCommit {
    /// The request.
    pub request: CommitRequest,
    /// Dry run or real.
    pub mode: CommitMode,
    /// Whether the backend accepted it.
    pub accepted: bool,
}

#[derive(Debug, Default)]
struct BackendLog {
    commits: Vec<RecordedCommit>,
    disables: Vec<(PipeId, Vec<PlaneId>)>,
    power: Vec<(PipeId, PowerMode)>,
    modes: Vec<(PipeId, DisplayMode)>,
    apply_script: VecDeque<Result<(), CommitError>>,
    max_test_planes: Option<usize>,
    held: bool,
}

#[derive(Debug, Default)]
struct BackendShared {
    log: Mutex<BackendLog>,
    changed: Condvar,
}

/// Accepts every commit unless scripted otherwise.
///
/// Real commits pop results from a script; an empty script accepts. Dry
/// runs fail once they enable more planes than a configurable limit. While
/// held, every commit blocks until released.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    shared: Arc<BackendShared>,
}

/// Observes and steers a [`ScriptedBackend`] after it has been handed away.
#[derive(Clone, Debug)]
pub struct BackendProbe {
    shared: Arc<BackendShared>,
}

impl ScriptedBackend {
    /// Creates a backend and a probe observing it.
    #[must_use]
    pub fn new() -> (Self, BackendProbe) {
        let backend = Self::default();
        let probe = BackendProbe {
            shared: Arc::clone(&backend.shared),
        };
        (backend, probe)
    }
}

impl CommitBackend for ScriptedBackend {
    fn commit(&mut self, request: &CommitRequest, mode: CommitMode) -> Result<(), CommitError> {
        let mut log = self.shared.log.lock();
        while log.held {
            self.shared.changed.wait(&mut log);
        }
        let result = match mode {
            CommitMode::TestOnly => match log.max_test_planes {
                Some(max) if request.planes.len() > max => Err(CommitError { code: -22 }),
                _ => Ok(()),
            },
            CommitMode::Apply => log.apply_script.pop_front().unwrap_or(Ok(())),
        };
        log.commits.push(RecordedCommit {
            request: request.clone(),
            mode,
            accepted: result.is_ok(),
        });
        self.shared.changed.notify_all();
        result
    }

    fn disable_planes(&mut self, pipe: PipeId, planes: &[PlaneId]) {
        let mut log = self.shared.log.lock();
        log.disables.push((pipe, planes.to_vec()));
        self.shared.changed.notify_all();
    }

    fn set_power_mode(&mut self, pipe: PipeId, mode: PowerMode) -> Result<(), CommitError> {
        self.shared.log.lock().power.push((pipe, mode));
        Ok(())
    }

    fn set_display_mode(&mut self, pipe: PipeId, mode: &DisplayMode) -> Result<(), CommitError> {
        self.shared.log.lock().modes.push((pipe, *mode));
        Ok(())
    }
}

impl BackendProbe {
    /// Makes the next real commit fail with `code`.
    pub fn fail_next_apply(&self, code: i32) {
        self.shared
            .log
            .lock()
            .apply_script
            .push_back(Err(CommitError { code }));
    }

    /// Rejects dry runs enabling more than `max` planes.
    pub fn reject_tests_above(&self, max: usize) {
        self.shared.log.lock().max_test_planes = Some(max);
    }

    /// Blocks every commit until [`release`](Self::release).
    pub fn hold(&self) {
        self.shared.log.lock().held = true;
    }

    /// Lets held commits proceed.
    pub fn release(&self) {
        self.shared.log.lock().held = false;
        self.shared.changed.notify_all();
    }

    /// Every commit received so far.
    #[must_use]
    pub fn commits(&self) -> Vec<RecordedCommit> {
        self.shared.log.lock().commits.clone()
    }

    /// Real commits the backend accepted.
    #[must_use]
    pub fn applied(&self) -> Vec<CommitRequest> {
        self.shared
            .log
            .lock()
            .commits
            .iter()
            .filter(|c| c.mode == CommitMode::Apply && c.accepted)
            .map(|c| c.request.clone())
            .collect()
    }

    /// Calls to [`CommitBackend::disable_planes`].
    #[must_use]
    pub fn disables(&self) -> Vec<(PipeId, Vec<PlaneId>)> {
        self.shared.log.lock().disables.clone()
    }

    /// Power mode changes.
    #[must_use]
    pub fn power_modes(&self) -> Vec<(PipeId, PowerMode)> {
        self.shared.log.lock().power.clone()
    }

    /// Display mode changes.
    #[must_use]
    pub fn display_modes(&self) -> Vec<(PipeId, DisplayMode)> {
        self.shared.log.lock().modes.clone()
    }
}

// ---------------------------------------------------------------------------
// Timelines
// ---------------------------------------------------------------------------

/// Hands out software timelines whose fence creation always fails.
#[derive(Clone, Copy, Debug, Default)]
pub struct FailingTimelineFactory;

#[derive(Debug, Default)]
struct FailingTimeline {
    inner: SoftwareTimeline,
}

impl SyncTimeline for FailingTimeline {
    fn create_fence(&self, _name: &str, point: u64) -> Result<Fence, FenceError> {
        Err(FenceError { point, code: -24 })
    }

    fn advance_to(&self, point: u64) {
        self.inner.advance_to(point);
    }

    fn current(&self) -> u64 {
        self.inner.current()
    }
}

impl TimelineFactory for FailingTimelineFactory {
    fn create_timeline(&self) -> Result<Arc<dyn SyncTimeline>, FenceError> {
        Ok(Arc::new(FailingTimeline::default()))
    }
}

// ---------------------------------------------------------------------------
// Layer helpers
// ---------------------------------------------------------------------------

/// Display size the layer helpers lay out against.
pub const DISPLAY: IntRect = IntRect::new(0, 0, 1920, 1080);

/// A layer showing buffer `id` at `rect`.
#[must_use]
pub fn make_layer(id: u64, rect: IntRect) -> Layer {
    Layer::new(BufferHandle(id), rect)
}

/// `count` layers on a diagonal, each overlapping its neighbours. Buffer
/// ids start at `first_id`.
#[must_use]
pub fn layer_stack(first_id: u64, count: usize) -> Vec<Layer> {
    (0..count)
        .map(|i| {
            let offset = i32::try_from(i * 40).unwrap_or(i32::MAX);
            make_layer(
                first_id + i as u64,
                IntRect::from_origin_size(offset, offset, 400, 300),
            )
        })
        .collect()
}

/// A protected layer covering `rect`.
#[must_use]
pub fn protected_layer(id: u64, rect: IntRect) -> Layer {
    make_layer(id, rect).with_flags(LayerFlags::PROTECTED)
}

/// A layer sampling a source twice as large as `rect`.
#[must_use]
pub fn scaled_layer(id: u64, rect: IntRect) -> Layer {
    make_layer(id, rect).with_source_crop(kurbo::Rect::new(
        0.0,
        0.0,
        f64::from(rect.width()) * 2.0,
        f64::from(rect.height()) * 2.0,
    ))
}

/// Attaches a pending acquire fence from a fresh software timeline.
///
/// Returns the layer and the timeline that signals the fence.
#[must_use]
pub fn with_pending_acquire(layer: Layer) -> (Layer, SoftwareTimeline) {
    let timeline = SoftwareTimeline::new();
    match timeline.create_fence("acquire", 1) {
        Ok(fence) => (layer.with_acquire_fence(fence), timeline),
        Err(_) => (layer, timeline),
    }
}
