// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-output frame scheduler.
//!
//! Each output owns one [`FrameScheduler`]. Compositions move through it as
//!
//! ```text
//!   Queued ──► Preparing ──► Committing ──► Active ──► Retired
//!              (stage worker)  (commit worker)
//! ```
//!
//! The stage worker renders off-screen composites and scratch buffers; the
//! commit worker hands the finished plane configuration to the backend. With
//! [`CompositorConfig::decoupled_commit`] off, one worker does both.
//!
//! At most [`CompositorConfig::queue_depth`] compositions are outstanding
//! behind the active one; [`FrameScheduler::queue`] blocks while that many
//! are in flight. A composition retires, signaling its fences, when the next
//! one has been committed. [`FrameScheduler::clear_display`] force-signals
//! everything queued or shown and turns the output's planes off.
//!
//! # Locking
//!
//! The display state (backend, active composition, planes shown) and the
//! renderer each sit behind a mutex. Code needing both takes the display
//! state first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;
use strata_core::backend::{CommitBackend, CommitMode, CommitRequest, OffscreenCompositor};
use strata_core::composition::{CompositionKind, FrameComposition, PowerMode};
use strata_core::config::CompositorConfig;
use strata_core::error::{CommitError, Error};
use strata_core::fence::SignalHandle;
use strata_core::output::{OutputId, PipeId};
use strata_core::plane::PlaneId;
use strata_core::trace::{
    ClearEvent, ClearReason, CommitEvent, SquashEvent, StageEvent, StageKind, TraceSink, Tracer,
};

use crate::error::SchedulerError;
use crate::stage::{Prepared, Renderer, build_request};

/// A trace sink shared by every scheduler of a compositor.
pub type SharedTraceSink = Arc<Mutex<dyn TraceSink + Send>>;

/// Called on the commit worker with the number of every frame the backend
/// applied, before [`FrameEvent::Presented`] is sent.
pub type AppliedHook = Box<dyn Fn(u64) + Send + Sync>;

/// Events buffered per output before new ones are dropped.
pub const EVENT_CAPACITY: usize = 256;

/// What happened to a queued composition, reported asynchronously.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    /// The composition was committed and is now shown.
    Presented {
        /// Frame number.
        frame_no: u64,
    },
    /// A dry run was rejected and the frame was collapsed into a single
    /// composite.
    FallbackComposited {
        /// Frame number.
        frame_no: u64,
    },
    /// Off-screen rendering failed; the frame was dropped and the previous
    /// one stays shown.
    PrepareFailed {
        /// Frame number.
        frame_no: u64,
        /// Cause.
        error: Error,
    },
    /// The hardware rejected the frame; the display has been cleared.
    CommitFailed {
        /// Frame number.
        frame_no: u64,
        /// Backend failure.
        error: CommitError,
    },
    /// Every fence of the output was signaled and its planes turned off.
    DisplayCleared {
        /// Why.
        reason: ClearReason,
        /// Compositions force-signaled.
        compositions: usize,
    },
}

/// The hardware collaborators owned by one output.
pub struct OutputDevices {
    /// Commit transport.
    pub backend: Box<dyn CommitBackend>,
    /// Off-screen renderer.
    pub compositor: Box<dyn OffscreenCompositor>,
}

impl core::fmt::Debug for OutputDevices {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutputDevices").finish_non_exhaustive()
    }
}

/// One slot of the bounded queue, given back when dropped.
struct Permit(Receiver<()>);

impl Drop for Permit {
    fn drop(&mut self) {
        _ = self.0.try_recv();
    }
}

struct Queued {
    comp: FrameComposition,
    generation: u64,
    permit: Permit,
}

struct Staged {
    queued: Queued,
    prepared: Prepared,
}

struct DisplayState {
    backend: Box<dyn CommitBackend>,
    active: Option<FrameComposition>,
    planes: Vec<PlaneId>,
}

struct Shared {
    output: OutputId,
    pipe: PipeId,
    test_commit: bool,
    epoch: Instant,
    state: Mutex<DisplayState>,
    renderer: Mutex<Renderer>,
    /// Bumped by every clear; older queue entries are discarded.
    generation: AtomicU64,
    clear_count: AtomicU64,
    in_flight: Mutex<Vec<(u64, SignalHandle)>>,
    pending: Receiver<Queued>,
    staged: Option<Receiver<Staged>>,
    tokens: Receiver<()>,
    events: Sender<FrameEvent>,
    trace: Option<SharedTraceSink>,
    on_applied: Option<AppliedHook>,
}

/// Serializes the commits of one output.
pub struct FrameScheduler {
    shared: Arc<Shared>,
    queue: Mutex<Option<Sender<Queued>>>,
    tokens: Sender<()>,
    events: Receiver<FrameEvent>,
    workers: Vec<JoinHandle<()>>,
}

impl core::fmt::Debug for FrameScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameScheduler")
            .field("output", &self.shared.output)
            .field("pipe", &self.shared.pipe)
            .field("outstanding", &self.tokens.len())
            .field("clear_count", &self.clear_count())
            .finish_non_exhaustive()
    }
}

impl FrameScheduler {
    /// Starts the workers of `output`, driving `pipe`.
    ///
    /// Worker threads are named `strata-stage-<output>` and
    /// `strata-commit-<output>`. `on_applied` runs under the display state
    /// lock and must not call back into this scheduler.
    pub fn new(
        output: OutputId,
        pipe: PipeId,
        config: &CompositorConfig,
        devices: OutputDevices,
        trace: Option<SharedTraceSink>,
        on_applied: Option<AppliedHook>,
    ) -> Result<Self, SchedulerError> {
        let config = config.clamped();
        let (queue_tx, queue_rx) = unbounded();
        let (token_tx, token_rx) = bounded(config.queue_depth);
        let (event_tx, event_rx) = bounded(EVENT_CAPACITY);
        let (staged_tx, staged_rx) = if config.decoupled_commit {
            let (tx, rx) = bounded(1);
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let shared = Arc::new(Shared {
            output,
            pipe,
            test_commit: config.test_commit,
            epoch: Instant::now(),
            state: Mutex::new(DisplayState {
                backend: devices.backend,
                active: None,
                planes: Vec::new(),
            }),
            renderer: Mutex::new(Renderer::new(devices.compositor)),
            generation: AtomicU64::new(0),
            clear_count: AtomicU64::new(0),
            in_flight: Mutex::new(Vec::new()),
            pending: queue_rx.clone(),
            staged: staged_rx.clone(),
            tokens: token_rx,
            events: event_tx,
            trace,
            on_applied,
        });

        let mut workers = Vec::with_capacity(2);
        if let Some(rx) = staged_rx {
            let shared = Arc::clone(&shared);
            workers.push(spawn(format!("strata-commit-{}", output.0), move || {
                commit_loop(&shared, &rx);
            })?);
        }
        {
            let shared = Arc::clone(&shared);
            workers.push(spawn(format!("strata-stage-{}", output.0), move || {
                stage_loop(&shared, &queue_rx, staged_tx.as_ref());
            })?);
        }
        log::debug!(
            "started scheduler for {output:?} on {pipe:?} (depth {}, decoupled {})",
            config.queue_depth,
            config.decoupled_commit
        );

        Ok(Self {
            shared,
            queue: Mutex::new(Some(queue_tx)),
            tokens: token_tx,
            events: event_rx,
            workers,
        })
    }

    /// Hands `comp` to the workers, blocking while the queue is full.
    ///
    /// An [`Empty`](CompositionKind::Empty) composition is accepted and
    /// dropped.
    pub fn queue(&self, comp: FrameComposition) -> Result<(), SchedulerError> {
        let output = self.shared.output;
        if comp.kind() == CompositionKind::Empty {
            log::trace!("ignoring empty composition for {output:?}");
            return Ok(());
        }
        let queue = self
            .queue
            .lock()
            .clone()
            .ok_or(SchedulerError::Closed(output))?;
        self.tokens
            .send(())
            .map_err(|_| SchedulerError::Closed(output))?;
        let permit = Permit(self.shared.tokens.clone());

        let frame_no = comp.frame_no();
        let generation = {
            let mut in_flight = self.shared.in_flight.lock();
            in_flight.push((frame_no, comp.timeline().signal_handle()));
            self.shared.generation.load(Ordering::Acquire)
        };
        queue
            .send(Queued {
                comp,
                generation,
                permit,
            })
            .map_err(|_| {
                self.shared.forget(frame_no);
                SchedulerError::Closed(output)
            })
    }

    /// Stops accepting compositions. Those already queued are still shown;
    /// [`queue`](Self::queue) fails with [`SchedulerError::Closed`] from now
    /// on.
    pub fn close(&self) {
        if self.queue.lock().take().is_some() {
            log::debug!("closed the queue of {:?}", self.shared.output);
        }
    }

    /// Force-signals every queued and shown composition, then turns the
    /// output's planes off. Returns the number of compositions signaled.
    pub fn clear_display(&self, reason: ClearReason) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.clear_display_locked(&mut state, reason)
    }

    /// Collapses the shown frame into a single composite on one plane and
    /// commits it again.
    ///
    /// Returns `false` if nothing is shown or the frame already uses one
    /// plane. Fails if the frame holds protected content. A rejected commit
    /// clears the display.
    pub fn squash_all(&self) -> Result<bool, SchedulerError> {
        let shared = &*self.shared;
        let mut guard = shared.state.lock();
        let state = &mut *guard;
        let Some(comp) = state.active.as_mut() else {
            return Ok(false);
        };
        if !comp.collapse_to_precomposition()? {
            return Ok(false);
        }
        let frame_no = comp.frame_no();
        let prepared = shared.renderer.lock().prepare(comp)?;
        let request = build_request(comp, &prepared, CommitMode::Apply)?;
        match shared.timed_commit(state.backend.as_mut(), &request, CommitMode::Apply, frame_no) {
            Ok(()) => {
                state.planes = request.planes.iter().map(|p| p.plane).collect();
                shared.emit(FrameEvent::FallbackComposited { frame_no });
                Ok(true)
            }
            Err(error) => {
                if let Some(comp) = state.active.take() {
                    shared.fail_commit(state, comp, error);
                }
                Err(Error::from(error).into())
            }
        }
    }

    /// The output served.
    #[must_use]
    pub fn output(&self) -> OutputId {
        self.shared.output
    }

    /// The pipe driven.
    #[must_use]
    pub fn pipe(&self) -> PipeId {
        self.shared.pipe
    }

    /// Receiver of this output's [`FrameEvent`]s.
    ///
    /// Receivers compete for events; keep one per output.
    #[must_use]
    pub fn events(&self) -> Receiver<FrameEvent> {
        self.events.clone()
    }

    /// Compositions accepted but not yet shown or discarded.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.tokens.len()
    }

    /// Compositions waiting for the stage worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.pending.len()
    }

    /// Number of times the display has been cleared.
    #[must_use]
    pub fn clear_count(&self) -> u64 {
        self.shared.clear_count.load(Ordering::Acquire)
    }

    /// Frame number of the composition being shown.
    #[must_use]
    pub fn active_frame(&self) -> Option<u64> {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .map(FrameComposition::frame_no)
    }

    /// Planes enabled by the last successful commit.
    #[must_use]
    pub fn active_planes(&self) -> Vec<PlaneId> {
        self.shared.state.lock().planes.clone()
    }

    pub(crate) fn elapsed_ns(&self) -> u64 {
        self.shared.now_ns()
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.close();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("a worker of {:?} panicked", self.shared.output);
            }
        }
        self.clear_display(ClearReason::Shutdown);
    }
}

fn spawn(
    name: String,
    body: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(body)
        .map_err(|source| SchedulerError::Spawn { name, source })
}

fn stage_loop(shared: &Shared, queue: &Receiver<Queued>, staged: Option<&Sender<Staged>>) {
    for queued in queue {
        if queued.generation != shared.generation.load(Ordering::Acquire) {
            continue;
        }
        let Some(item) = shared.stage(queued) else {
            continue;
        };
        match staged {
            Some(tx) => {
                if tx.send(item).is_err() {
                    break;
                }
            }
            None => shared.commit(item),
        }
    }
}

fn commit_loop(shared: &Shared, staged: &Receiver<Staged>) {
    for item in staged {
        shared.commit(item);
    }
}

impl Shared {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    fn trace(&self, emit: impl FnOnce(&mut Tracer<'_>)) {
        if let Some(sink) = &self.trace {
            let mut guard = sink.lock();
            let mut tracer = Tracer::new(&mut *guard);
            emit(&mut tracer);
        }
    }

    fn emit(&self, event: FrameEvent) {
        if let Err(err) = self.events.try_send(event) {
            log::debug!(
                "event queue of {:?} is full, dropping {:?}",
                self.output,
                err.into_inner()
            );
        }
    }

    fn forget(&self, frame_no: u64) {
        self.in_flight.lock().retain(|(n, _)| *n != frame_no);
    }

    /// Renders the off-screen buffers of a queued frame.
    fn stage(&self, mut queued: Queued) -> Option<Staged> {
        if queued.comp.kind() != CompositionKind::Frame {
            return Some(Staged {
                queued,
                prepared: Prepared::default(),
            });
        }
        let frame_no = queued.comp.frame_no();
        let start_ns = self.now_ns();
        let result = self.renderer.lock().prepare(&mut queued.comp);
        let end_ns = self.now_ns();
        self.trace(|t| {
            t.stage(&StageEvent {
                output: self.output,
                frame_no,
                stage: StageKind::Prepare,
                start_ns,
                end_ns,
            });
        });
        match result {
            Ok(prepared) => {
                if prepared.squash.is_some() {
                    let regions = queued.comp.squash_regions().len();
                    self.trace(|t| {
                        t.squash(&SquashEvent {
                            output: self.output,
                            frame_no,
                            regions: u32::try_from(regions).unwrap_or(u32::MAX),
                            reused: prepared.squash_reused,
                        });
                    });
                }
                Some(Staged { queued, prepared })
            }
            Err(error) => {
                self.fail_prepare(frame_no, error);
                None
            }
        }
    }

    /// Commits a prepared composition and retires the one it replaces.
    fn commit(&self, item: Staged) {
        let Staged { queued, prepared } = item;
        let Queued {
            comp,
            generation,
            permit,
        } = queued;
        let frame_no = comp.frame_no();
        let mut state = self.state.lock();
        if generation != self.generation.load(Ordering::Acquire) {
            log::debug!(
                "dropping frame {frame_no} of {:?} queued before a clear",
                self.output
            );
            return;
        }
        self.forget(frame_no);
        match comp.kind() {
            CompositionKind::Frame => self.apply_frame(&mut state, comp, prepared),
            CompositionKind::Dpms => self.apply_power(&mut state, comp),
            CompositionKind::Modeset => self.apply_mode(&mut state, comp),
            CompositionKind::Empty => {}
        }
        drop(permit);
    }

    fn apply_frame(&self, state: &mut DisplayState, mut comp: FrameComposition, prepared: Prepared) {
        let frame_no = comp.frame_no();
        let request = match self.stage_request(state, &mut comp, prepared) {
            Ok(request) => request,
            Err(error) => {
                self.fail_prepare(frame_no, error);
                return;
            }
        };
        match self.timed_commit(state.backend.as_mut(), &request, CommitMode::Apply, frame_no) {
            Ok(()) => {
                state.planes = request.planes.iter().map(|p| p.plane).collect();
                if let Some(previous) = state.active.replace(comp) {
                    log::trace!(
                        "retiring frame {} of {:?}",
                        previous.frame_no(),
                        self.output
                    );
                }
                if let Some(hook) = &self.on_applied {
                    hook(frame_no);
                }
                self.emit(FrameEvent::Presented { frame_no });
            }
            Err(error) => self.fail_commit(state, comp, error),
        }
    }

    /// Builds the real request, first dry-running frames whose geometry
    /// changed. A rejected dry run collapses the frame into one composite.
    fn stage_request(
        &self,
        state: &mut DisplayState,
        comp: &mut FrameComposition,
        mut prepared: Prepared,
    ) -> strata_core::Result<CommitRequest> {
        let frame_no = comp.frame_no();
        if self.test_commit && comp.geometry_changed() {
            let request = build_request(comp, &prepared, CommitMode::TestOnly)?;
            let dry_run =
                self.timed_commit(state.backend.as_mut(), &request, CommitMode::TestOnly, frame_no);
            if let Err(err) = dry_run {
                log::warn!(
                    "{:?} rejected frame {frame_no} in a dry run ({err}), compositing it",
                    self.output
                );
                match comp.collapse_to_precomposition() {
                    Ok(true) => {
                        prepared = self.renderer.lock().prepare(comp)?;
                        self.emit(FrameEvent::FallbackComposited { frame_no });
                    }
                    Ok(false) => {}
                    Err(err) => log::warn!("frame {frame_no} cannot fall back: {err}"),
                }
            }
        }
        build_request(comp, &prepared, CommitMode::Apply)
    }

    fn apply_power(&self, state: &mut DisplayState, comp: FrameComposition) {
        let frame_no = comp.frame_no();
        let Some(mode) = comp.power_mode() else {
            return;
        };
        match state.backend.set_power_mode(self.pipe, mode) {
            Ok(()) => {
                log::info!("{:?} power mode {mode:?}", self.output);
                if mode == PowerMode::Off {
                    self.clear_display_locked(state, ClearReason::PowerOff);
                }
                self.emit(FrameEvent::Presented { frame_no });
            }
            Err(error) => self.fail_commit(state, comp, error),
        }
    }

    fn apply_mode(&self, state: &mut DisplayState, comp: FrameComposition) {
        let frame_no = comp.frame_no();
        let Some(mode) = comp.display_mode() else {
            return;
        };
        match state.backend.set_display_mode(self.pipe, &mode) {
            Ok(()) => {
                log::info!(
                    "{:?} mode {}x{} @ {} mHz",
                    self.output,
                    mode.width,
                    mode.height,
                    mode.refresh_mhz
                );
                self.emit(FrameEvent::Presented { frame_no });
            }
            Err(error) => self.fail_commit(state, comp, error),
        }
    }

    fn timed_commit(
        &self,
        backend: &mut dyn CommitBackend,
        request: &CommitRequest,
        mode: CommitMode,
        frame_no: u64,
    ) -> Result<(), CommitError> {
        let start_ns = self.now_ns();
        let result = backend.commit(request, mode);
        let end_ns = self.now_ns();
        self.trace(|t| {
            t.stage(&StageEvent {
                output: self.output,
                frame_no,
                stage: match mode {
                    CommitMode::TestOnly => StageKind::TestCommit,
                    CommitMode::Apply => StageKind::Commit,
                },
                start_ns,
                end_ns,
            });
            t.commit(&CommitEvent {
                output: self.output,
                frame_no,
                timestamp_ns: end_ns,
                mode,
                planes: u32::try_from(request.planes.len()).unwrap_or(u32::MAX),
                ok: result.is_ok(),
            });
        });
        result
    }

    fn fail_prepare(&self, frame_no: u64, error: Error) {
        log::warn!("dropping frame {frame_no} of {:?}: {error}", self.output);
        self.forget(frame_no);
        self.emit(FrameEvent::PrepareFailed { frame_no, error });
    }

    fn fail_commit(&self, state: &mut DisplayState, comp: FrameComposition, error: CommitError) {
        let frame_no = comp.frame_no();
        log::error!("{:?} rejected frame {frame_no}: {error}", self.output);
        drop(comp);
        self.clear_display_locked(state, ClearReason::CommitFailed);
        self.emit(FrameEvent::CommitFailed { frame_no, error });
    }

    fn clear_display_locked(&self, state: &mut DisplayState, reason: ClearReason) -> usize {
        let handles = {
            let mut in_flight = self.in_flight.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            std::mem::take(&mut *in_flight)
        };
        for (_, handle) in &handles {
            handle.signal_all();
        }
        self.pending.try_iter().for_each(drop);
        if let Some(staged) = &self.staged {
            staged.try_iter().for_each(drop);
        }
        let mut compositions = handles.len();
        if state.active.take().is_some() {
            compositions += 1;
        }
        self.renderer.lock().forget_squash();

        let planes = std::mem::take(&mut state.planes);
        if !planes.is_empty() {
            state.backend.disable_planes(self.pipe, &planes);
        }
        let count = self.clear_count.fetch_add(1, Ordering::AcqRel) + 1;
        match reason {
            ClearReason::CommitFailed => log::error!(
                "cleared {:?} after a failed commit ({compositions} compositions, clear #{count})",
                self.output
            ),
            _ => log::info!(
                "cleared {:?} ({reason:?}, {compositions} compositions)",
                self.output
            ),
        }

        let timestamp_ns = self.now_ns();
        self.trace(|t| {
            t.clear(&ClearEvent {
                output: self.output,
                timestamp_ns,
                reason,
                compositions: u32::try_from(compositions).unwrap_or(u32::MAX),
            });
        });
        self.emit(FrameEvent::DisplayCleared {
            reason,
            compositions,
        });
        compositions
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use strata_core::backend::{CompositeTarget, ResourceEnumerator};
    use strata_core::composition::FrameComposition;
    use strata_core::fence::{Fence, SoftwareTimelineFactory};
    use strata_core::planner::{Planner, PlannerConfig};
    use strata_harness::{
        BackendProbe, CompositorProbe, FakeCompositor, FakeImporter, FakeResources,
        ScriptedBackend, layer_stack, protected_layer, DISPLAY,
    };

    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Rig {
        scheduler: Arc<FrameScheduler>,
        events: Receiver<FrameEvent>,
        backend: BackendProbe,
        compositor: CompositorProbe,
        importer: Arc<FakeImporter>,
        resources: FakeResources,
        planner: Planner,
    }

    fn make_rig(config: CompositorConfig) -> Rig {
        let (backend, backend_probe) = ScriptedBackend::new();
        let (compositor, compositor_probe) = FakeCompositor::new();
        let scheduler = FrameScheduler::new(
            OutputId(0),
            PipeId(0),
            &config,
            OutputDevices {
                backend: Box::new(backend),
                compositor: Box::new(compositor),
            },
            None,
            None,
        )
        .unwrap();
        let events = scheduler.events();
        Rig {
            scheduler: Arc::new(scheduler),
            events,
            backend: backend_probe,
            compositor: compositor_probe,
            importer: FakeImporter::new(),
            resources: FakeResources::uniform(3),
            planner: Planner::new(PlannerConfig::DEFAULT),
        }
    }

    impl Rig {
        fn frame(&self, frame_no: u64, layers: usize, geometry_changed: bool) -> FrameComposition {
            let mut comp = FrameComposition::new(
                PipeId(0),
                self.importer.clone(),
                &SoftwareTimelineFactory,
            )
            .unwrap();
            comp.set_frame_no(frame_no);
            comp.set_layers(layer_stack(frame_no * 10, layers), geometry_changed)
                .unwrap();
            let mut usable = self.resources.usable_planes(PipeId(0));
            comp.plan(&self.planner, None, &mut usable).unwrap();
            comp
        }

        fn wait_for(&self, want: impl Fn(&FrameEvent) -> bool) -> FrameEvent {
            loop {
                let event = self.events.recv_timeout(TIMEOUT).expect("scheduler event");
                if want(&event) {
                    return event;
                }
            }
        }

        fn wait_presented(&self, frame_no: u64) {
            self.wait_for(|e| *e == FrameEvent::Presented { frame_no });
        }
    }

    fn release_fences(comp: &FrameComposition) -> Vec<Fence> {
        comp.layers()
            .iter()
            .filter_map(|l| l.release_fence().cloned())
            .collect()
    }

    #[test]
    fn frames_present_in_order_and_retire_their_predecessor() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        let first = rig.frame(1, 3, true);
        let fences = release_fences(&first);
        assert_eq!(fences.len(), 3);

        rig.scheduler.queue(first).unwrap();
        rig.wait_presented(1);
        assert!(
            fences.iter().all(|f| !f.is_signaled()),
            "shown buffers stay held"
        );

        rig.scheduler.queue(rig.frame(2, 3, false)).unwrap();
        rig.wait_presented(2);
        assert!(fences.iter().all(Fence::is_signaled), "retired on commit of 2");
        assert_eq!(rig.scheduler.active_frame(), Some(2));

        let applied = rig.backend.applied();
        assert_eq!(applied.len(), 2);
        assert_eq!(applied[1].planes.len(), 3);
        assert_eq!(rig.importer.outstanding(), 3, "only frame 2 stays imported");
    }

    #[test]
    fn queue_blocks_beyond_its_depth() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        rig.backend.hold();
        rig.scheduler.queue(rig.frame(1, 2, false)).unwrap();
        assert_eq!(rig.scheduler.outstanding(), 1);

        let (done_tx, done_rx) = bounded(1);
        let scheduler = Arc::clone(&rig.scheduler);
        let second = rig.frame(2, 2, false);
        let producer = thread::spawn(move || {
            scheduler.queue(second).unwrap();
            done_tx.send(()).unwrap();
        });
        assert!(
            done_rx.recv_timeout(Duration::from_millis(100)).is_err(),
            "second frame must wait for the first"
        );
        assert!(rig.scheduler.outstanding() <= 1);

        rig.backend.release();
        done_rx.recv_timeout(TIMEOUT).unwrap();
        producer.join().unwrap();
        rig.wait_presented(2);
    }

    #[test]
    fn clear_display_signals_queued_and_active_frames() {
        let config = CompositorConfig {
            queue_depth: 3,
            ..CompositorConfig::DEFAULT
        };
        let rig = make_rig(config);
        rig.backend.hold();
        let mut fences = Vec::new();
        for frame_no in 1..=3 {
            let comp = rig.frame(frame_no, 2, false);
            fences.extend(release_fences(&comp));
            rig.scheduler.queue(comp).unwrap();
        }

        let scheduler = Arc::clone(&rig.scheduler);
        let clearer = thread::spawn(move || scheduler.clear_display(ClearReason::Requested));
        rig.backend.release();
        clearer.join().unwrap();

        assert!(fences.iter().all(Fence::is_signaled), "nothing left pending");
        assert_eq!(rig.scheduler.queued(), 0);
        assert!(rig.scheduler.clear_count() >= 1);
        rig.wait_for(|e| {
            matches!(
                e,
                FrameEvent::DisplayCleared {
                    reason: ClearReason::Requested,
                    ..
                }
            )
        });
    }

    #[test]
    fn commit_failure_clears_exactly_once() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        let first = rig.frame(1, 3, false);
        let mut fences = release_fences(&first);
        rig.scheduler.queue(first).unwrap();
        rig.wait_presented(1);

        rig.backend.fail_next_apply(-16);
        let second = rig.frame(2, 3, false);
        fences.extend(release_fences(&second));
        rig.scheduler.queue(second).unwrap();
        let cleared = rig.wait_for(|e| matches!(e, FrameEvent::DisplayCleared { .. }));
        assert_eq!(
            cleared,
            FrameEvent::DisplayCleared {
                reason: ClearReason::CommitFailed,
                compositions: 1,
            }
        );
        let failed = rig.wait_for(|e| matches!(e, FrameEvent::CommitFailed { .. }));
        assert_eq!(
            failed,
            FrameEvent::CommitFailed {
                frame_no: 2,
                error: CommitError { code: -16 },
            }
        );
        assert_eq!(rig.scheduler.clear_count(), 1);
        assert!(fences.iter().all(Fence::is_signaled));
        assert_eq!(rig.scheduler.active_frame(), None);
        assert_eq!(rig.backend.disables().len(), 1, "planes of frame 1 turned off");

        rig.scheduler.queue(rig.frame(3, 1, false)).unwrap();
        rig.wait_presented(3);
        assert_eq!(rig.scheduler.clear_count(), 1);
    }

    #[test]
    fn rejected_dry_run_falls_back_to_one_composite() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        rig.backend.reject_tests_above(1);
        rig.scheduler.queue(rig.frame(1, 3, true)).unwrap();
        rig.wait_for(|e| *e == FrameEvent::FallbackComposited { frame_no: 1 });
        rig.wait_presented(1);

        let applied = rig.backend.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].planes.len(), 1);
        assert_eq!(applied[0].disables.len(), 2);
        assert_eq!(rig.compositor.count(CompositeTarget::Precomposition), 1);
        assert_eq!(rig.scheduler.clear_count(), 0, "dry-run failure is benign");
    }

    #[test]
    fn dry_run_is_skipped_without_geometry_change() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        rig.scheduler.queue(rig.frame(1, 2, false)).unwrap();
        rig.wait_presented(1);
        assert!(
            rig.backend
                .commits()
                .iter()
                .all(|c| c.mode == CommitMode::Apply)
        );
    }

    #[test]
    fn squash_all_collapses_the_shown_frame() {
        let rig = make_rig(CompositorConfig::low_latency());
        rig.scheduler.queue(rig.frame(1, 3, false)).unwrap();
        rig.wait_presented(1);

        assert!(rig.scheduler.squash_all().unwrap());
        assert_eq!(rig.scheduler.active_planes().len(), 1);
        let last = rig.backend.applied().pop().unwrap();
        assert_eq!(last.planes.len(), 1);
        assert_eq!(last.disables.len(), 2);
        rig.wait_for(|e| *e == FrameEvent::FallbackComposited { frame_no: 1 });

        assert!(!rig.scheduler.squash_all().unwrap(), "already one plane");
    }

    #[test]
    fn squash_all_refuses_protected_content() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        let mut comp =
            FrameComposition::new(PipeId(0), rig.importer.clone(), &SoftwareTimelineFactory)
                .unwrap();
        let mut layers = layer_stack(1, 1);
        layers.push(protected_layer(9, DISPLAY));
        comp.set_layers(layers, false).unwrap();
        let mut usable = rig.resources.usable_planes(PipeId(0));
        comp.plan(&rig.planner, None, &mut usable).unwrap();
        comp.set_frame_no(1);
        rig.scheduler.queue(comp).unwrap();
        rig.wait_presented(1);

        assert!(rig.scheduler.squash_all().is_err());
        assert_eq!(rig.scheduler.active_frame(), Some(1), "frame keeps its plan");
    }

    #[test]
    fn prepare_failure_keeps_previous_frame() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        rig.scheduler.queue(rig.frame(1, 2, false)).unwrap();
        rig.wait_presented(1);

        rig.compositor.fail(true);
        let second = rig.frame(2, 5, false);
        let fences = release_fences(&second);
        rig.scheduler.queue(second).unwrap();
        let failed = rig.wait_for(|e| matches!(e, FrameEvent::PrepareFailed { .. }));
        assert!(matches!(
            failed,
            FrameEvent::PrepareFailed {
                frame_no: 2,
                error: Error::CompositeFailed(_),
            }
        ));
        assert!(fences.iter().all(Fence::is_signaled), "dropped frame is released");
        assert_eq!(rig.scheduler.active_frame(), Some(1));
        assert_eq!(rig.scheduler.clear_count(), 0);
    }

    #[test]
    fn power_off_clears_the_display() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        let first = rig.frame(1, 2, false);
        let fences = release_fences(&first);
        rig.scheduler.queue(first).unwrap();
        rig.wait_presented(1);

        let mut dpms =
            FrameComposition::new(PipeId(0), rig.importer.clone(), &SoftwareTimelineFactory)
                .unwrap();
        dpms.set_dpms(PowerMode::Off).unwrap();
        dpms.set_frame_no(2);
        rig.scheduler.queue(dpms).unwrap();
        rig.wait_for(|e| {
            matches!(
                e,
                FrameEvent::DisplayCleared {
                    reason: ClearReason::PowerOff,
                    ..
                }
            )
        });
        assert_eq!(rig.backend.power_modes(), [(PipeId(0), PowerMode::Off)]);
        assert!(fences.iter().all(Fence::is_signaled));
        assert_eq!(rig.importer.outstanding(), 0);
    }

    #[test]
    fn empty_composition_is_a_no_op() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        let empty =
            FrameComposition::new(PipeId(0), rig.importer.clone(), &SoftwareTimelineFactory)
                .unwrap();
        rig.scheduler.queue(empty).unwrap();
        assert_eq!(rig.scheduler.outstanding(), 0);
        assert!(rig.backend.commits().is_empty());
    }

    #[test]
    fn closed_scheduler_rejects_new_frames() {
        let rig = make_rig(CompositorConfig::DEFAULT);
        rig.scheduler.queue(rig.frame(1, 2, false)).unwrap();
        rig.scheduler.close();
        rig.wait_presented(1);

        let comp = rig.frame(2, 2, false);
        let fences = release_fences(&comp);
        let err = rig.scheduler.queue(comp).unwrap_err();
        assert!(matches!(err, SchedulerError::Closed(OutputId(0))));
        assert!(fences.iter().all(Fence::is_signaled), "rejected frame is retired");
        assert_eq!(rig.scheduler.active_frame(), Some(1));
    }

    #[test]
    fn applied_hook_sees_every_presented_frame() {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&applied);
        let (backend, backend_probe) = ScriptedBackend::new();
        let (compositor, _) = FakeCompositor::new();
        let scheduler = FrameScheduler::new(
            OutputId(0),
            PipeId(0),
            &CompositorConfig::DEFAULT,
            OutputDevices {
                backend: Box::new(backend),
                compositor: Box::new(compositor),
            },
            None,
            Some(Box::new(move |frame_no| seen.lock().push(frame_no))),
        )
        .unwrap();
        let rig = Rig {
            events: scheduler.events(),
            scheduler: Arc::new(scheduler),
            backend: backend_probe,
            ..make_rig(CompositorConfig::DEFAULT)
        };

        rig.backend.fail_next_apply(-22);
        rig.scheduler.queue(rig.frame(1, 2, false)).unwrap();
        rig.wait_for(|e| matches!(e, FrameEvent::CommitFailed { frame_no: 1, .. }));
        rig.scheduler.queue(rig.frame(2, 2, false)).unwrap();
        rig.scheduler.queue(rig.frame(3, 1, false)).unwrap();
        rig.wait_presented(3);
        assert_eq!(*applied.lock(), [2, 3], "rejected frames are not reported");
    }

    #[test]
    fn drop_clears_with_shutdown() {
        let Rig {
            scheduler,
            events,
            backend,
            importer,
            resources,
            planner,
            ..
        } = make_rig(CompositorConfig::low_latency());
        let mut comp =
            FrameComposition::new(PipeId(0), importer.clone(), &SoftwareTimelineFactory).unwrap();
        comp.set_layers(layer_stack(1, 2), false).unwrap();
        let mut usable = resources.usable_planes(PipeId(0));
        comp.plan(&planner, None, &mut usable).unwrap();
        let fences = release_fences(&comp);
        scheduler.queue(comp).unwrap();
        loop {
            if let FrameEvent::Presented { .. } = events.recv_timeout(TIMEOUT).unwrap() {
                break;
            }
        }

        drop(scheduler);
        assert!(fences.iter().all(Fence::is_signaled));
        assert_eq!(importer.outstanding(), 0);
        assert_eq!(backend.disables().len(), 1);
    }
}
