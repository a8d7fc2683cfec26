// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The multi-output compositor façade.
//!
//! [`Compositor`] owns the platform collaborators, the plane roster shared by
//! every output and one [`FrameScheduler`] per output. Planning runs on the
//! caller's thread under the roster lock, so two outputs never claim the same
//! plane; everything after planning runs on the output's own workers. A
//! plane an output gives up stays claimed until the commit turning it off
//! has been applied.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use hashbrown::HashMap;
use parking_lot::Mutex;
use strata_core::backend::{BufferImporter, ResourceEnumerator};
use strata_core::composition::{CompositionKind, DisplayMode, FrameComposition, PowerMode};
use strata_core::config::CompositorConfig;
use strata_core::error::{Error, StateError};
use strata_core::fence::{Fence, TimelineFactory};
use strata_core::output::{OutputId, PipeId};
use strata_core::plane::{PlaneId, PlaneRoster};
use strata_core::planner::Planner;
use strata_core::squash::ChangeHistoryCache;
use strata_core::trace::{ClearReason, PlanEvent, StageEvent, StageKind, Tracer};

use crate::error::SchedulerError;
use crate::scheduler::{AppliedHook, FrameEvent, FrameScheduler, OutputDevices, SharedTraceSink};

/// A composition accepted by [`Compositor::queue_composition`].
#[derive(Clone, Debug)]
pub struct QueuedFrame {
    /// Frame number assigned at creation.
    pub frame_no: u64,
    /// Release fence of each layer, front to back. A fence signals once the
    /// layer's buffer is no longer read.
    pub release_fences: Vec<Option<Fence>>,
}

/// Planning state of one output, locked from planning until the frame is
/// queued.
#[derive(Debug)]
struct Planning {
    squash: Option<ChangeHistoryCache>,
    /// Number of the last frame queued.
    last_queued: Option<u64>,
}

#[derive(Debug)]
struct OutputSlot {
    pipe: PipeId,
    next_frame: u64,
    planning: Arc<Mutex<Planning>>,
    scheduler: Arc<FrameScheduler>,
}

/// Plans and schedules frames for every output of a device.
///
/// # Locking
///
/// Each output has a planning lock, held from planning a frame until it is
/// queued, so frames reach the scheduler in the order they were planned.
/// The output table and the plane roster each sit behind a short-lived
/// mutex; the roster is also locked by the commit workers, which free
/// planes once a commit has turned them off.
pub struct Compositor {
    config: CompositorConfig,
    planner: Planner,
    resources: Arc<dyn ResourceEnumerator>,
    importer: Arc<dyn BufferImporter>,
    timelines: Arc<dyn TimelineFactory>,
    trace: Option<SharedTraceSink>,
    outputs: Mutex<HashMap<OutputId, OutputSlot>>,
    roster: Arc<Mutex<PlaneRoster>>,
}

impl core::fmt::Debug for Compositor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Compositor")
            .field("config", &self.config)
            .field("outputs", &self.outputs())
            .finish_non_exhaustive()
    }
}

fn unknown(output: OutputId) -> SchedulerError {
    Error::from(StateError::UnknownOutput(output)).into()
}

impl Compositor {
    /// Creates a compositor with no outputs. `config` is clamped to its
    /// valid ranges.
    #[must_use]
    pub fn new(
        config: CompositorConfig,
        resources: Arc<dyn ResourceEnumerator>,
        importer: Arc<dyn BufferImporter>,
        timelines: Arc<dyn TimelineFactory>,
    ) -> Self {
        let config = config.clamped();
        Self {
            planner: Planner::new(config.planner),
            config,
            resources,
            importer,
            timelines,
            trace: None,
            outputs: Mutex::new(HashMap::new()),
            roster: Arc::new(Mutex::new(PlaneRoster::new())),
        }
    }

    /// Sends trace events of outputs added afterwards to `sink`.
    #[must_use]
    pub fn with_trace_sink(mut self, sink: SharedTraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Effective configuration.
    #[must_use]
    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    /// Starts scheduling `output` on `pipe`.
    pub fn add_output(
        &self,
        output: OutputId,
        pipe: PipeId,
        devices: OutputDevices,
    ) -> Result<(), SchedulerError> {
        let mut outputs = self.outputs.lock();
        if outputs.contains_key(&output) {
            return Err(Error::from(StateError::DuplicateOutput(output)).into());
        }
        let roster = Arc::clone(&self.roster);
        let on_applied: AppliedHook = Box::new(move |frame_no| {
            let freed = roster.lock().release_disabled(output, frame_no);
            if !freed.is_empty() {
                log::debug!("frame {frame_no} of {output:?} turned off {freed:?}");
            }
        });
        let scheduler = FrameScheduler::new(
            output,
            pipe,
            &self.config,
            devices,
            self.trace.clone(),
            Some(on_applied),
        )?;
        outputs.insert(
            output,
            OutputSlot {
                pipe,
                next_frame: 1,
                planning: Arc::new(Mutex::new(Planning {
                    squash: self.new_squash_cache(),
                    last_queued: None,
                })),
                scheduler: Arc::new(scheduler),
            },
        );
        log::info!("added {output:?} on {pipe:?}");
        Ok(())
    }

    /// Stops scheduling `output`, clearing its display and freeing its
    /// planes.
    pub fn remove_output(&self, output: OutputId) -> Result<(), SchedulerError> {
        let slot = self
            .outputs
            .lock()
            .remove(&output)
            .ok_or_else(|| unknown(output))?;
        // Joins the workers; the planes stay claimed until they are off.
        drop(slot);
        self.roster.lock().release_output(output);
        log::info!("removed {output:?}");
        Ok(())
    }

    /// Outputs being scheduled, sorted.
    #[must_use]
    pub fn outputs(&self) -> Vec<OutputId> {
        let mut outputs: Vec<OutputId> = self.outputs.lock().keys().copied().collect();
        outputs.sort_unstable();
        outputs
    }

    /// Scheduler of `output`.
    #[must_use]
    pub fn scheduler(&self, output: OutputId) -> Option<Arc<FrameScheduler>> {
        self.outputs
            .lock()
            .get(&output)
            .map(|slot| Arc::clone(&slot.scheduler))
    }

    /// Event receiver of `output`. See [`FrameScheduler::events`].
    #[must_use]
    pub fn events(&self, output: OutputId) -> Option<Receiver<FrameEvent>> {
        self.scheduler(output).map(|s| s.events())
    }

    /// Planes claimed by `output`, including planes it stopped using that
    /// are not turned off yet.
    #[must_use]
    pub fn planes_held(&self, output: OutputId) -> Vec<PlaneId> {
        self.roster.lock().held_by(output)
    }

    /// Creates an empty composition for `output`, numbered after the last
    /// one created.
    pub fn create_composition(&self, output: OutputId) -> Result<FrameComposition, SchedulerError> {
        let mut outputs = self.outputs.lock();
        let slot = outputs.get_mut(&output).ok_or_else(|| unknown(output))?;
        let mut comp = FrameComposition::new(slot.pipe, Arc::clone(&self.importer), &*self.timelines)?;
        comp.set_frame_no(slot.next_frame);
        slot.next_frame += 1;
        Ok(comp)
    }

    /// Plans `comp` against the planes free for `output` and queues it.
    ///
    /// Planes the output held for its previous frame but no longer uses are
    /// turned off by this frame's commit. Other outputs can claim them once
    /// that commit has been applied. Blocks while the output's queue is
    /// full. A frame that cannot be planned or queued is rejected here; the
    /// plane claims and squash history stay as they were and the frame on
    /// screen stays.
    pub fn queue_composition(
        &self,
        output: OutputId,
        mut comp: FrameComposition,
    ) -> Result<QueuedFrame, SchedulerError> {
        let (pipe, planning, scheduler) = self.slot(output)?;
        let mut planning = planning.lock();
        let kind = comp.kind();
        let frame_no = comp.frame_no();

        let mut squash = planning.squash.clone();
        let claims_before = if kind == CompositionKind::Frame {
            Some(self.plan_frame(output, pipe, &scheduler, &mut comp, squash.as_mut())?)
        } else {
            None
        };

        let release_fences = comp
            .layers()
            .iter()
            .map(|l| l.release_fence().cloned())
            .collect();
        if let Err(err) = scheduler.queue(comp) {
            if let Some(before) = claims_before {
                self.roster.lock().restore(output, &before);
            }
            return Err(err);
        }

        match kind {
            CompositionKind::Frame => {
                planning.squash = squash;
                planning.last_queued = Some(frame_no);
            }
            // The next frame sees a different display.
            CompositionKind::Dpms | CompositionKind::Modeset => {
                planning.squash = self.new_squash_cache();
            }
            CompositionKind::Empty => {}
        }
        Ok(QueuedFrame {
            frame_no,
            release_fences,
        })
    }

    /// Plans `comp` and claims its planes, returning the roster as it was
    /// before.
    fn plan_frame(
        &self,
        output: OutputId,
        pipe: PipeId,
        scheduler: &FrameScheduler,
        comp: &mut FrameComposition,
        squash: Option<&mut ChangeHistoryCache>,
    ) -> Result<PlaneRoster, SchedulerError> {
        let start_ns = scheduler.elapsed_ns();
        let mut roster = self.roster.lock();
        let mut usable = roster.available_to(output, self.resources.usable_planes(pipe));
        comp.plan(&self.planner, squash, &mut usable)?;

        let before = roster.clone();
        let claimed: Vec<PlaneId> = comp.composition_plan().enabled_planes().collect();
        let released = roster.assign(output, &claimed, comp.frame_no())?;
        let unlisted: Vec<PlaneId> = released
            .into_iter()
            .filter(|plane| {
                !comp
                    .composition_plan()
                    .entries()
                    .iter()
                    .any(|e| e.plane() == *plane)
            })
            .collect();
        if let Err(err) = unlisted
            .into_iter()
            .try_for_each(|plane| comp.add_plane_disable(plane))
        {
            roster.restore(output, &before);
            return Err(err.into());
        }
        drop(roster);

        let end_ns = scheduler.elapsed_ns();
        self.trace(|t| {
            t.stage(&StageEvent {
                output,
                frame_no: comp.frame_no(),
                stage: StageKind::Plan,
                start_ns,
                end_ns,
            });
            t.plan(&PlanEvent::new(
                output,
                comp.frame_no(),
                end_ns,
                comp.layers().len(),
                comp.composition_plan(),
            ));
        });
        log::trace!(
            "planned frame {} of {output:?}: {:?}",
            comp.frame_no(),
            comp.composition_plan().fidelity()
        );
        Ok(before)
    }

    /// Queues a power mode change for `output`, returning its frame number.
    ///
    /// Powering off clears the display once the change reaches the commit
    /// worker. The output keeps its planes; use [`Self::clear_display`] to
    /// hand them to other outputs.
    pub fn set_power_mode(&self, output: OutputId, mode: PowerMode) -> Result<u64, SchedulerError> {
        self.queue_control(output, |comp| comp.set_dpms(mode))
    }

    /// Queues a mode set for `output`, returning its frame number.
    pub fn set_display_mode(
        &self,
        output: OutputId,
        mode: DisplayMode,
    ) -> Result<u64, SchedulerError> {
        self.queue_control(output, |comp| comp.set_display_mode(mode))
    }

    /// Clears the display of `output` now and frees its planes.
    ///
    /// Returns the number of compositions force-signaled.
    pub fn clear_display(&self, output: OutputId) -> Result<usize, SchedulerError> {
        let (_, planning, scheduler) = self.slot(output)?;
        let mut planning = planning.lock();
        let signaled = scheduler.clear_display(ClearReason::Requested);
        self.roster.lock().release_output(output);
        planning.squash = self.new_squash_cache();
        Ok(signaled)
    }

    /// Collapses the frame shown on `output` onto a single plane. See
    /// [`FrameScheduler::squash_all`].
    ///
    /// If the collapsed frame is the last one queued, the planes it gave up
    /// are free for other outputs straight away.
    pub fn squash_all(&self, output: OutputId) -> Result<bool, SchedulerError> {
        let (_, planning, scheduler) = self.slot(output)?;
        let planning = planning.lock();
        let collapsed = scheduler.squash_all()?;
        if let Some(frame_no) = planning.last_queued
            && collapsed
            && scheduler.active_frame() == Some(frame_no)
        {
            let planes = scheduler.active_planes();
            let mut roster = self.roster.lock();
            roster.assign(output, &planes, frame_no)?;
            let freed = roster.release_disabled(output, frame_no);
            log::debug!("squashed {output:?} onto {planes:?}, freed {freed:?}");
        }
        Ok(collapsed)
    }

    fn slot(
        &self,
        output: OutputId,
    ) -> Result<(PipeId, Arc<Mutex<Planning>>, Arc<FrameScheduler>), SchedulerError> {
        self.outputs
            .lock()
            .get(&output)
            .map(|slot| {
                (
                    slot.pipe,
                    Arc::clone(&slot.planning),
                    Arc::clone(&slot.scheduler),
                )
            })
            .ok_or_else(|| unknown(output))
    }

    fn queue_control(
        &self,
        output: OutputId,
        set: impl FnOnce(&mut FrameComposition) -> strata_core::Result<()>,
    ) -> Result<u64, SchedulerError> {
        let mut comp = self.create_composition(output)?;
        set(&mut comp)?;
        Ok(self.queue_composition(output, comp)?.frame_no)
    }

    fn new_squash_cache(&self) -> Option<ChangeHistoryCache> {
        self.config
            .squash
            .then(|| ChangeHistoryCache::new(self.config.history_length))
    }

    fn trace(&self, emit: impl FnOnce(&mut Tracer<'_>)) {
        if let Some(sink) = &self.trace {
            let mut guard = sink.lock();
            let mut tracer = Tracer::new(&mut *guard);
            emit(&mut tracer);
        }
    }
}
