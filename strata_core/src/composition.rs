// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The per-frame composition of one output.
//!
//! A [`FrameComposition`] starts [`Empty`](CompositionKind::Empty) and becomes
//! exactly one of:
//!
//! - a **frame**: a layer stack that is planned onto planes,
//! - a **DPMS** change: a new power state for the display,
//! - a **modeset**: a new display mode.
//!
//! Planning a frame is transactional. [`plan`](FrameComposition::plan) works
//! on a copy of the squash cache and on local plane lists, and only writes
//! them back once every step (plane allocation, region split, fence
//! creation) has succeeded.
//!
//! Release fences are grouped by what consumes each buffer last:
//!
//! | group | signaled when |
//! |---|---|
//! | squash-only layers | the squash composite has been rendered |
//! | precomposition-only layers | the precomposition has been rendered |
//! | everything else | the composition is retired |
//!
//! A layer belongs to the highest group it appears in, direct scan-out
//! ranking above precomposition above squash.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use bitvec::vec::BitVec;

use crate::backend::{BufferImporter, ImportedBuffer};
use crate::error::{PlaneShortage, Result, StateError};
use crate::fence::{Fence, FenceTimeline, TimelineFactory};
use crate::geometry::IntRect;
use crate::layer::{Layer, LayerFlags};
use crate::output::PipeId;
use crate::plane::{PlaneId, UsablePlanes};
use crate::planner::{CompositionPlan, CompositionPlanEntry, DegradeReason, Planner};
use crate::region::{RegionSplitter, low_bits};
use crate::squash::ChangeHistoryCache;

/// What a composition does once committed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum CompositionKind {
    /// Nothing yet. Queueing an empty composition is a no-op.
    #[default]
    Empty,
    /// Show a layer stack.
    Frame,
    /// Change the display power state.
    Dpms,
    /// Change the display mode.
    Modeset,
}

/// Display power state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PowerMode {
    /// Fully on.
    On,
    /// Low-power standby.
    Standby,
    /// Suspended.
    Suspend,
    /// Off. Powering off clears the display.
    Off,
}

/// A display timing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DisplayMode {
    /// Horizontal resolution in pixels.
    pub width: u32,
    /// Vertical resolution in pixels.
    pub height: u32,
    /// Refresh rate in millihertz.
    pub refresh_mhz: u32,
}

/// An area of an off-screen composite and the layers drawn into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompositionRegion {
    /// Area on the display.
    pub frame: IntRect,
    /// Source layers, front to back.
    pub source_layers: Vec<usize>,
}

/// Which milestone releases a layer's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ReleaseGroup {
    Squash,
    Precomposition,
    Direct,
}

/// Fences created for one plan, before assignment.
#[derive(Debug)]
struct ReleaseFences {
    per_layer: Vec<(usize, Fence)>,
    squash_done: u64,
    pre_comp_done: u64,
    squash_buffer: Option<Fence>,
}

/// One output's composition for one frame.
pub struct FrameComposition {
    pipe: PipeId,
    importer: Arc<dyn BufferImporter>,
    timeline: FenceTimeline,
    kind: CompositionKind,
    frame_no: u64,
    geometry_changed: bool,
    layers: Vec<Layer>,
    imported: Vec<ImportedBuffer>,
    plan: CompositionPlan,
    splitter: RegionSplitter,
    squash_regions: Vec<CompositionRegion>,
    pre_comp_regions: Vec<CompositionRegion>,
    reuse_squash: bool,
    squash_buffer_fence: Option<Fence>,
    power_mode: Option<PowerMode>,
    display_mode: Option<DisplayMode>,
}

impl fmt::Debug for FrameComposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameComposition")
            .field("pipe", &self.pipe)
            .field("kind", &self.kind)
            .field("frame_no", &self.frame_no)
            .field("layers", &self.layers.len())
            .field("entries", &self.plan.entries())
            .field("timeline", &self.timeline)
            .finish_non_exhaustive()
    }
}

impl FrameComposition {
    /// Creates an empty composition for `pipe` with a fresh fence timeline.
    pub fn new(
        pipe: PipeId,
        importer: Arc<dyn BufferImporter>,
        timelines: &dyn TimelineFactory,
    ) -> Result<Self> {
        Ok(Self {
            pipe,
            importer,
            timeline: FenceTimeline::new(timelines.create_timeline()?),
            kind: CompositionKind::Empty,
            frame_no: 0,
            geometry_changed: false,
            layers: Vec::new(),
            imported: Vec::new(),
            plan: CompositionPlan::new(),
            splitter: RegionSplitter::default(),
            squash_regions: Vec::new(),
            pre_comp_regions: Vec::new(),
            reuse_squash: false,
            squash_buffer_fence: None,
            power_mode: None,
            display_mode: None,
        })
    }

    fn check_kind(&self, requested: CompositionKind) -> Result<()> {
        if self.kind == CompositionKind::Empty || self.kind == requested {
            Ok(())
        } else {
            Err(StateError::KindMismatch {
                current: self.kind,
                requested,
            }
            .into())
        }
    }

    fn require_frame(&self) -> Result<()> {
        if self.kind == CompositionKind::Frame {
            Ok(())
        } else {
            Err(StateError::NotAFrame(self.kind).into())
        }
    }

    /// Turns the composition into a frame showing `layers`, front to back.
    ///
    /// Every layer's buffer is imported. If one import fails, the buffers
    /// imported so far are released and the composition is left unchanged.
    /// `geometry_changed` rebuilds the squash cache and requests a dry-run
    /// commit.
    pub fn set_layers(&mut self, layers: Vec<Layer>, geometry_changed: bool) -> Result<()> {
        self.check_kind(CompositionKind::Frame)?;

        let mut imported = Vec::with_capacity(layers.len());
        for layer in &layers {
            match self.importer.import_buffer(layer.buffer) {
                Ok(buffer) => imported.push(buffer),
                Err(err) => {
                    for buffer in imported {
                        self.importer.release_buffer(buffer);
                    }
                    return Err(err.into());
                }
            }
        }
        for buffer in self.imported.drain(..) {
            self.importer.release_buffer(buffer);
        }

        self.kind = CompositionKind::Frame;
        self.layers = layers;
        self.imported = imported;
        self.geometry_changed = geometry_changed;
        Ok(())
    }

    /// Turns the composition into a power state change.
    pub fn set_dpms(&mut self, mode: PowerMode) -> Result<()> {
        self.check_kind(CompositionKind::Dpms)?;
        self.kind = CompositionKind::Dpms;
        self.power_mode = Some(mode);
        Ok(())
    }

    /// Turns the composition into a modeset.
    pub fn set_display_mode(&mut self, mode: DisplayMode) -> Result<()> {
        self.check_kind(CompositionKind::Modeset)?;
        self.kind = CompositionKind::Modeset;
        self.display_mode = Some(mode);
        Ok(())
    }

    /// Records that `plane` must be turned off by this frame.
    ///
    /// Disables survive [`plan`](Self::plan) unless the new plan uses the
    /// plane.
    pub fn add_plane_disable(&mut self, plane: PlaneId) -> Result<()> {
        self.check_kind(CompositionKind::Frame)?;
        self.plan
            .push(CompositionPlanEntry::Disable { plane })?;
        self.kind = CompositionKind::Frame;
        Ok(())
    }

    /// Plans the frame onto `usable`.
    ///
    /// On success the planes used are removed from `usable`, `squash` holds
    /// the updated change history and every layer has a release fence. On
    /// failure none of them is touched.
    pub fn plan(
        &mut self,
        planner: &Planner,
        squash: Option<&mut ChangeHistoryCache>,
        usable: &mut UsablePlanes,
    ) -> Result<()> {
        self.require_frame()?;
        if let Some(i) = self.layers.iter().position(|l| l.release_fence().is_some()) {
            return Err(StateError::ReleaseFenceAlreadySet(i).into());
        }

        let mut cache = squash.as_deref().cloned();
        let mut stable = BitVec::new();
        let mut squash_hint = None;
        if let Some(cache) = cache.as_mut() {
            if self.geometry_changed || cache.needs_init() {
                cache.init(&self.layers);
            }
            let changed = cache.generate_history(&self.layers);
            stable = cache.stable_regions_with_marginal_history(&changed);
            cache.record_history(&self.layers, &changed);
            if stable.any() {
                squash_hint = Some(cache.fully_squashed_layers(&stable));
            }
        }

        let pipe = self.pipe;
        let for_pipe = UsablePlanes {
            primary: usable
                .primary
                .iter()
                .filter(|p| p.supports_pipe(pipe))
                .copied()
                .collect(),
            overlay: usable
                .overlay
                .iter()
                .filter(|p| p.supports_pipe(pipe))
                .copied()
                .collect(),
        };
        let mut plan = planner.plan(&self.layers, &for_pipe, squash_hint)?;
        for entry in self.plan.entries().iter().filter(|e| e.is_disable()) {
            if plan.enabled_planes().all(|p| p != entry.plane()) {
                plan.push(entry.clone())?;
            }
        }

        let mut squash_regions = Vec::new();
        let mut exclude = Vec::new();
        let mut reuse_squash = false;
        if let Some(cache) = cache.as_mut() {
            let squashed = if plan.squash_plane().is_some() {
                stable.clone()
            } else {
                BitVec::repeat(false, stable.len())
            };
            reuse_squash = !cache.record_and_compare_squashed(&squashed) && squashed.any();
            for region in stable.iter_ones().filter_map(|i| cache.regions().get(i)) {
                if plan.squash_plane().is_some() {
                    exclude.push(region.rect);
                    squash_regions.push(CompositionRegion {
                        frame: region.rect,
                        source_layers: region.layers().collect(),
                    });
                }
            }
        }

        let splitter = RegionSplitter::new(planner.config().max_region_rects);
        let pre_comp_regions = self.separate_layers(&plan, &exclude, &splitter)?;
        let fences = self.create_release_fences(&plan, &squash_regions)?;

        for (i, fence) in fences.per_layer {
            self.layers[i].set_release_fence(i, fence)?;
        }
        self.timeline.set_squash_done_point(fences.squash_done);
        self.timeline.set_pre_comp_done_point(fences.pre_comp_done);
        for id in plan.enabled_planes() {
            usable.remove(id);
        }
        if let (Some(dst), Some(cache)) = (squash, cache) {
            *dst = cache;
        }
        log::debug!(
            "frame {} on {:?}: {} entries, {:?}",
            self.frame_no,
            self.pipe,
            plan.entries().len(),
            plan.fidelity()
        );
        self.plan = plan;
        self.splitter = splitter;
        self.squash_regions = squash_regions;
        self.pre_comp_regions = pre_comp_regions;
        self.reuse_squash = reuse_squash;
        self.squash_buffer_fence = fences.squash_buffer;
        Ok(())
    }

    /// Splits the precomposition of `plan` into regions to render.
    ///
    /// Rectangles in `exclude` are left out entirely. Where a directly
    /// scanned-out layer overlaps the precomposition, members below it are
    /// dropped from that area, since the direct layer hides them; layers
    /// flagged [`LayerFlags::SHOW_UNDERLAY`] hide nothing. If the rectangle
    /// limit is hit, direct layers are ignored before exclusions.
    pub fn separate_layers(
        &self,
        plan: &CompositionPlan,
        exclude: &[IntRect],
        splitter: &RegionSplitter,
    ) -> Result<Vec<CompositionRegion>> {
        let Some((_, members)) = plan.precomposition() else {
            return Ok(Vec::new());
        };
        let dedicated = plan.dedicated_layers();
        if let Some(&bad) = members
            .iter()
            .chain(&dedicated)
            .find(|&&i| i >= self.layers.len())
        {
            return Err(StateError::LayerOutOfRange(bad).into());
        }

        let rects: Vec<IntRect> = exclude
            .iter()
            .copied()
            .chain(dedicated.iter().map(|&d| self.layers[d].display_frame))
            .chain(members.iter().map(|&m| self.layers[m].display_frame))
            .collect();
        let split = splitter.split(&rects, exclude.len() + dedicated.len())?;

        let kept_exclude = split.exclusions.min(exclude.len());
        let kept_dedicated = split.exclusions - kept_exclude;
        let exclude_mask = low_bits(kept_exclude);

        let mut regions = Vec::new();
        for region in &split.regions {
            if region.mask & exclude_mask != 0 {
                continue;
            }
            let mut sources: Vec<usize> = members
                .iter()
                .enumerate()
                .filter(|(j, _)| region.mask & split.subject_bit(*j) != 0)
                .map(|(_, &m)| m)
                .collect();
            for (j, &d) in dedicated.iter().take(kept_dedicated).enumerate() {
                let bit = 1_u64 << (kept_exclude + j);
                if region.mask & bit == 0
                    || self.layers[d].flags.contains(LayerFlags::SHOW_UNDERLAY)
                {
                    continue;
                }
                sources.retain(|&m| m < d);
            }
            if !sources.is_empty() {
                regions.push(CompositionRegion {
                    frame: region.rect,
                    source_layers: sources,
                });
            }
        }
        Ok(regions)
    }

    /// Creates every release fence `plan` needs without assigning any.
    fn create_release_fences(
        &mut self,
        plan: &CompositionPlan,
        squash_regions: &[CompositionRegion],
    ) -> Result<ReleaseFences> {
        let n = self.layers.len();
        let mut groups: Vec<ReleaseGroup> = alloc::vec![ReleaseGroup::Direct; n];
        let mut assigned: BitVec = BitVec::repeat(false, n);

        for &i in plan.dedicated_layers().iter().filter(|&&i| i < n) {
            assigned.set(i, true);
        }
        if let Some((_, members)) = plan.precomposition() {
            for &i in members.iter().filter(|&&i| i < n) {
                if !assigned[i] {
                    groups[i] = ReleaseGroup::Precomposition;
                    assigned.set(i, true);
                }
            }
        }
        let squash_sources = squash_regions
            .iter()
            .flat_map(|r| r.source_layers.iter().copied())
            .chain((0..n.min(64)).filter(|&i| plan.squashed_layers() & (1_u64 << i) != 0));
        for i in squash_sources {
            if i < n && !assigned[i] {
                groups[i] = ReleaseGroup::Squash;
                assigned.set(i, true);
            }
        }

        let mut squash_done = 0;
        let mut squash_fence = None;
        if groups.contains(&ReleaseGroup::Squash) {
            let fence = self.timeline.create_next_timeline_fence("squash")?;
            squash_done = fence.point();
            squash_fence = Some(fence);
        }
        let mut pre_comp_done = 0;
        let mut pre_comp_fence = None;
        if groups.contains(&ReleaseGroup::Precomposition) {
            let fence = self.timeline.create_next_timeline_fence("precomp")?;
            pre_comp_done = fence.point();
            pre_comp_fence = Some(fence);
        }

        let mut fences = Vec::with_capacity(n);
        for (i, group) in groups.iter().enumerate() {
            let fence = match group {
                ReleaseGroup::Squash => squash_fence.clone(),
                ReleaseGroup::Precomposition => pre_comp_fence.clone(),
                ReleaseGroup::Direct => None,
            };
            let fence = match fence {
                Some(fence) => fence,
                None => self.timeline.create_next_timeline_fence("direct")?,
            };
            fences.push((i, fence));
        }

        let squash_buffer = match plan.squash_plane() {
            Some(_) => Some(self.timeline.create_next_timeline_fence("squash-fb")?),
            None => None,
        };
        Ok(ReleaseFences {
            per_layer: fences,
            squash_done,
            pre_comp_done,
            squash_buffer,
        })
    }

    /// Collapses every enabled entry into one precomposition shown on the
    /// first enabled plane; the other planes are disabled.
    ///
    /// Returns `false` if there was nothing to collapse. Fails if the frame
    /// holds protected content, which may never be precomposed. Release
    /// fences already assigned are kept.
    pub fn collapse_to_precomposition(&mut self) -> Result<bool> {
        self.require_frame()?;
        let enabled: Vec<PlaneId> = self.plan.enabled_planes().collect();
        if enabled.len() <= 1 {
            return Ok(false);
        }
        if let Some(i) = self.layers.iter().position(Layer::is_protected) {
            return Err(PlaneShortage::ProtectedLayer(i).into());
        }

        let mut plan = CompositionPlan::new();
        plan.push(CompositionPlanEntry::Precomposition {
            plane: enabled[0],
            layers: (0..self.layers.len()).collect(),
        })?;
        for &plane in &enabled[1..] {
            plan.push(CompositionPlanEntry::Disable { plane })?;
        }
        for entry in self.plan.entries().iter().filter(|e| e.is_disable()) {
            plan.push(entry.clone())?;
        }
        plan.degrade(DegradeReason::CAPABILITY_FALLBACK);
        let regions = self.separate_layers(&plan, &[], &self.splitter)?;

        self.plan = plan;
        self.pre_comp_regions = regions;
        self.squash_regions.clear();
        self.reuse_squash = false;
        Ok(true)
    }

    /// Composition kind.
    #[must_use]
    pub fn kind(&self) -> CompositionKind {
        self.kind
    }

    /// Target pipe.
    #[must_use]
    pub fn pipe(&self) -> PipeId {
        self.pipe
    }

    /// Frame number assigned by the compositor.
    #[must_use]
    pub fn frame_no(&self) -> u64 {
        self.frame_no
    }

    /// Sets the frame number.
    pub fn set_frame_no(&mut self, frame_no: u64) {
        self.frame_no = frame_no;
    }

    /// Returns `true` if the layer geometry changed since the last frame.
    #[must_use]
    pub fn geometry_changed(&self) -> bool {
        self.geometry_changed
    }

    /// Layers, front to back.
    #[must_use]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Takes layer `index`'s acquire fence for handing to the hardware.
    pub fn take_acquire_fence(&mut self, index: usize) -> Option<Fence> {
        self.layers.get_mut(index)?.take_acquire_fence()
    }

    /// The current plan.
    #[must_use]
    pub fn composition_plan(&self) -> &CompositionPlan {
        &self.plan
    }

    /// Regions rendered into the squash composite.
    #[must_use]
    pub fn squash_regions(&self) -> &[CompositionRegion] {
        &self.squash_regions
    }

    /// Regions rendered into the precomposition.
    #[must_use]
    pub fn pre_comp_regions(&self) -> &[CompositionRegion] {
        &self.pre_comp_regions
    }

    /// Returns `true` if the squash composite of the previous frame can be
    /// shown again unchanged.
    #[must_use]
    pub fn reuses_squash_buffer(&self) -> bool {
        self.reuse_squash
    }

    /// Fence signaled once the squash buffer shown by this frame is no
    /// longer scanned out.
    #[must_use]
    pub fn squash_buffer_fence(&self) -> Option<&Fence> {
        self.squash_buffer_fence.as_ref()
    }

    /// The fence timeline.
    #[must_use]
    pub fn timeline(&self) -> &FenceTimeline {
        &self.timeline
    }

    /// The fence timeline, for the scheduler to signal milestones.
    pub fn timeline_mut(&mut self) -> &mut FenceTimeline {
        &mut self.timeline
    }

    /// Requested power state, for DPMS compositions.
    #[must_use]
    pub fn power_mode(&self) -> Option<PowerMode> {
        self.power_mode
    }

    /// Requested display mode, for modesets.
    #[must_use]
    pub fn display_mode(&self) -> Option<DisplayMode> {
        self.display_mode
    }
}

impl Drop for FrameComposition {
    fn drop(&mut self) {
        self.timeline.signal_composition_done();
        for buffer in self.imported.drain(..) {
            self.importer.release_buffer(buffer);
        }
    }
}
