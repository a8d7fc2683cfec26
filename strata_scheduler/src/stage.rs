// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Off-screen preparation and commit request assembly.

use strata_core::Result;
use strata_core::backend::{
    CommitMode, CommitRequest, CompositeRequest, CompositeTarget, OffscreenCompositor, PlaneArea,
    PlaneCommit,
};
use strata_core::composition::{CompositionRegion, FrameComposition};
use strata_core::error::StateError;
use strata_core::fence::Fence;
use strata_core::geometry::IntRect;
use strata_core::layer::{BufferHandle, Transform};
use strata_core::planner::CompositionPlanEntry;

/// Buffers rendered for one frame.
#[derive(Debug, Default)]
pub(crate) struct Prepared {
    pub(crate) squash: Option<BufferHandle>,
    pub(crate) squash_reused: bool,
    pub(crate) precomposition: Option<BufferHandle>,
    pub(crate) pre_transformed: Vec<(usize, BufferHandle)>,
}

/// A squash region and the buffers drawn into it.
type SquashSource = (IntRect, Vec<BufferHandle>);

#[derive(Debug)]
struct SquashSlot {
    buffer: BufferHandle,
    sources: Vec<SquashSource>,
    release: Option<Fence>,
}

/// What the squash composite of `comp` is drawn from.
fn squash_sources(comp: &FrameComposition) -> Vec<SquashSource> {
    comp.squash_regions()
        .iter()
        .map(|region| {
            let buffers = region
                .source_layers
                .iter()
                .filter_map(|&i| comp.layers().get(i).map(|l| l.buffer))
                .collect();
            (region.frame, buffers)
        })
        .collect()
}

/// The off-screen renderer of one output, with its two squash buffers.
pub(crate) struct Renderer {
    compositor: Box<dyn OffscreenCompositor>,
    squash: [Option<SquashSlot>; 2],
    current: usize,
}

impl core::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Renderer")
            .field("squash", &self.squash)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl Renderer {
    pub(crate) fn new(compositor: Box<dyn OffscreenCompositor>) -> Self {
        Self {
            compositor,
            squash: [None, None],
            current: 0,
        }
    }

    /// Forgets both squash buffers, so the next squash is rendered afresh.
    pub(crate) fn forget_squash(&mut self) {
        self.squash = [None, None];
    }

    /// Renders every off-screen buffer `comp` needs, then signals its squash
    /// and precomposition milestones in that order.
    pub(crate) fn prepare(&mut self, comp: &mut FrameComposition) -> Result<Prepared> {
        let plan = comp.composition_plan();
        let has_squash = plan.squash_plane().is_some();
        let has_precomposition = plan.precomposition().is_some();
        let pre_transform: Vec<usize> = plan
            .entries()
            .iter()
            .filter_map(|e| match e {
                CompositionPlanEntry::DirectLayer {
                    layer,
                    pre_transform: true,
                    ..
                } => Some(*layer),
                _ => None,
            })
            .collect();

        let mut prepared = Prepared::default();
        if has_squash {
            let (buffer, reused) = self.render_squash(comp)?;
            prepared.squash = Some(buffer);
            prepared.squash_reused = reused;
        }
        comp.timeline_mut().signal_squash_done();

        if has_precomposition {
            let request = CompositeRequest {
                target: CompositeTarget::Precomposition,
                layers: comp.layers(),
                regions: comp.pre_comp_regions(),
                reuse: None,
            };
            prepared.precomposition = Some(self.compositor.composite(&request)?);
        }
        comp.timeline_mut().signal_pre_comp_done();

        for index in pre_transform {
            let layer = comp
                .layers()
                .get(index)
                .ok_or(StateError::LayerOutOfRange(index))?;
            let buffer = self.compositor.pre_transform(layer)?;
            prepared.pre_transformed.push((index, buffer));
        }
        Ok(prepared)
    }

    /// A slot is only shown again if it was rendered from the same regions
    /// and buffers.
    fn render_squash(&mut self, comp: &FrameComposition) -> Result<(BufferHandle, bool)> {
        let release = comp.squash_buffer_fence().cloned();
        let sources = squash_sources(comp);
        if comp.reuses_squash_buffer()
            && let Some(slot) = self.squash[self.current].as_mut()
        {
            if slot.sources == sources {
                slot.release = release;
                return Ok((slot.buffer, true));
            }
            log::debug!("squash buffer {:?} is out of date, rendering again", slot.buffer);
        }

        let next = (self.current + 1) % 2;
        if let Some(SquashSlot {
            buffer,
            release: Some(fence),
            ..
        }) = &self.squash[next]
            && !fence.is_signaled()
        {
            log::warn!("squash buffer {buffer:?} is rendered into while still scanned out");
        }
        let request = CompositeRequest {
            target: CompositeTarget::Squash,
            layers: comp.layers(),
            regions: comp.squash_regions(),
            reuse: self.squash[next].as_ref().map(|s| s.buffer),
        };
        let buffer = self.compositor.composite(&request)?;
        self.squash[next] = Some(SquashSlot {
            buffer,
            sources,
            release,
        });
        self.current = next;
        Ok((buffer, false))
    }
}

/// Builds the hardware request for `comp`.
///
/// Enabled planes get z-positions from their entry order, the first entry
/// on top. Real commits take each directly scanned-out layer's acquire
/// fence; dry runs only borrow a copy.
pub(crate) fn build_request(
    comp: &mut FrameComposition,
    prepared: &Prepared,
    mode: CommitMode,
) -> Result<CommitRequest> {
    let entries = comp.composition_plan().entries().to_vec();
    let mut zpos = entries.iter().filter(|e| !e.is_disable()).count();
    let mut request = CommitRequest {
        pipe: comp.pipe(),
        planes: Vec::with_capacity(zpos),
        disables: Vec::new(),
    };

    for entry in &entries {
        let areas = match entry {
            CompositionPlanEntry::Disable { plane } => {
                request.disables.push(*plane);
                continue;
            }
            CompositionPlanEntry::DirectLayer { layer, .. } => {
                vec![layer_area(comp, *layer, prepared, mode)?]
            }
            CompositionPlanEntry::Packed { layers, .. } => layers
                .iter()
                .map(|&i| layer_area(comp, i, prepared, mode))
                .collect::<Result<Vec<_>>>()?,
            CompositionPlanEntry::Precomposition { .. } => {
                let buffer = prepared
                    .precomposition
                    .ok_or(StateError::MissingComposite(CompositeTarget::Precomposition))?;
                vec![composite_area(buffer, comp.pre_comp_regions())]
            }
            CompositionPlanEntry::SquashComposite { .. } => {
                let buffer = prepared
                    .squash
                    .ok_or(StateError::MissingComposite(CompositeTarget::Squash))?;
                vec![composite_area(buffer, comp.squash_regions())]
            }
        };
        zpos -= 1;
        request.planes.push(PlaneCommit {
            plane: entry.plane(),
            zpos: u32::try_from(zpos).unwrap_or(u32::MAX),
            areas,
        });
    }
    Ok(request)
}

fn layer_area(
    comp: &mut FrameComposition,
    index: usize,
    prepared: &Prepared,
    mode: CommitMode,
) -> Result<PlaneArea> {
    let acquire_fence = match mode {
        CommitMode::TestOnly => comp
            .layers()
            .get(index)
            .and_then(|l| l.acquire_fence().cloned()),
        CommitMode::Apply => comp.take_acquire_fence(index),
    };
    let layer = comp
        .layers()
        .get(index)
        .ok_or(StateError::LayerOutOfRange(index))?;
    let scratch = prepared
        .pre_transformed
        .iter()
        .find(|(i, _)| *i == index)
        .map(|(_, buffer)| *buffer);
    let (buffer, source_crop, transform) = match scratch {
        Some(buffer) => (
            buffer,
            kurbo::Rect::new(
                0.0,
                0.0,
                f64::from(layer.display_frame.width()),
                f64::from(layer.display_frame.height()),
            ),
            Transform::IDENTITY,
        ),
        None => (layer.buffer, layer.source_crop, layer.transform),
    };
    Ok(PlaneArea {
        buffer,
        source_crop,
        display_frame: layer.display_frame,
        transform,
        blending: layer.blending,
        alpha: layer.alpha,
        acquire_fence,
    })
}

/// Composite buffers are display-sized; the plane shows their bounding box.
fn composite_area(buffer: BufferHandle, regions: &[CompositionRegion]) -> PlaneArea {
    let bounds = regions
        .iter()
        .map(|r| r.frame)
        .reduce(|a, b| a.union(&b))
        .unwrap_or(IntRect::ZERO);
    PlaneArea {
        buffer,
        source_crop: bounds.to_kurbo(),
        display_frame: bounds,
        transform: Transform::IDENTITY,
        blending: strata_core::layer::BlendMode::Premultiplied,
        alpha: u8::MAX,
        acquire_fence: None,
    }
}
