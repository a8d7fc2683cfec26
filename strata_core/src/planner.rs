// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Assignment of layers to hardware planes.
//!
//! The [`Planner`] turns a front-to-back layer stack and the planes usable on
//! a pipe into a [`CompositionPlan`]:
//!
//! 1. Protected layers take the first compatible plane or the plan fails.
//! 2. A squash composite, when requested, reserves the least capable plane
//!    unless that would leave the remaining layers without one.
//! 3. If the remaining layers outnumber the remaining planes, the least
//!    capable plane is reserved for a precomposition.
//! 4. The remaining layers are offered planes front to back, most capable
//!    first. Once a layer cannot be placed, it and every layer below it join
//!    the precomposition so z-order is preserved.
//! 5. A precomposition takes the reserved plane, or any plane left over.
//!    With no plane at all the plan fails.
//!
//! Entries are emitted front to back: the squash composite first, then the
//! other entries in order of their topmost layer.

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::error::{PlaneShortage, Result, StateError};
use crate::layer::Layer;
use crate::packing::{PackingRules, leading_window};
use crate::plane::{Plane, PlaneCaps, PlaneFit, PlaneId, UsablePlanes, most_capable_first};
use crate::region::MAX_REGION_RECTS;

/// Planner-only policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlannerConfig {
    /// Show rotations on planes that cannot rotate by rendering the layer
    /// into a scratch buffer first.
    pub pre_transform: bool,
    /// Pack non-overlapping layers onto multi-area planes.
    pub window_packing: bool,
    /// Maximum number of areas per packed window.
    pub max_window_zones: usize,
    /// Only pack layers sharing one pixel format.
    pub same_format_windows: bool,
    /// Rectangle limit of the precomposition region split.
    pub max_region_rects: usize,
}

impl PlannerConfig {
    /// Default policy: pre-transform on, packing off.
    pub const DEFAULT: Self = Self {
        pre_transform: true,
        window_packing: false,
        max_window_zones: 4,
        same_format_windows: false,
        max_region_rects: MAX_REGION_RECTS,
    };

    fn packing_rules(&self) -> PackingRules {
        PackingRules {
            max_zones: self.max_window_zones,
            same_format: self.same_format_windows,
            horizontal_bands: false,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// One plane's role in a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompositionPlanEntry {
    /// Turn the plane off.
    Disable {
        /// Plane to disable.
        plane: PlaneId,
    },
    /// Scan one layer out directly.
    DirectLayer {
        /// Plane used.
        plane: PlaneId,
        /// Layer index.
        layer: usize,
        /// The layer's transform is rendered into a scratch buffer first.
        pre_transform: bool,
    },
    /// Scan several non-overlapping layers out as areas of one window.
    Packed {
        /// Plane used.
        plane: PlaneId,
        /// Layer indices, by top edge.
        layers: Vec<usize>,
    },
    /// Show an off-screen composite of the listed layers.
    Precomposition {
        /// Plane used.
        plane: PlaneId,
        /// Layer indices, front to back.
        layers: Vec<usize>,
    },
    /// Show the cached composite of the stable regions.
    SquashComposite {
        /// Plane used.
        plane: PlaneId,
    },
}

impl CompositionPlanEntry {
    /// Plane this entry drives.
    #[must_use]
    pub fn plane(&self) -> PlaneId {
        match self {
            Self::Disable { plane }
            | Self::DirectLayer { plane, .. }
            | Self::Packed { plane, .. }
            | Self::Precomposition { plane, .. }
            | Self::SquashComposite { plane } => *plane,
        }
    }

    /// Layers this entry shows. Empty for disable and squash entries.
    #[must_use]
    pub fn layers(&self) -> &[usize] {
        match self {
            Self::DirectLayer { layer, .. } => core::slice::from_ref(layer),
            Self::Packed { layers, .. } | Self::Precomposition { layers, .. } => layers,
            Self::Disable { .. } | Self::SquashComposite { .. } => &[],
        }
    }

    /// Returns `true` for disable entries.
    #[must_use]
    pub fn is_disable(&self) -> bool {
        matches!(self, Self::Disable { .. })
    }

    /// Topmost layer shown, used to order entries.
    fn topmost(&self) -> usize {
        self.layers().iter().copied().min().unwrap_or(usize::MAX)
    }
}

bitflags! {
    /// Why a plan is less precise than it could have been.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct DegradeReason: u8 {
        /// Stable regions exist but no plane was left for their composite.
        const SQUASH_DROPPED = 1 << 0;
        /// A layer was precomposed while planes remained, because none of
        /// them could show it.
        const CAPABILITY_FALLBACK = 1 << 1;
        /// A layer's transform is rendered off-screen.
        const PRE_TRANSFORM = 1 << 2;
    }
}

/// Success quality of a plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Fidelity {
    /// Everything was placed as requested.
    #[default]
    Exact,
    /// The plan is valid but used fallbacks.
    Degraded(DegradeReason),
}

/// An ordered set of plane entries for one frame.
///
/// Entries can only be added through [`push`](Self::push), which enforces
/// that a plan holds at most one precomposition and one squash entry, that
/// no layer is shown by two entries, and that no plane is used twice.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositionPlan {
    entries: Vec<CompositionPlanEntry>,
    fidelity: Fidelity,
    squashed_layers: u64,
}

impl CompositionPlan {
    /// Creates an empty, exact plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry below the existing ones.
    pub fn push(&mut self, entry: CompositionPlanEntry) -> Result<()> {
        if self.entries.iter().any(|e| e.plane() == entry.plane()) {
            return Err(StateError::DuplicatePlane(entry.plane()).into());
        }
        match &entry {
            CompositionPlanEntry::Precomposition { .. } if self.precomposition().is_some() => {
                return Err(StateError::DuplicatePrecomposition.into());
            }
            CompositionPlanEntry::SquashComposite { .. } if self.squash_plane().is_some() => {
                return Err(StateError::DuplicateSquash.into());
            }
            _ => {}
        }
        if let Some(&dup) = entry
            .layers()
            .iter()
            .find(|&&l| self.entries.iter().any(|e| e.layers().contains(&l)))
        {
            return Err(StateError::DuplicateDirectLayer(dup).into());
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Entries, front to back.
    #[must_use]
    pub fn entries(&self) -> &[CompositionPlanEntry] {
        &self.entries
    }

    /// How closely the plan matches the request.
    #[must_use]
    pub fn fidelity(&self) -> Fidelity {
        self.fidelity
    }

    /// Records a fallback.
    pub fn degrade(&mut self, reason: DegradeReason) {
        self.fidelity = match self.fidelity {
            Fidelity::Exact => Fidelity::Degraded(reason),
            Fidelity::Degraded(r) => Fidelity::Degraded(r | reason),
        };
    }

    /// Layers served only by the squash composite.
    #[must_use]
    pub fn squashed_layers(&self) -> u64 {
        self.squashed_layers
    }

    /// The precomposition plane and its layers, if any.
    #[must_use]
    pub fn precomposition(&self) -> Option<(PlaneId, &[usize])> {
        self.entries.iter().find_map(|e| match e {
            CompositionPlanEntry::Precomposition { plane, layers } => {
                Some((*plane, layers.as_slice()))
            }
            _ => None,
        })
    }

    /// The squash plane, if any.
    #[must_use]
    pub fn squash_plane(&self) -> Option<PlaneId> {
        self.entries.iter().find_map(|e| match e {
            CompositionPlanEntry::SquashComposite { plane } => Some(*plane),
            _ => None,
        })
    }

    /// Layers scanned out without composition, ascending.
    #[must_use]
    pub fn dedicated_layers(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .entries
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    CompositionPlanEntry::DirectLayer { .. } | CompositionPlanEntry::Packed { .. }
                )
            })
            .flat_map(|e| e.layers().iter().copied())
            .collect();
        out.sort_unstable();
        out
    }

    /// Planes driven by non-disable entries.
    pub fn enabled_planes(&self) -> impl Iterator<Item = PlaneId> + '_ {
        self.entries
            .iter()
            .filter(|e| !e.is_disable())
            .map(CompositionPlanEntry::plane)
    }

    /// Number of non-disable entries.
    #[must_use]
    pub fn enabled_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_disable()).count()
    }

    pub(crate) fn set_squashed_layers(&mut self, mask: u64) {
        self.squashed_layers = mask;
    }
}

/// Greedy plane allocator.
#[derive(Clone, Copy, Debug, Default)]
pub struct Planner {
    config: PlannerConfig,
}

impl Planner {
    /// Creates a planner with the given policy.
    #[must_use]
    pub const fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Planner policy.
    #[must_use]
    pub const fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plans `layers` onto `usable`.
    ///
    /// `squash` is `Some(mask)` when stable regions exist; `mask` names the
    /// layers covered entirely by them. Such layers get no entry of their
    /// own when the squash composite gets a plane.
    pub fn plan(
        &self,
        layers: &[Layer],
        usable: &UsablePlanes,
        squash: Option<u64>,
    ) -> Result<CompositionPlan> {
        let mut plan = CompositionPlan::new();
        if layers.is_empty() {
            return Ok(plan);
        }
        if usable.is_empty() {
            return Err(PlaneShortage::NoUsablePlanes.into());
        }

        let mut free: Vec<Plane> = usable.iter().copied().collect();
        most_capable_first(&mut free);
        let mut entries: Vec<CompositionPlanEntry> = Vec::new();

        let mut protected_mask = 0_u64;
        for (i, layer) in layers.iter().enumerate().filter(|(_, l)| l.is_protected()) {
            let Some(pos) = free
                .iter()
                .position(|p| p.fit(layer, false) == PlaneFit::Native)
            else {
                return Err(PlaneShortage::ProtectedLayer(i).into());
            };
            let plane = free.remove(pos);
            entries.push(CompositionPlanEntry::DirectLayer {
                plane: plane.id,
                layer: i,
                pre_transform: false,
            });
            if i < 64 {
                protected_mask |= 1_u64 << i;
            }
        }

        // The squash plane must not take the last plane from layers that
        // still need one.
        let mut squash_plane = None;
        if let Some(mask) = squash {
            let mask = mask & !protected_mask;
            let needed = if candidates(layers, mask).next().is_some() { 2 } else { 1 };
            if free.len() >= needed {
                squash_plane = free.pop().map(|p| p.id);
                plan.set_squashed_layers(mask);
            } else {
                plan.degrade(DegradeReason::SQUASH_DROPPED);
            }
        }
        let candidates: Vec<usize> = candidates(layers, plan.squashed_layers()).collect();

        let precomp_plane = if candidates.len() > free.len() {
            free.pop().map(|p| p.id)
        } else {
            None
        };

        let mut precomp: Vec<usize> = Vec::new();
        let mut k = 0;
        while k < candidates.len() {
            let index = candidates[k];
            if !precomp.is_empty() {
                precomp.push(index);
                k += 1;
                continue;
            }

            if self.config.window_packing
                && let Some((plane, window)) = self.take_window(layers, &candidates[k..], &mut free)
            {
                k += window.len();
                entries.push(CompositionPlanEntry::Packed {
                    plane,
                    layers: window,
                });
                continue;
            }

            let layer = &layers[index];
            let native = free
                .iter()
                .position(|p| p.fit(layer, false) == PlaneFit::Native);
            let fallback = || {
                free.iter().position(|p| {
                    p.fit(layer, self.config.pre_transform) == PlaneFit::PreTransform
                })
            };
            match native.map(|pos| (pos, false)).or_else(|| fallback().map(|pos| (pos, true))) {
                Some((pos, pre_transform)) => {
                    let plane = free.remove(pos);
                    if pre_transform {
                        plan.degrade(DegradeReason::PRE_TRANSFORM);
                    }
                    entries.push(CompositionPlanEntry::DirectLayer {
                        plane: plane.id,
                        layer: index,
                        pre_transform,
                    });
                }
                None => {
                    if !free.is_empty() {
                        plan.degrade(DegradeReason::CAPABILITY_FALLBACK);
                    }
                    precomp.push(index);
                }
            }
            k += 1;
        }

        if !precomp.is_empty() {
            let Some(plane) = precomp_plane.or_else(|| free.pop().map(|p| p.id)) else {
                return Err(PlaneShortage::NoPrecompositionPlane(precomp.len()).into());
            };
            entries.push(CompositionPlanEntry::Precomposition {
                plane,
                layers: precomp,
            });
        }

        entries.sort_by_key(CompositionPlanEntry::topmost);
        if let Some(plane) = squash_plane {
            plan.push(CompositionPlanEntry::SquashComposite { plane })?;
        }
        for entry in entries {
            plan.push(entry)?;
        }
        log::trace!("planned {} layers: {:?}", layers.len(), plan.entries());
        Ok(plan)
    }

    /// Takes a multi-area plane for the longest packable prefix of `run`.
    fn take_window(
        &self,
        layers: &[Layer],
        run: &[usize],
        free: &mut Vec<Plane>,
    ) -> Option<(PlaneId, Vec<usize>)> {
        let window = leading_window(layers, run, &self.config.packing_rules());
        if window.len() < 2 {
            return None;
        }
        let pos = free.iter().position(|p| {
            p.caps.contains(PlaneCaps::MULTI_AREA)
                && window
                    .iter()
                    .all(|&i| p.fit(&layers[i], false) == PlaneFit::Native)
        })?;
        Some((free.remove(pos).id, window))
    }
}

/// Layers that need a plane or the precomposition: everything that is
/// neither protected nor covered by the squash composite.
fn candidates(layers: &[Layer], squashed: u64) -> impl Iterator<Item = usize> + '_ {
    (0..layers.len())
        .filter(|&i| !layers[i].is_protected())
        .filter(move |&i| i >= 64 || squashed & (1_u64 << i) == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::geometry::IntRect;
    use crate::layer::{BufferHandle, LayerFlags, PixelFormat, Transform};

    fn make_layers(n: usize) -> Vec<Layer> {
        (0..n)
            .map(|i| {
                let off = i32::try_from(i).unwrap() * 10;
                Layer::new(
                    BufferHandle(i as u64 + 1),
                    IntRect::new(off, off, off + 100, off + 100),
                )
            })
            .collect()
    }

    fn make_planes(n: u32) -> UsablePlanes {
        UsablePlanes::from_planes((0..n).map(|i| {
            let caps = if i == 0 {
                PlaneCaps::PRIMARY
            } else {
                PlaneCaps::OVERLAY
            };
            Plane::new(PlaneId(i + 1), caps)
        }))
    }

    fn all_layers(plan: &CompositionPlan) -> Vec<usize> {
        let mut out: Vec<usize> = plan
            .entries()
            .iter()
            .flat_map(|e| e.layers().iter().copied())
            .collect();
        out.sort_unstable();
        out
    }

    #[test]
    fn every_layer_direct_when_planes_suffice() {
        let layers = make_layers(3);
        let plan = Planner::default()
            .plan(&layers, &make_planes(3), None)
            .unwrap();
        assert_eq!(plan.entries().len(), 3);
        assert!(plan.precomposition().is_none());
        assert_eq!(plan.dedicated_layers(), [0, 1, 2]);
        assert_eq!(plan.fidelity(), Fidelity::Exact);
    }

    #[test]
    fn leftovers_share_one_precomposition() {
        let layers = make_layers(5);
        let plan = Planner::default()
            .plan(&layers, &make_planes(3), None)
            .unwrap();
        let (_, precomp) = plan.precomposition().expect("precomposition entry");
        assert_eq!(precomp, [2, 3, 4]);
        assert_eq!(plan.dedicated_layers(), [0, 1]);
        assert_eq!(all_layers(&plan), [0, 1, 2, 3, 4]);
        let planes: Vec<PlaneId> = plan.enabled_planes().collect();
        assert_eq!(planes.len(), 3);
    }

    #[test]
    fn entries_are_ordered_by_topmost_layer() {
        let layers = make_layers(4);
        let plan = Planner::default()
            .plan(&layers, &make_planes(2), None)
            .unwrap();
        let tops: Vec<usize> = plan.entries().iter().map(|e| e.layers()[0]).collect();
        assert_eq!(tops, [0, 1]);
        assert!(matches!(
            plan.entries()[1],
            CompositionPlanEntry::Precomposition { .. }
        ));
    }

    #[test]
    fn protected_layer_needs_a_plane() {
        let mut layers = make_layers(2);
        layers[1] = layers[1].clone().with_format(PixelFormat::Nv12).with_flags(LayerFlags::PROTECTED);
        let err = Planner::default()
            .plan(&layers, &make_planes(2), None)
            .unwrap_err();
        assert_eq!(err, Error::from(PlaneShortage::ProtectedLayer(1)));
    }

    #[test]
    fn protected_layer_is_never_precomposed() {
        let mut layers = make_layers(4);
        layers[3].flags = LayerFlags::PROTECTED;
        let plan = Planner::default()
            .plan(&layers, &make_planes(2), None)
            .unwrap();
        assert!(plan.dedicated_layers().contains(&3));
        let (_, precomp) = plan.precomposition().unwrap();
        assert_eq!(precomp, [0, 1, 2]);
    }

    #[test]
    fn no_planes_is_an_error() {
        let layers = make_layers(1);
        let err = Planner::default()
            .plan(&layers, &UsablePlanes::default(), None)
            .unwrap_err();
        assert_eq!(err, Error::from(PlaneShortage::NoUsablePlanes));
    }

    #[test]
    fn empty_stack_plans_nothing() {
        let plan = Planner::default()
            .plan(&[], &UsablePlanes::default(), None)
            .unwrap();
        assert!(plan.entries().is_empty());
    }

    #[test]
    fn squash_entry_goes_on_top() {
        let layers = make_layers(3);
        let plan = Planner::default()
            .plan(&layers, &make_planes(3), Some(0b100))
            .unwrap();
        assert!(matches!(
            plan.entries()[0],
            CompositionPlanEntry::SquashComposite { .. }
        ));
        assert_eq!(plan.dedicated_layers(), [0, 1]);
        assert_eq!(plan.squashed_layers(), 0b100);
    }

    #[test]
    fn squash_is_dropped_without_a_spare_plane() {
        let mut layers = make_layers(1);
        layers[0].flags = LayerFlags::PROTECTED;
        let plan = Planner::default()
            .plan(&layers, &make_planes(1), Some(0b1))
            .unwrap();
        assert_eq!(plan.squash_plane(), None);
        assert_eq!(plan.fidelity(), Fidelity::Degraded(DegradeReason::SQUASH_DROPPED));
    }

    #[test]
    fn unplaceable_layer_falls_back_to_precomposition() {
        let mut layers = make_layers(2);
        layers[0].format = PixelFormat::Nv12;
        let plan = Planner::default()
            .plan(&layers, &make_planes(2), None)
            .unwrap();
        let (_, precomp) = plan.precomposition().unwrap();
        assert_eq!(precomp, [0, 1], "layer 1 must not sit above layer 0");
        assert!(matches!(plan.fidelity(), Fidelity::Degraded(r) if r.contains(DegradeReason::CAPABILITY_FALLBACK)));
    }

    #[test]
    fn rotation_uses_pre_transform() {
        let layers = [make_layers(1)[0].clone().with_transform(Transform::ROTATE_180)];
        let plan = Planner::default()
            .plan(&layers, &make_planes(1), None)
            .unwrap();
        assert_eq!(
            plan.entries(),
            [CompositionPlanEntry::DirectLayer {
                plane: PlaneId(1),
                layer: 0,
                pre_transform: true,
            }]
        );

        let strict = Planner::new(PlannerConfig {
            pre_transform: false,
            ..PlannerConfig::DEFAULT
        });
        let plan = strict.plan(&layers, &make_planes(1), None).unwrap();
        assert!(plan.precomposition().is_some());
    }

    #[test]
    fn protected_layer_can_starve_the_precomposition() {
        let mut layers = make_layers(2);
        layers[0].flags = LayerFlags::PROTECTED;
        let err = Planner::default()
            .plan(&layers, &make_planes(1), None)
            .unwrap_err();
        assert_eq!(err, Error::from(PlaneShortage::NoPrecompositionPlane(1)));
    }

    #[test]
    fn squash_leaves_a_plane_for_live_layers() {
        let layers = make_layers(2);
        let plan = Planner::default()
            .plan(&layers, &make_planes(1), Some(0b10))
            .unwrap();
        assert_eq!(plan.squash_plane(), None);
        assert!(plan.dedicated_layers().is_empty());
        assert_eq!(plan.precomposition().unwrap().1, [0, 1]);
    }

    #[test]
    fn packing_fills_multi_area_planes() {
        let layers: Vec<Layer> = (0..3)
            .map(|i| {
                let x = i * 200;
                Layer::new(BufferHandle(1), IntRect::new(x, 0, x + 100, 100))
            })
            .collect();
        let usable = UsablePlanes::from_planes([
            Plane::new(PlaneId(1), PlaneCaps::PRIMARY),
            Plane::new(PlaneId(2), PlaneCaps::OVERLAY | PlaneCaps::MULTI_AREA),
        ]);
        let planner = Planner::new(PlannerConfig {
            window_packing: true,
            ..PlannerConfig::DEFAULT
        });
        let plan = planner.plan(&layers, &usable, None).unwrap();
        assert!(plan.precomposition().is_none());
        assert_eq!(
            plan.entries()[0],
            CompositionPlanEntry::Packed {
                plane: PlaneId(2),
                layers: alloc::vec![0, 1, 2],
            }
        );
    }

    #[test]
    fn push_enforces_invariants() {
        let mut plan = CompositionPlan::new();
        plan.push(CompositionPlanEntry::Precomposition {
            plane: PlaneId(1),
            layers: alloc::vec![0, 1],
        })
        .unwrap();
        assert_eq!(
            plan.push(CompositionPlanEntry::Precomposition {
                plane: PlaneId(2),
                layers: alloc::vec![2],
            }),
            Err(Error::from(StateError::DuplicatePrecomposition))
        );
        assert_eq!(
            plan.push(CompositionPlanEntry::DirectLayer {
                plane: PlaneId(3),
                layer: 1,
                pre_transform: false,
            }),
            Err(Error::from(StateError::DuplicateDirectLayer(1)))
        );
        assert_eq!(
            plan.push(CompositionPlanEntry::Disable { plane: PlaneId(1) }),
            Err(Error::from(StateError::DuplicatePlane(PlaneId(1))))
        );
        plan.push(CompositionPlanEntry::SquashComposite { plane: PlaneId(4) })
            .unwrap();
        assert_eq!(
            plan.push(CompositionPlanEntry::SquashComposite { plane: PlaneId(5) }),
            Err(Error::from(StateError::DuplicateSquash))
        );
    }
}
