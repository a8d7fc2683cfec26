// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Hardware planes and the shared plane roster.
//!
//! A [`Plane`] is a scan-out window with a fixed capability set. Planes that
//! share a hardware window slot form a [`PlaneGroup`]; the planner offers
//! layers to the most capable groups first.
//!
//! The [`PlaneRoster`] is the single owner of plane claims across outputs.
//! It is only mutated after a frame has been planned successfully, so a
//! failed plan never leaves planes half-claimed. Planes an output gives up
//! are handed to others only after they have been turned off.

use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::error::{Result, StateError};
use crate::layer::Layer;
use crate::output::{OutputId, PipeId};

/// Identifies a hardware plane.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PlaneId(pub u32);

impl fmt::Debug for PlaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlaneId({})", self.0)
    }
}

bitflags! {
    /// What a plane can do.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct PlaneCaps: u32 {
        /// Primary plane of its pipe.
        const PRIMARY = 1 << 0;
        /// Overlay plane.
        const OVERLAY = 1 << 1;
        /// Can scale its source.
        const SCALE = 1 << 2;
        /// Can rotate and flip its source.
        const ROTATE = 1 << 3;
        /// Can scan out HDR formats.
        const HDR = 1 << 4;
        /// Can scan out YUV formats.
        const YUV = 1 << 5;
        /// Can show several disjoint areas in one window.
        const MULTI_AREA = 1 << 6;
    }
}

/// How a plane can show a given layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneFit {
    /// The plane scans the layer out as is.
    Native,
    /// The plane can show the layer once its transform has been rendered
    /// into a scratch buffer.
    PreTransform,
    /// The plane cannot show the layer.
    Unsupported,
}

/// A hardware scan-out plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Plane {
    /// Plane identity.
    pub id: PlaneId,
    /// Capability set.
    pub caps: PlaneCaps,
    /// Bitmask of pipe indices this plane can attach to.
    pub possible_pipes: u32,
    /// Hardware window slot shared with other planes.
    pub group: u32,
}

impl Plane {
    /// Creates a plane usable on every pipe, in its own group.
    #[must_use]
    pub const fn new(id: PlaneId, caps: PlaneCaps) -> Self {
        Self {
            id,
            caps,
            possible_pipes: u32::MAX,
            group: id.0,
        }
    }

    /// Restricts the plane to the given pipes.
    #[must_use]
    pub const fn with_possible_pipes(mut self, mask: u32) -> Self {
        self.possible_pipes = mask;
        self
    }

    /// Places the plane in a window-slot group.
    #[must_use]
    pub const fn with_group(mut self, group: u32) -> Self {
        self.group = group;
        self
    }

    /// Returns `true` for primary planes.
    #[must_use]
    pub const fn is_primary(&self) -> bool {
        self.caps.contains(PlaneCaps::PRIMARY)
    }

    /// Returns `true` if the plane can attach to `pipe`.
    #[must_use]
    pub const fn supports_pipe(&self, pipe: PipeId) -> bool {
        self.possible_pipes & pipe.bit() != 0
    }

    /// Number of optional features the plane offers.
    #[must_use]
    pub const fn capability_rank(&self) -> u32 {
        self.caps
            .difference(PlaneCaps::PRIMARY.union(PlaneCaps::OVERLAY))
            .bits()
            .count_ones()
    }

    /// Decides whether this plane can show `layer`.
    ///
    /// Rotations the plane cannot perform are reported as
    /// [`PlaneFit::PreTransform`] when `allow_pre_transform` is set, except
    /// for protected layers, which may never be copied.
    #[must_use]
    pub fn fit(&self, layer: &Layer, allow_pre_transform: bool) -> PlaneFit {
        if layer.format.is_yuv() && !self.caps.contains(PlaneCaps::YUV) {
            return PlaneFit::Unsupported;
        }
        if layer.format.is_hdr() && !self.caps.contains(PlaneCaps::HDR) {
            return PlaneFit::Unsupported;
        }
        if layer.is_scaled() && !self.caps.contains(PlaneCaps::SCALE) {
            return PlaneFit::Unsupported;
        }
        if !layer.transform.is_empty() && !self.caps.contains(PlaneCaps::ROTATE) {
            return if allow_pre_transform && !layer.is_protected() {
                PlaneFit::PreTransform
            } else {
                PlaneFit::Unsupported
            };
        }
        PlaneFit::Native
    }
}

/// Planes sharing one hardware window slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaneGroup {
    /// Window slot id.
    pub id: u32,
    /// Union of member capabilities.
    pub caps: PlaneCaps,
    /// Member planes, in input order.
    pub planes: Vec<PlaneId>,
}

impl PlaneGroup {
    /// Groups planes by window slot, most capable group first.
    ///
    /// Ties keep the order in which each group first appears.
    #[must_use]
    pub fn collect(planes: &[Plane]) -> Vec<Self> {
        let mut groups: Vec<Self> = Vec::new();
        for plane in planes {
            match groups.iter_mut().find(|g| g.id == plane.group) {
                Some(group) => {
                    group.caps |= plane.caps;
                    group.planes.push(plane.id);
                }
                None => groups.push(Self {
                    id: plane.group,
                    caps: plane.caps,
                    planes: alloc::vec![plane.id],
                }),
            }
        }
        groups.sort_by_key(|g| core::cmp::Reverse(rank(g.caps)));
        groups
    }
}

fn rank(caps: PlaneCaps) -> u32 {
    caps.difference(PlaneCaps::PRIMARY.union(PlaneCaps::OVERLAY))
        .bits()
        .count_ones()
}

/// Orders planes for allocation: most capable group first, then most capable
/// plane within the group, then by id.
pub(crate) fn most_capable_first(planes: &mut [Plane]) {
    let groups = PlaneGroup::collect(planes);
    let group_order = |group: u32| {
        groups
            .iter()
            .position(|g| g.id == group)
            .unwrap_or(usize::MAX)
    };
    planes.sort_by(|a, b| {
        group_order(a.group)
            .cmp(&group_order(b.group))
            .then(b.capability_rank().cmp(&a.capability_rank()))
            .then(a.id.cmp(&b.id))
    });
}

/// Planes a pipe may use this frame, partitioned by kind.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UsablePlanes {
    /// Primary-capable planes.
    pub primary: Vec<Plane>,
    /// Overlay planes.
    pub overlay: Vec<Plane>,
}

impl UsablePlanes {
    /// Partitions `planes` into primary and overlay sets.
    #[must_use]
    pub fn from_planes(planes: impl IntoIterator<Item = Plane>) -> Self {
        let (primary, overlay) = planes.into_iter().partition(Plane::is_primary);
        Self { primary, overlay }
    }

    /// Total number of planes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len() + self.overlay.len()
    }

    /// Returns `true` if no plane is usable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every usable plane, primaries first.
    pub fn iter(&self) -> impl Iterator<Item = &Plane> {
        self.primary.iter().chain(self.overlay.iter())
    }

    /// Removes a plane from whichever partition holds it.
    pub fn remove(&mut self, id: PlaneId) -> Option<Plane> {
        for list in [&mut self.primary, &mut self.overlay] {
            if let Some(pos) = list.iter().position(|p| p.id == id) {
                return Some(list.remove(pos));
            }
        }
        None
    }
}

/// A plane held by an output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Claim {
    output: OutputId,
    /// Frame whose commit turns the plane off, once the output stopped
    /// using it.
    draining: Option<u64>,
}

/// Tracks which output holds each plane.
///
/// A plane an output stops using stays claimed until the commit that turns
/// it off has been applied; only then may another output enable it.
#[derive(Clone, Debug, Default)]
pub struct PlaneRoster {
    claims: HashMap<PlaneId, Claim>,
}

impl PlaneRoster {
    /// Creates a roster with every plane free.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops planes held by other outputs from `usable`.
    #[must_use]
    pub fn available_to(&self, output: OutputId, mut usable: UsablePlanes) -> UsablePlanes {
        let free = |p: &Plane| self.claims.get(&p.id).is_none_or(|c| c.output == output);
        usable.primary.retain(free);
        usable.overlay.retain(free);
        usable
    }

    /// Replaces the set of planes `output` uses from frame `frame_no` on.
    ///
    /// Returns the planes the output held before but no longer uses, sorted
    /// by id. They stay claimed until [`release_disabled`](Self::release_disabled)
    /// reports `frame_no` as applied. Fails without changing anything if
    /// another output holds one of the planes.
    pub fn assign(
        &mut self,
        output: OutputId,
        planes: &[PlaneId],
        frame_no: u64,
    ) -> Result<Vec<PlaneId>> {
        if let Some(taken) = planes
            .iter()
            .find(|id| self.claims.get(*id).is_some_and(|c| c.output != output))
        {
            return Err(StateError::DuplicatePlane(*taken).into());
        }
        let mut released: Vec<PlaneId> = self
            .claims
            .iter_mut()
            .filter(|(id, c)| c.output == output && !planes.contains(*id))
            .map(|(id, c)| {
                c.draining = Some(frame_no);
                *id
            })
            .collect();
        released.sort_unstable();
        for id in planes {
            self.claims.insert(
                *id,
                Claim {
                    output,
                    draining: None,
                },
            );
        }
        Ok(released)
    }

    /// Frees the planes whose last disabling frame on `output` is
    /// `frame_no`, returning them sorted by id.
    ///
    /// Call once that frame has been applied. A plane disabled again by a
    /// later frame waits for that one instead.
    pub fn release_disabled(&mut self, output: OutputId, frame_no: u64) -> Vec<PlaneId> {
        let mut released: Vec<PlaneId> = self
            .claims
            .iter()
            .filter(|(_, c)| c.output == output && c.draining == Some(frame_no))
            .map(|(id, _)| *id)
            .collect();
        for id in &released {
            self.claims.remove(id);
        }
        released.sort_unstable();
        released
    }

    /// Puts the claims of `output` back to what they were in `previous`.
    ///
    /// Planes another output has claimed since are left alone.
    pub fn restore(&mut self, output: OutputId, previous: &Self) {
        self.claims.retain(|_, c| c.output != output);
        for (id, claim) in &previous.claims {
            if claim.output == output && !self.claims.contains_key(id) {
                self.claims.insert(*id, *claim);
            }
        }
    }

    /// Frees every plane held by `output`, returning them sorted by id.
    pub fn release_output(&mut self, output: OutputId) -> Vec<PlaneId> {
        let mut released = self.held_by(output);
        for id in &released {
            self.claims.remove(id);
        }
        released.sort_unstable();
        released
    }

    /// Planes currently held by `output`, including those still being
    /// turned off, sorted by id.
    #[must_use]
    pub fn held_by(&self, output: OutputId) -> Vec<PlaneId> {
        let mut held: Vec<PlaneId> = self
            .claims
            .iter()
            .filter(|(_, c)| c.output == output)
            .map(|(id, _)| *id)
            .collect();
        held.sort_unstable();
        held
    }

    /// Planes `output` no longer uses but has not turned off yet, sorted by
    /// id.
    #[must_use]
    pub fn draining(&self, output: OutputId) -> Vec<PlaneId> {
        let mut draining: Vec<PlaneId> = self
            .claims
            .iter()
            .filter(|(_, c)| c.output == output && c.draining.is_some())
            .map(|(id, _)| *id)
            .collect();
        draining.sort_unstable();
        draining
    }

    /// The output holding `plane`, if any.
    #[must_use]
    pub fn owner(&self, plane: PlaneId) -> Option<OutputId> {
        self.claims.get(&plane).map(|c| c.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::IntRect;
    use crate::layer::{BufferHandle, PixelFormat, Transform};

    fn make_planes() -> Vec<Plane> {
        alloc::vec![
            Plane::new(PlaneId(1), PlaneCaps::PRIMARY),
            Plane::new(PlaneId(2), PlaneCaps::OVERLAY | PlaneCaps::SCALE),
            Plane::new(
                PlaneId(3),
                PlaneCaps::OVERLAY | PlaneCaps::SCALE | PlaneCaps::YUV | PlaneCaps::ROTATE,
            ),
        ]
    }

    #[test]
    fn most_capable_planes_come_first() {
        let mut planes = make_planes();
        most_capable_first(&mut planes);
        let ids: Vec<u32> = planes.iter().map(|p| p.id.0).collect();
        assert_eq!(ids, [3, 2, 1]);
    }

    #[test]
    fn groups_merge_caps() {
        let planes = [
            Plane::new(PlaneId(1), PlaneCaps::OVERLAY).with_group(7),
            Plane::new(PlaneId(2), PlaneCaps::OVERLAY | PlaneCaps::HDR).with_group(7),
            Plane::new(PlaneId(3), PlaneCaps::PRIMARY).with_group(8),
        ];
        let groups = PlaneGroup::collect(&planes);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].id, 7);
        assert_eq!(groups[0].planes, [PlaneId(1), PlaneId(2)]);
        assert!(groups[0].caps.contains(PlaneCaps::HDR));
    }

    #[test]
    fn fit_checks_format_scale_and_rotation() {
        let plain = Plane::new(PlaneId(1), PlaneCaps::PRIMARY);
        let layer = Layer::new(BufferHandle(1), IntRect::new(0, 0, 64, 64));
        assert_eq!(plain.fit(&layer, false), PlaneFit::Native);

        let video = layer.clone().with_format(PixelFormat::Nv12);
        assert_eq!(plain.fit(&video, true), PlaneFit::Unsupported);

        let rotated = layer.with_transform(Transform::ROTATE_180);
        assert_eq!(plain.fit(&rotated, false), PlaneFit::Unsupported);
        assert_eq!(plain.fit(&rotated, true), PlaneFit::PreTransform);
    }

    #[test]
    fn roster_filters_and_releases() {
        let mut roster = PlaneRoster::new();
        let usable = UsablePlanes::from_planes(make_planes());
        assert_eq!(usable.primary.len(), 1);

        let released = roster
            .assign(OutputId(0), &[PlaneId(1), PlaneId(2)], 1)
            .unwrap();
        assert!(released.is_empty());

        let for_other = roster.available_to(OutputId(1), usable.clone());
        assert_eq!(for_other.len(), 1, "only plane 3 is free for output 1");

        let released = roster.assign(OutputId(0), &[PlaneId(2)], 2).unwrap();
        assert_eq!(released, [PlaneId(1)]);
        assert_eq!(roster.owner(PlaneId(1)), Some(OutputId(0)), "still on screen");
        assert_eq!(roster.draining(OutputId(0)), [PlaneId(1)]);

        assert!(roster.release_disabled(OutputId(0), 1).is_empty());
        assert_eq!(roster.release_disabled(OutputId(0), 2), [PlaneId(1)]);
        assert_eq!(roster.owner(PlaneId(1)), None);
        assert_eq!(roster.available_to(OutputId(1), usable).len(), 2);
    }

    #[test]
    fn draining_waits_for_the_last_disabling_frame() {
        let mut roster = PlaneRoster::new();
        roster.assign(OutputId(0), &[PlaneId(1), PlaneId(2)], 1).unwrap();
        roster.assign(OutputId(0), &[PlaneId(2)], 2).unwrap();
        // Frame 3 does not use plane 1 either and disables it again.
        assert_eq!(roster.assign(OutputId(0), &[PlaneId(2)], 3).unwrap(), [PlaneId(1)]);
        assert!(roster.release_disabled(OutputId(0), 2).is_empty());
        assert_eq!(roster.release_disabled(OutputId(0), 3), [PlaneId(1)]);
    }

    #[test]
    fn reclaimed_plane_is_not_released() {
        let mut roster = PlaneRoster::new();
        roster.assign(OutputId(0), &[PlaneId(1), PlaneId(2)], 1).unwrap();
        roster.assign(OutputId(0), &[PlaneId(2)], 2).unwrap();
        roster.assign(OutputId(0), &[PlaneId(1), PlaneId(2)], 3).unwrap();
        assert!(roster.release_disabled(OutputId(0), 2).is_empty());
        assert_eq!(roster.held_by(OutputId(0)), [PlaneId(1), PlaneId(2)]);
        assert!(roster.draining(OutputId(0)).is_empty());
    }

    #[test]
    fn roster_assign_is_all_or_nothing() {
        let mut roster = PlaneRoster::new();
        roster.assign(OutputId(0), &[PlaneId(1)], 1).unwrap();
        let err = roster.assign(OutputId(1), &[PlaneId(2), PlaneId(1)], 1);
        assert!(err.is_err());
        assert_eq!(roster.owner(PlaneId(2)), None, "no partial claim");
        assert_eq!(roster.release_output(OutputId(0)), [PlaneId(1)]);
    }

    #[test]
    fn restore_skips_planes_claimed_elsewhere() {
        let mut roster = PlaneRoster::new();
        roster.assign(OutputId(0), &[PlaneId(1), PlaneId(2)], 1).unwrap();
        let before = roster.clone();

        roster.assign(OutputId(0), &[PlaneId(3)], 2).unwrap();
        roster.release_disabled(OutputId(0), 2);
        roster.assign(OutputId(1), &[PlaneId(2)], 1).unwrap();

        roster.restore(OutputId(0), &before);
        assert_eq!(roster.held_by(OutputId(0)), [PlaneId(1)]);
        assert_eq!(roster.owner(PlaneId(2)), Some(OutputId(1)));
        assert_eq!(roster.owner(PlaneId(3)), None);
    }
}
