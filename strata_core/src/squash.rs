// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame-to-frame change history used to skip redundant recomposition.
//!
//! The cache splits the layer stack into disjoint regions and keeps, per
//! region, a shift register of the last `history_length` frames in which a
//! contributing layer changed. A region is *stable* once the cache has seen
//! at least `history_length` frames of this geometry, the register is all
//! zero, and nothing changed in the current frame. Stable regions can be
//! served from a cached composite ("squashed").
//!
//! A frame is processed in this order:
//!
//! 1. [`generate_history`](ChangeHistoryCache::generate_history)
//! 2. [`stable_regions_with_marginal_history`](ChangeHistoryCache::stable_regions_with_marginal_history)
//! 3. [`record_history`](ChangeHistoryCache::record_history)
//! 4. [`record_and_compare_squashed`](ChangeHistoryCache::record_and_compare_squashed),
//!    once the plan shows whether the squash composite got a plane
//!
//! Steps 3 and 4 touch disjoint state; the squashed set latched in step 4
//! is the one the plan actually uses, not the stable set of step 2.
//!
//! [`init`](ChangeHistoryCache::init) restarts everything on geometry change.

use alloc::vec::Vec;

use bitvec::slice::BitSlice;
use bitvec::vec::BitVec;

use crate::geometry::IntRect;
use crate::layer::{BufferHandle, Layer};
use crate::region::{MAX_REGION_RECTS, RegionSplitter, mask_bits};

/// Default number of unchanged frames before a region is squashed.
pub const DEFAULT_HISTORY_LENGTH: u32 = 6;

/// Longest supported history register.
pub const MAX_HISTORY_LENGTH: u32 = 32;

/// One region tracked by the cache.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SquashRegion {
    /// Area of the region.
    pub rect: IntRect,
    /// Bit `i` is set when layer `i` contributes to the region.
    pub layer_refs: u64,
    history: u32,
    squashed: bool,
}

impl SquashRegion {
    /// Change register; bit 0 is the most recent frame.
    #[must_use]
    pub fn history(&self) -> u32 {
        self.history
    }

    /// Whether the region was part of the last latched squash set.
    #[must_use]
    pub fn is_squashed(&self) -> bool {
        self.squashed
    }

    /// Indices of the contributing layers, ascending.
    pub fn layers(&self) -> impl Iterator<Item = usize> + use<> {
        mask_bits(self.layer_refs)
    }
}

/// Per-output squash state.
#[derive(Clone, Debug)]
pub struct ChangeHistoryCache {
    history_length: u32,
    generation: u64,
    valid_history: u32,
    regions: Vec<SquashRegion>,
    last_handles: Vec<BufferHandle>,
    needs_init: bool,
}

impl Default for ChangeHistoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH)
    }
}

impl ChangeHistoryCache {
    /// Creates an empty cache. `history_length` is clamped to `1..=32`.
    #[must_use]
    pub fn new(history_length: u32) -> Self {
        Self {
            history_length: history_length.clamp(1, MAX_HISTORY_LENGTH),
            generation: 0,
            valid_history: 0,
            regions: Vec::new(),
            last_handles: Vec::new(),
            needs_init: true,
        }
    }

    /// Rebuilds the regions for a new layer geometry and forgets all history.
    ///
    /// Stacks with more layers than the membership mask can name get no
    /// regions, so nothing is squashed until the geometry changes again.
    pub fn init(&mut self, layers: &[Layer]) {
        self.generation += 1;
        self.valid_history = 0;
        self.needs_init = false;
        self.regions.clear();
        self.last_handles.clear();
        self.last_handles.extend(layers.iter().map(|l| l.buffer));

        let rects: Vec<IntRect> = layers.iter().map(|l| l.display_frame).collect();
        if rects.len() > MAX_REGION_RECTS {
            log::warn!(
                "squash disabled: {} layers exceed the {MAX_REGION_RECTS} layer limit",
                rects.len()
            );
            return;
        }
        match RegionSplitter::default().split(&rects, 0) {
            Ok(split) => {
                self.regions.extend(split.regions.into_iter().map(|r| SquashRegion {
                    rect: r.rect,
                    layer_refs: r.mask,
                    history: 0,
                    squashed: false,
                }));
            }
            Err(err) => log::warn!("squash disabled: {err}"),
        }
    }

    /// Marks every region whose contributing layers changed since the last
    /// recorded frame.
    ///
    /// A layer counts as changed when its buffer handle differs or it holds
    /// protected content. If the layer count differs from the one the cache
    /// was built for, every region is reported changed and the cache asks to
    /// be re-initialised.
    pub fn generate_history(&mut self, layers: &[Layer]) -> BitVec {
        if layers.len() != self.last_handles.len() {
            log::warn!(
                "squash history expected {} layers, got {}",
                self.last_handles.len(),
                layers.len()
            );
            self.needs_init = true;
            return BitVec::repeat(true, self.regions.len());
        }

        let changed_layers = layers
            .iter()
            .zip(&self.last_handles)
            .enumerate()
            .filter(|(_, (layer, last))| layer.is_protected() || layer.buffer != **last)
            .fold(0_u64, |m, (i, _)| m | (1_u64 << i));

        self.regions
            .iter()
            .map(|r| r.layer_refs & changed_layers != 0)
            .collect()
    }

    /// Regions that are stable now: unchanged this frame and with an empty
    /// change register over a full history window.
    #[must_use]
    pub fn stable_regions_with_marginal_history(&self, changed: &BitSlice) -> BitVec {
        (0..self.regions.len())
            .map(|i| !changed.get(i).is_some_and(|b| *b) && self.is_stable(i))
            .collect()
    }

    /// Shifts `changed` into every region's history and remembers the
    /// current buffers.
    ///
    /// Ignored, with a warning, if the layer or region count does not match.
    pub fn record_history(&mut self, layers: &[Layer], changed: &BitSlice) {
        if layers.len() != self.last_handles.len() {
            log::warn!(
                "squash record expected {} layers, got {}",
                self.last_handles.len(),
                layers.len()
            );
            self.needs_init = true;
            return;
        }
        if changed.len() != self.regions.len() {
            log::warn!(
                "squash record expected {} regions, got {}",
                self.regions.len(),
                changed.len()
            );
            return;
        }

        for (last, layer) in self.last_handles.iter_mut().zip(layers) {
            *last = layer.buffer;
        }
        let mask = self.history_mask();
        for (region, bit) in self.regions.iter_mut().zip(changed.iter()) {
            region.history = ((region.history << 1) | u32::from(*bit)) & mask;
        }
        self.valid_history = self.valid_history.saturating_add(1);
    }

    /// Latches the squashed set, returning `true` if it differs from the one
    /// latched last time. A changed set means the squash composite must be
    /// rendered again.
    pub fn record_and_compare_squashed(&mut self, squashed: &BitSlice) -> bool {
        if squashed.len() != self.regions.len() {
            log::warn!(
                "squash latch expected {} regions, got {}",
                self.regions.len(),
                squashed.len()
            );
            return false;
        }
        let mut changed = false;
        for (region, bit) in self.regions.iter_mut().zip(squashed.iter()) {
            if region.squashed != *bit {
                region.squashed = *bit;
                changed = true;
            }
        }
        changed
    }

    /// Layers that contribute only to regions in `stable`.
    ///
    /// Such layers are fully covered by the squash composite and need no
    /// plane or precomposition of their own.
    #[must_use]
    pub fn fully_squashed_layers(&self, stable: &BitSlice) -> u64 {
        let mut squashed = 0_u64;
        let mut live = 0_u64;
        for (i, region) in self.regions.iter().enumerate() {
            if stable.get(i).is_some_and(|b| *b) {
                squashed |= region.layer_refs;
            } else {
                live |= region.layer_refs;
            }
        }
        squashed & !live
    }

    /// Returns `true` if region `index` has a full, change-free history.
    #[must_use]
    pub fn is_stable(&self, index: usize) -> bool {
        self.valid_history >= self.history_length
            && self.regions.get(index).is_some_and(|r| r.history == 0)
    }

    fn history_mask(&self) -> u32 {
        if self.history_length >= MAX_HISTORY_LENGTH {
            u32::MAX
        } else {
            (1_u32 << self.history_length) - 1
        }
    }

    /// Tracked regions.
    #[must_use]
    pub fn regions(&self) -> &[SquashRegion] {
        &self.regions
    }

    /// Number of times the cache has been (re)initialised.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Frames recorded since the last [`init`](Self::init).
    #[must_use]
    pub fn valid_history(&self) -> u32 {
        self.valid_history
    }

    /// Configured history length.
    #[must_use]
    pub fn history_length(&self) -> u32 {
        self.history_length
    }

    /// Returns `true` if the cache must be re-initialised before its
    /// results can be trusted.
    #[must_use]
    pub fn needs_init(&self) -> bool {
        self.needs_init
    }
}
