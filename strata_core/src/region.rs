// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Decomposition of overlapping rectangles into disjoint tagged regions.
//!
//! [`RegionSplitter::split`] sweeps the input rectangles top to bottom. Each
//! horizontal band between consecutive edges is cut at every vertical edge
//! of the rectangles crossing it, adjacent cuts with identical membership are
//! merged, and cuts that continue an identical region from the band above
//! extend it downwards. Every output [`Region`] carries a bitmask naming the
//! inputs that cover it, so the mask is at most 64 bits wide.
//!
//! The input list is split in two: a prefix of *exclusion* rectangles and
//! the remaining *subject* rectangles. When the list is too long, trailing
//! exclusion rectangles are dropped first; subjects are never dropped.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::geometry::IntRect;

/// Width of the membership mask.
pub const MAX_REGION_RECTS: usize = 64;

/// A disjoint piece of the input union and the inputs covering it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Region {
    /// Area covered.
    pub rect: IntRect,
    /// Bit `i` is set when input rectangle `i` covers `rect`.
    pub mask: u64,
}

impl Region {
    /// Returns `true` if input `index` covers this region.
    #[must_use]
    pub fn is_covered_by(&self, index: usize) -> bool {
        index < MAX_REGION_RECTS && self.mask & (1_u64 << index) != 0
    }

    /// Indices of the covering inputs, ascending.
    pub fn members(&self) -> impl Iterator<Item = usize> + use<> {
        mask_bits(self.mask)
    }
}

/// Iterates the set bits of `mask`, lowest first.
pub(crate) fn mask_bits(mut mask: u64) -> impl Iterator<Item = usize> {
    core::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let bit = mask.trailing_zeros() as usize;
        mask &= mask - 1;
        Some(bit)
    })
}

/// Mask with the lowest `n` bits set.
pub(crate) const fn low_bits(n: usize) -> u64 {
    if n >= MAX_REGION_RECTS {
        u64::MAX
    } else {
        (1_u64 << n) - 1
    }
}

/// Output of [`RegionSplitter::split`].
///
/// Mask bits `0..exclusions` name the retained exclusion rectangles, bit
/// `exclusions + j` names subject rectangle `j`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegionSplit {
    /// Disjoint regions, in sweep order (top to bottom, left to right).
    pub regions: Vec<Region>,
    /// Number of exclusion rectangles that took part in the split.
    pub exclusions: usize,
    /// Number of exclusion rectangles dropped to fit the mask.
    pub truncated: usize,
}

impl RegionSplit {
    /// Mask of the retained exclusion rectangles.
    #[must_use]
    pub fn exclude_mask(&self) -> u64 {
        low_bits(self.exclusions)
    }

    /// Mask bit of subject rectangle `j`.
    #[must_use]
    pub fn subject_bit(&self, j: usize) -> u64 {
        1_u64 << (self.exclusions + j)
    }

    /// Regions touched by no exclusion rectangle.
    pub fn unexcluded(&self) -> impl Iterator<Item = &Region> {
        let exclude = self.exclude_mask();
        self.regions.iter().filter(move |r| r.mask & exclude == 0)
    }
}

/// Splits rectangle lists into disjoint regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegionSplitter {
    max_rects: usize,
}

impl Default for RegionSplitter {
    fn default() -> Self {
        Self::new(MAX_REGION_RECTS)
    }
}

impl RegionSplitter {
    /// Creates a splitter accepting up to `max_rects` inputs, clamped to
    /// `1..=64`.
    #[must_use]
    pub const fn new(max_rects: usize) -> Self {
        let max_rects = if max_rects == 0 {
            1
        } else if max_rects > MAX_REGION_RECTS {
            MAX_REGION_RECTS
        } else {
            max_rects
        };
        Self { max_rects }
    }

    /// Maximum number of input rectangles.
    #[must_use]
    pub const fn max_rects(&self) -> usize {
        self.max_rects
    }

    /// Decomposes `rects`, whose first `exclusion_count` entries are
    /// exclusion rectangles ordered from highest to lowest priority.
    ///
    /// Empty rectangles take a mask bit but produce no region. Fails with
    /// [`Error::RegionOverflow`] if the subject rectangles alone do not fit.
    pub fn split(&self, rects: &[IntRect], exclusion_count: usize) -> Result<RegionSplit> {
        let exclusion_count = exclusion_count.min(rects.len());
        let subjects = &rects[exclusion_count..];
        if subjects.len() > self.max_rects {
            return Err(Error::RegionOverflow {
                rects: subjects.len(),
                max: self.max_rects,
            });
        }
        let kept = exclusion_count.min(self.max_rects - subjects.len());
        let truncated = exclusion_count - kept;
        if truncated > 0 {
            log::warn!(
                "dropping {truncated} exclusion rects to fit {} rectangles",
                self.max_rects
            );
        }

        let input: Vec<IntRect> = rects[..kept].iter().chain(subjects).copied().collect();
        Ok(RegionSplit {
            regions: separate(&input),
            exclusions: kept,
            truncated,
        })
    }
}

/// Sweep-line decomposition. `rects.len()` must not exceed 64.
fn separate(rects: &[IntRect]) -> Vec<Region> {
    debug_assert!(rects.len() <= MAX_REGION_RECTS, "mask too narrow");

    let mut ys: Vec<i32> = rects
        .iter()
        .filter(|r| !r.is_empty())
        .flat_map(|r| [r.top, r.bottom])
        .collect();
    ys.sort_unstable();
    ys.dedup();

    let mut out: Vec<Region> = Vec::new();
    // Regions whose bottom edge is the current band's top and may grow.
    let mut open: Vec<usize> = Vec::new();
    let mut xs: Vec<i32> = Vec::new();
    let mut pieces: Vec<(i32, i32, u64)> = Vec::new();

    for band in ys.windows(2) {
        let (y0, y1) = (band[0], band[1]);

        let mut band_mask = 0_u64;
        xs.clear();
        for (i, r) in rects.iter().enumerate() {
            if !r.is_empty() && r.top <= y0 && r.bottom >= y1 {
                band_mask |= 1_u64 << i;
                xs.push(r.left);
                xs.push(r.right);
            }
        }
        if band_mask == 0 {
            open.clear();
            continue;
        }
        xs.sort_unstable();
        xs.dedup();

        pieces.clear();
        for span in xs.windows(2) {
            let (x0, x1) = (span[0], span[1]);
            let mask = mask_bits(band_mask)
                .filter(|&i| rects[i].left <= x0 && rects[i].right >= x1)
                .fold(0_u64, |m, i| m | (1_u64 << i));
            if mask == 0 {
                continue;
            }
            match pieces.last_mut() {
                Some(last) if last.1 == x0 && last.2 == mask => last.1 = x1,
                _ => pieces.push((x0, x1, mask)),
            }
        }

        let mut next_open = Vec::with_capacity(pieces.len());
        for &(x0, x1, mask) in &pieces {
            let grows = open.iter().copied().find(|&idx| {
                let r = &out[idx];
                r.rect.left == x0 && r.rect.right == x1 && r.mask == mask && r.rect.bottom == y0
            });
            match grows {
                Some(idx) => {
                    out[idx].rect.bottom = y1;
                    next_open.push(idx);
                }
                None => {
                    out.push(Region {
                        rect: IntRect::new(x0, y0, x1, y1),
                        mask,
                    });
                    next_open.push(out.len() - 1);
                }
            }
        }
        open = next_open;
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic generator so property checks are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: i32) -> i32 {
            self.0 = self
                .0
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            ((self.0 >> 33) % u64::from(bound.unsigned_abs())) as i32
        }

        fn rect(&mut self, extent: i32) -> IntRect {
            let x = self.next(extent);
            let y = self.next(extent);
            let w = 1 + self.next(extent / 2);
            let h = 1 + self.next(extent / 2);
            IntRect::from_origin_size(x, y, w, h)
        }
    }

    fn covering_mask(rects: &[IntRect], x: i32, y: i32) -> u64 {
        rects
            .iter()
            .enumerate()
            .filter(|(_, r)| x >= r.left && x < r.right && y >= r.top && y < r.bottom)
            .fold(0, |m, (i, _)| m | (1_u64 << i))
    }

    fn check_properties(rects: &[IntRect], exclusions: usize) {
        let split = RegionSplitter::default().split(rects, exclusions).unwrap();
        let regions = &split.regions;

        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(
                    !a.rect.intersects(&b.rect),
                    "{a:?} overlaps {b:?} for {rects:?}"
                );
            }
            let mid_x = a.rect.left + a.rect.width() / 2;
            let mid_y = a.rect.top + a.rect.height() / 2;
            assert_eq!(
                covering_mask(rects, mid_x, mid_y),
                a.mask,
                "mask mismatch for {a:?}"
            );
        }

        let exclude = split.exclude_mask();
        let mut subject_px = 0_u64;
        let mut unexcluded_px = 0_u64;
        for y in -1..70 {
            for x in -1..70 {
                let m = covering_mask(rects, x, y);
                if m & !exclude != 0 {
                    subject_px += 1;
                    if m & exclude == 0 {
                        unexcluded_px += 1;
                    }
                }
            }
        }
        let region_subject: u64 = regions
            .iter()
            .filter(|r| r.mask & !exclude != 0)
            .map(|r| r.rect.area())
            .sum();
        let region_unexcluded: u64 = split
            .unexcluded()
            .map(|r| r.rect.area())
            .sum();
        assert_eq!(region_subject, subject_px, "subject union area");
        assert_eq!(region_unexcluded, unexcluded_px, "area outside exclusions");
    }

    #[test]
    fn single_rect_is_one_region() {
        let r = IntRect::new(0, 0, 10, 10);
        let split = RegionSplitter::default().split(&[r], 0).unwrap();
        assert_eq!(split.regions, [Region { rect: r, mask: 1 }]);
    }

    #[test]
    fn two_overlapping_rects() {
        let rects = [IntRect::new(0, 0, 10, 10), IntRect::new(5, 5, 15, 15)];
        let split = RegionSplitter::default().split(&rects, 0).unwrap();
        let both: Vec<_> = split.regions.iter().filter(|r| r.mask == 0b11).collect();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].rect, IntRect::new(5, 5, 10, 10));
        assert_eq!(split.regions.len(), 5, "{:?}", split.regions);
        check_properties(&rects, 0);
    }

    #[test]
    fn stacked_identical_rects_share_a_region() {
        let r = IntRect::new(0, 0, 32, 32);
        let split = RegionSplitter::default().split(&[r, r, r], 0).unwrap();
        assert_eq!(split.regions, [Region { rect: r, mask: 0b111 }]);
    }

    #[test]
    fn vertical_merge_across_bands() {
        // The middle rect splits the left column into bands that must be
        // merged back into one region.
        let rects = [IntRect::new(0, 0, 10, 30), IntRect::new(20, 10, 30, 20)];
        let split = RegionSplitter::default().split(&rects, 0).unwrap();
        assert_eq!(split.regions.len(), 2, "{:?}", split.regions);
    }

    #[test]
    fn empty_rects_produce_nothing() {
        let rects = [IntRect::ZERO, IntRect::new(4, 4, 8, 8)];
        let split = RegionSplitter::default().split(&rects, 0).unwrap();
        assert_eq!(split.regions.len(), 1);
        assert_eq!(split.regions[0].mask, 0b10);
    }

    #[test]
    fn random_decompositions_hold_invariants() {
        let mut rng = Lcg(0x5eed);
        for round in 0..60 {
            let count = 1 + usize::try_from(rng.next(9)).unwrap();
            let rects: Vec<IntRect> = (0..count).map(|_| rng.rect(48)).collect();
            let exclusions = usize::try_from(round % 3).unwrap().min(count - 1);
            check_properties(&rects, exclusions);
        }
    }

    #[test]
    fn overflow_truncates_lowest_priority_exclusions() {
        let splitter = RegionSplitter::new(4);
        let rects = [
            IntRect::new(0, 0, 4, 4),
            IntRect::new(10, 0, 14, 4),
            IntRect::new(20, 0, 24, 4),
            IntRect::new(0, 10, 4, 14),
            IntRect::new(10, 10, 14, 14),
        ];
        let split = splitter.split(&rects, 3).unwrap();
        assert_eq!(split.exclusions, 2);
        assert_eq!(split.truncated, 1);
        // The third exclusion rect was dropped, so its area is gone.
        assert!(split.regions.iter().all(|r| r.rect.left != 20));
        assert_eq!(split.subject_bit(0), 0b100);
    }

    #[test]
    fn too_many_subjects_is_an_error() {
        let splitter = RegionSplitter::new(2);
        let r = IntRect::new(0, 0, 1, 1);
        assert_eq!(
            splitter.split(&[r, r, r], 0),
            Err(Error::RegionOverflow { rects: 3, max: 2 })
        );
    }

    #[test]
    fn sixty_four_inputs_fit() {
        let rects: Vec<IntRect> = (0..64)
            .map(|i| IntRect::from_origin_size(i, 0, 2, 2))
            .collect();
        let split = RegionSplitter::default().split(&rects, 0).unwrap();
        assert!(split.regions.iter().any(|r| r.is_covered_by(63)));
    }
}
