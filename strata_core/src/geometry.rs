// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Integer display geometry.
//!
//! Display frames, squash regions and precomposition regions live on the
//! integer pixel grid, so they use [`IntRect`]. Source crops are subpixel and
//! use [`kurbo::Rect`] directly.

use core::fmt;

/// An axis-aligned rectangle on the integer pixel grid.
///
/// Edges are half-open: `left`/`top` are inclusive, `right`/`bottom` are
/// exclusive. A rectangle with `right <= left` or `bottom <= top` is empty.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IntRect {
    /// Left edge (inclusive).
    pub left: i32,
    /// Top edge (inclusive).
    pub top: i32,
    /// Right edge (exclusive).
    pub right: i32,
    /// Bottom edge (exclusive).
    pub bottom: i32,
}

impl IntRect {
    /// The empty rectangle at the origin.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    /// Creates a rectangle from its four edges.
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Creates a rectangle from an origin and a size.
    #[must_use]
    pub const fn from_origin_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self::new(x, y, x.saturating_add(width), y.saturating_add(height))
    }

    /// Width in pixels, zero when empty.
    #[must_use]
    pub const fn width(&self) -> i32 {
        if self.right > self.left {
            self.right - self.left
        } else {
            0
        }
    }

    /// Height in pixels, zero when empty.
    #[must_use]
    pub const fn height(&self) -> i32 {
        if self.bottom > self.top {
            self.bottom - self.top
        } else {
            0
        }
    }

    /// Returns `true` if the rectangle covers no pixels.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.right <= self.left || self.bottom <= self.top
    }

    /// Number of covered pixels.
    #[must_use]
    pub fn area(&self) -> u64 {
        u64::from(self.width().unsigned_abs()) * u64::from(self.height().unsigned_abs())
    }

    /// Returns the overlap of two rectangles, or `None` if they are disjoint.
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Option<Self> {
        let r = Self::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Returns `true` if the rectangles share at least one pixel.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersect(other).is_some()
    }

    /// Returns `true` if `other` lies entirely inside `self`.
    #[must_use]
    pub const fn contains_rect(&self, other: &Self) -> bool {
        other.is_empty()
            || (other.left >= self.left
                && other.top >= self.top
                && other.right <= self.right
                && other.bottom <= self.bottom)
    }

    /// Returns the smallest rectangle covering both inputs.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Converts to a floating-point [`kurbo::Rect`].
    #[must_use]
    pub fn to_kurbo(&self) -> kurbo::Rect {
        kurbo::Rect::new(
            f64::from(self.left),
            f64::from(self.top),
            f64::from(self.right),
            f64::from(self.bottom),
        )
    }
}

impl fmt::Debug for IntRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_of_empty_is_zero() {
        assert_eq!(IntRect::new(10, 10, 5, 20).area(), 0);
        assert_eq!(IntRect::ZERO.area(), 0);
        assert_eq!(IntRect::new(0, 0, 4, 3).area(), 12);
    }

    #[test]
    fn intersect_disjoint_and_touching() {
        let a = IntRect::new(0, 0, 10, 10);
        let b = IntRect::new(10, 0, 20, 10);
        assert_eq!(a.intersect(&b), None, "touching edges do not overlap");

        let c = IntRect::new(5, 5, 15, 15);
        assert_eq!(a.intersect(&c), Some(IntRect::new(5, 5, 10, 10)));
        assert!(a.intersects(&c));
    }

    #[test]
    fn union_skips_empty() {
        let a = IntRect::new(0, 0, 10, 10);
        assert_eq!(a.union(&IntRect::ZERO), a);
        assert_eq!(
            a.union(&IntRect::new(20, 5, 30, 15)),
            IntRect::new(0, 0, 30, 15)
        );
    }

    #[test]
    fn contains() {
        let a = IntRect::from_origin_size(0, 0, 100, 100);
        assert!(a.contains_rect(&IntRect::new(10, 10, 20, 20)));
        assert!(!a.contains_rect(&IntRect::new(90, 90, 110, 100)));
    }
}
