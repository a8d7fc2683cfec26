// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Packing of several layers into one multi-area plane window.
//!
//! Planes with [`PlaneCaps::MULTI_AREA`](crate::plane::PlaneCaps::MULTI_AREA)
//! can scan out a handful of disjoint areas from different buffers. A group
//! of z-adjacent layers can share such a plane when no two of them overlap,
//! so their relative z-order is unobservable. Layers must also be unscaled,
//! untransformed RGB with equal plane alpha.

use alloc::vec::Vec;

use crate::layer::Layer;

/// Restrictions applied when grouping layers into one window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackingRules {
    /// Maximum number of areas per window.
    pub max_zones: usize,
    /// Require every member to share one pixel format.
    pub same_format: bool,
    /// Require members to occupy disjoint horizontal bands, so no scan line
    /// crosses two areas.
    pub horizontal_bands: bool,
}

impl Default for PackingRules {
    fn default() -> Self {
        Self {
            max_zones: 4,
            same_format: false,
            horizontal_bands: false,
        }
    }
}

/// Returns `true` if `layer` can be shown as one area of a packed window.
#[must_use]
pub fn is_packable(layer: &Layer) -> bool {
    !layer.format.is_yuv()
        && !layer.is_protected()
        && !layer.is_scaled()
        && layer.transform.is_empty()
        && !layer.display_frame.is_empty()
}

/// Returns `true` if `a` and `b` may share a window.
#[must_use]
pub fn can_combine(a: &Layer, b: &Layer, rules: &PackingRules) -> bool {
    if !is_packable(a) || !is_packable(b) {
        return false;
    }
    if a.alpha != b.alpha {
        return false;
    }
    if rules.same_format && a.format != b.format {
        return false;
    }
    let (ra, rb) = (&a.display_frame, &b.display_frame);
    if ra.intersects(rb) {
        return false;
    }
    if rules.horizontal_bands && ra.top < rb.bottom && rb.top < ra.bottom {
        return false;
    }
    true
}

/// Longest prefix of `run` that can share one window, ordered by top edge.
///
/// `run` lists layer indices front to back. Returns a single index when the
/// first layer cannot combine with the second.
#[must_use]
pub fn leading_window(layers: &[Layer], run: &[usize], rules: &PackingRules) -> Vec<usize> {
    let mut window: Vec<usize> = Vec::new();
    for &index in run {
        if window.len() >= rules.max_zones.max(1) {
            break;
        }
        let Some(layer) = layers.get(index) else {
            break;
        };
        let fits = window
            .iter()
            .all(|&member| can_combine(&layers[member], layer, rules));
        if !fits {
            break;
        }
        window.push(index);
    }
    window.sort_by_key(|&i| (layers[i].display_frame.top, layers[i].display_frame.left));
    window
}

/// Partitions `run` into consecutive windows.
#[must_use]
pub fn pack_windows(layers: &[Layer], run: &[usize], rules: &PackingRules) -> Vec<Vec<usize>> {
    let mut windows = Vec::new();
    let mut rest = run;
    while !rest.is_empty() {
        let window = leading_window(layers, rest, rules);
        let taken = window.len().max(1);
        windows.push(if window.is_empty() {
            alloc::vec![rest[0]]
        } else {
            window
        });
        rest = &rest[taken..];
    }
    windows
}
