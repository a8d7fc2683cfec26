// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compositor policy.

use crate::planner::PlannerConfig;
use crate::region::MAX_REGION_RECTS;
use crate::squash::{DEFAULT_HISTORY_LENGTH, MAX_HISTORY_LENGTH};

/// Configuration shared by the [`Planner`](crate::planner::Planner), the
/// squash cache and the per-output schedulers.
///
/// Out-of-range values are clamped by [`clamped`](Self::clamped), never
/// rejected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompositorConfig {
    /// Unchanged frames before a region may be squashed (1–32).
    pub history_length: u32,
    /// Compositions that may wait behind the active one (at least 1).
    pub queue_depth: usize,
    /// Rectangle limit of one region split (1–64).
    pub max_region_rects: usize,
    /// Cache stable regions in a squash composite.
    pub squash: bool,
    /// Run staging and committing on separate worker threads.
    pub decoupled_commit: bool,
    /// Show rotations on planes that cannot rotate by rendering the layer
    /// into a scratch buffer first.
    pub pre_transform: bool,
    /// Dry-run the commit of a frame whose geometry changed.
    pub test_commit: bool,
    /// Remaining planner policy.
    pub planner: PlannerConfig,
}

impl CompositorConfig {
    /// Squash on, one queued frame, decoupled commit.
    pub const DEFAULT: Self = Self {
        history_length: DEFAULT_HISTORY_LENGTH,
        queue_depth: 1,
        max_region_rects: MAX_REGION_RECTS,
        squash: true,
        decoupled_commit: true,
        pre_transform: true,
        test_commit: true,
        planner: PlannerConfig::DEFAULT,
    };

    /// One worker per output and no squash cache.
    #[must_use]
    pub const fn low_latency() -> Self {
        Self {
            squash: false,
            decoupled_commit: false,
            ..Self::DEFAULT
        }
    }

    /// Squash only regions that have been idle for longer.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            history_length: 10,
            ..Self::DEFAULT
        }
    }

    /// Returns a copy with every field in range and the planner policy
    /// brought in line with the top-level switches.
    #[must_use]
    pub fn clamped(self) -> Self {
        let max_region_rects = self.max_region_rects.clamp(1, MAX_REGION_RECTS);
        Self {
            history_length: self.history_length.clamp(1, MAX_HISTORY_LENGTH),
            queue_depth: self.queue_depth.max(1),
            max_region_rects,
            planner: PlannerConfig {
                pre_transform: self.pre_transform,
                max_region_rects,
                max_window_zones: self.planner.max_window_zones.max(1),
                ..self.planner
            },
            ..self
        }
    }
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CompositorConfig::default();
        assert_eq!(config.history_length, 6);
        assert_eq!(config.queue_depth, 1);
        assert_eq!(config.max_region_rects, 64);
        assert!(config.squash && config.decoupled_commit && config.test_commit);
        assert!(!config.planner.window_packing, "packing is opt-in");
    }

    #[test]
    fn presets() {
        let fast = CompositorConfig::low_latency();
        assert!(!fast.squash);
        assert!(!fast.decoupled_commit);
        assert_eq!(CompositorConfig::conservative().history_length, 10);
    }

    #[test]
    fn clamping() {
        let config = CompositorConfig {
            history_length: 0,
            queue_depth: 0,
            max_region_rects: 1000,
            pre_transform: false,
            ..CompositorConfig::DEFAULT
        }
        .clamped();
        assert_eq!(config.history_length, 1);
        assert_eq!(config.queue_depth, 1);
        assert_eq!(config.max_region_rects, 64);
        assert_eq!(config.planner.max_region_rects, 64);
        assert!(!config.planner.pre_transform, "top-level switch wins");

        let long = CompositorConfig {
            history_length: 100,
            ..CompositorConfig::DEFAULT
        }
        .clamped();
        assert_eq!(long.history_length, 32);
    }
}
