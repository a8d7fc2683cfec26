// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tracing hooks for planning and committing.
//!
//! This module provides a [`TraceSink`] trait with one method per event the
//! compositor emits. All method bodies default to no-ops, so implementing
//! only the events you care about is fine.
//!
//! [`Tracer`] wraps an optional `&mut dyn TraceSink`. When the `trace` feature
//! is **off**, every `Tracer` method compiles to nothing. When **on**, each
//! method performs a single `Option` branch before dispatching.
//!
//! Timestamps are nanoseconds since the emitting scheduler started.
//!
//! # Crate features
//!
//! - `trace` — enables the `Tracer` method bodies (one branch per call).

use crate::backend::CommitMode;
use crate::output::OutputId;
use crate::planner::{CompositionPlan, CompositionPlanEntry, DegradeReason, Fidelity};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which scheduler stage is being measured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    /// Planning on the producer thread.
    Plan,
    /// Off-screen composites and pre-transforms.
    Prepare,
    /// Dry-run commit.
    TestCommit,
    /// Real commit.
    Commit,
}

/// Why a display was cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ClearReason {
    /// The hardware rejected a commit.
    CommitFailed,
    /// The display was powered off.
    PowerOff,
    /// The caller asked for it, e.g. on hotplug.
    Requested,
    /// The scheduler is shutting down.
    Shutdown,
}

// ---------------------------------------------------------------------------
// Event structs
// ---------------------------------------------------------------------------

/// Emitted after a frame has been planned.
#[derive(Clone, Copy, Debug)]
pub struct PlanEvent {
    /// Output planned for.
    pub output: OutputId,
    /// Frame number.
    pub frame_no: u64,
    /// Time the plan finished.
    pub timestamp_ns: u64,
    /// Layers in the stack.
    pub layers: u32,
    /// Layers scanned out directly or in packed windows.
    pub direct: u32,
    /// Layers in the precomposition.
    pub precomposed: u32,
    /// Whether a squash composite is shown.
    pub squash: bool,
    /// Fallbacks taken; empty for an exact plan.
    pub degraded: DegradeReason,
}

impl PlanEvent {
    /// Summarises `plan` for a stack of `layers` layers.
    #[must_use]
    pub fn new(
        output: OutputId,
        frame_no: u64,
        timestamp_ns: u64,
        layers: usize,
        plan: &CompositionPlan,
    ) -> Self {
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let precomposed = plan.precomposition().map_or(0, |(_, l)| l.len());
        let direct = plan
            .entries()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    CompositionPlanEntry::DirectLayer { .. } | CompositionPlanEntry::Packed { .. }
                )
            })
            .map(|e| e.layers().len())
            .sum();
        Self {
            output,
            frame_no,
            timestamp_ns,
            layers: count(layers),
            direct: count(direct),
            precomposed: count(precomposed),
            squash: plan.squash_plane().is_some(),
            degraded: match plan.fidelity() {
                Fidelity::Exact => DegradeReason::empty(),
                Fidelity::Degraded(reason) => reason,
            },
        }
    }
}

/// Emitted after the squash cache has been consulted for a frame.
#[derive(Clone, Copy, Debug)]
pub struct SquashEvent {
    /// Output.
    pub output: OutputId,
    /// Frame number.
    pub frame_no: u64,
    /// Regions rendered into the squash composite.
    pub regions: u32,
    /// Whether the previous composite was shown again.
    pub reused: bool,
}

/// Emitted when a scheduler stage finishes.
#[derive(Clone, Copy, Debug)]
pub struct StageEvent {
    /// Output.
    pub output: OutputId,
    /// Frame number.
    pub frame_no: u64,
    /// Which stage ran.
    pub stage: StageKind,
    /// Start of the stage.
    pub start_ns: u64,
    /// End of the stage.
    pub end_ns: u64,
}

/// Emitted for every commit handed to the backend.
#[derive(Clone, Copy, Debug)]
pub struct CommitEvent {
    /// Output.
    pub output: OutputId,
    /// Frame number.
    pub frame_no: u64,
    /// Time the backend returned.
    pub timestamp_ns: u64,
    /// Dry run or real commit.
    pub mode: CommitMode,
    /// Enabled planes in the request.
    pub planes: u32,
    /// Whether the backend accepted the commit.
    pub ok: bool,
}

/// Emitted when a display is cleared.
#[derive(Clone, Copy, Debug)]
pub struct ClearEvent {
    /// Output.
    pub output: OutputId,
    /// Time the clear finished.
    pub timestamp_ns: u64,
    /// Why the display was cleared.
    pub reason: ClearReason,
    /// Compositions whose fences were force-signaled.
    pub compositions: u32,
}

// ---------------------------------------------------------------------------
// TraceSink trait
// ---------------------------------------------------------------------------

/// Receives trace events from the compositor.
///
/// All methods have default no-op implementations, so you only need to
/// override the events you care about.
pub trait TraceSink {
    /// Called after a frame has been planned.
    fn on_plan(&mut self, e: &PlanEvent) {
        _ = e;
    }

    /// Called after the squash cache has been consulted.
    fn on_squash(&mut self, e: &SquashEvent) {
        _ = e;
    }

    /// Called when a scheduler stage finishes.
    fn on_stage(&mut self, e: &StageEvent) {
        _ = e;
    }

    /// Called for every commit.
    fn on_commit(&mut self, e: &CommitEvent) {
        _ = e;
    }

    /// Called when a display is cleared.
    fn on_clear(&mut self, e: &ClearEvent) {
        _ = e;
    }
}

// ---------------------------------------------------------------------------
// NoopSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that discards all events.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;

impl TraceSink for NoopSink {}

// ---------------------------------------------------------------------------
// Tracer wrapper
// ---------------------------------------------------------------------------

/// Thin wrapper around an optional [`TraceSink`].
///
/// When the `trace` feature is **off**, every method compiles to nothing. When
/// **on**, each method checks the inner `Option` (one branch) before
/// dispatching to the sink.
pub struct Tracer<'a> {
    #[cfg(feature = "trace")]
    sink: Option<&'a mut dyn TraceSink>,
    #[cfg(not(feature = "trace"))]
    _marker: core::marker::PhantomData<&'a mut dyn TraceSink>,
}

impl core::fmt::Debug for Tracer<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Tracer").finish_non_exhaustive()
    }
}

impl<'a> Tracer<'a> {
    /// Creates a tracer that dispatches to the given sink.
    #[inline]
    #[must_use]
    pub fn new(sink: &'a mut dyn TraceSink) -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: Some(sink) }
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = sink;
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Creates a tracer that discards all events.
    #[inline]
    #[must_use]
    pub fn none() -> Self {
        #[cfg(feature = "trace")]
        {
            Self { sink: None }
        }
        #[cfg(not(feature = "trace"))]
        {
            Self {
                _marker: core::marker::PhantomData,
            }
        }
    }

    /// Emits a [`PlanEvent`].
    #[inline]
    pub fn plan(&mut self, e: &PlanEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_plan(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`SquashEvent`].
    #[inline]
    pub fn squash(&mut self, e: &SquashEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_squash(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`StageEvent`].
    #[inline]
    pub fn stage(&mut self, e: &StageEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_stage(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`CommitEvent`].
    #[inline]
    pub fn commit(&mut self, e: &CommitEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_commit(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }

    /// Emits a [`ClearEvent`].
    #[inline]
    pub fn clear(&mut self, e: &ClearEvent) {
        #[cfg(feature = "trace")]
        if let Some(s) = &mut self.sink {
            s.on_clear(e);
        }
        #[cfg(not(feature = "trace"))]
        {
            _ = e;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plane::PlaneId;

    fn sample_plan() -> CompositionPlan {
        let mut plan = CompositionPlan::new();
        plan.push(CompositionPlanEntry::SquashComposite { plane: PlaneId(3) })
            .unwrap();
        plan.push(CompositionPlanEntry::DirectLayer {
            plane: PlaneId(1),
            layer: 0,
            pre_transform: false,
        })
        .unwrap();
        plan.push(CompositionPlanEntry::Precomposition {
            plane: PlaneId(2),
            layers: alloc::vec![1, 2, 3],
        })
        .unwrap();
        plan.degrade(DegradeReason::CAPABILITY_FALLBACK);
        plan
    }

    #[test]
    fn plan_event_counts_entries() {
        let evt = PlanEvent::new(OutputId(2), 9, 1_000, 5, &sample_plan());
        assert_eq!(evt.output, OutputId(2));
        assert_eq!(evt.layers, 5);
        assert_eq!(evt.direct, 1);
        assert_eq!(evt.precomposed, 3);
        assert!(evt.squash);
        assert_eq!(evt.degraded, DegradeReason::CAPABILITY_FALLBACK);
    }

    #[test]
    fn noop_sink_compiles() {
        let mut sink = NoopSink;
        sink.on_plan(&PlanEvent::new(OutputId(0), 0, 0, 0, &CompositionPlan::new()));
        sink.on_clear(&ClearEvent {
            output: OutputId(0),
            timestamp_ns: 0,
            reason: ClearReason::Requested,
            compositions: 0,
        });
    }

    #[test]
    fn tracer_none_does_nothing() {
        let mut tracer = Tracer::none();
        tracer.stage(&StageEvent {
            output: OutputId(0),
            frame_no: 1,
            stage: StageKind::Prepare,
            start_ns: 10,
            end_ns: 20,
        });
    }

    #[cfg(feature = "trace")]
    #[test]
    fn tracer_dispatches_to_sink() {
        use alloc::vec::Vec;

        struct RecordingSink {
            commits: Vec<(u64, bool)>,
        }
        impl TraceSink for RecordingSink {
            fn on_commit(&mut self, e: &CommitEvent) {
                self.commits.push((e.frame_no, e.ok));
            }
        }

        let mut sink = RecordingSink {
            commits: Vec::new(),
        };
        let mut tracer = Tracer::new(&mut sink);
        tracer.commit(&CommitEvent {
            output: OutputId(0),
            frame_no: 4,
            timestamp_ns: 0,
            mode: CommitMode::Apply,
            planes: 2,
            ok: false,
        });
        // Access sink after tracer is dropped.
        drop(tracer);
        assert_eq!(sink.commits, &[(4, false)]);
    }
}
