// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Fences and the per-composition fence timeline.
//!
//! The platform provides monotonically advancing timelines with waitable
//! points, following POSIX sync-file timeline semantics: a fence created for
//! point `p` signals once the timeline has been advanced to `p` or beyond.
//! [`SyncTimeline`] and [`TimelineFactory`] abstract that primitive;
//! [`SoftwareTimeline`] is a portable in-memory implementation.
//!
//! Each [`FrameComposition`](crate::composition::FrameComposition) owns a
//! [`FenceTimeline`] that hands out increasing points for its release fences
//! and tracks the milestones (squash rendered, precomposition rendered,
//! composition superseded) at which those fences are signaled.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{FenceError, Result};

/// A waitable point on some timeline.
pub trait SyncPoint: Send + Sync {
    /// The timeline value at which this point signals.
    fn point(&self) -> u64;

    /// Returns `true` once the owning timeline has reached [`point`](Self::point).
    fn is_signaled(&self) -> bool;
}

/// A shareable handle to a [`SyncPoint`].
///
/// Fences are cheap to clone; every clone observes the same point.
#[derive(Clone)]
pub struct Fence {
    inner: Arc<dyn SyncPoint>,
}

impl Fence {
    /// Wraps a platform sync point.
    #[must_use]
    pub fn new(inner: Arc<dyn SyncPoint>) -> Self {
        Self { inner }
    }

    /// The timeline value this fence waits for.
    #[must_use]
    pub fn point(&self) -> u64 {
        self.inner.point()
    }

    /// Returns `true` once the fence has signaled.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.inner.is_signaled()
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_signaled() {
            "signaled"
        } else {
            "pending"
        };
        write!(f, "Fence({} {state})", self.point())
    }
}

/// A monotonically advancing timeline that fences can be created on.
pub trait SyncTimeline: Send + Sync {
    /// Creates a fence that signals when the timeline reaches `point`.
    ///
    /// `name` is a debugging label only.
    fn create_fence(&self, name: &str, point: u64) -> Result<Fence, FenceError>;

    /// Advances the timeline to `point`. Never moves the timeline backwards.
    fn advance_to(&self, point: u64);

    /// The current timeline value.
    fn current(&self) -> u64;
}

/// Creates one timeline per frame composition.
pub trait TimelineFactory: Send + Sync {
    /// Creates a fresh timeline starting at zero.
    fn create_timeline(&self) -> Result<Arc<dyn SyncTimeline>, FenceError>;
}

// ---------------------------------------------------------------------------
// Software timeline
// ---------------------------------------------------------------------------

/// An in-memory timeline backed by an atomic counter.
#[derive(Clone, Debug, Default)]
pub struct SoftwareTimeline {
    value: Arc<AtomicU64>,
}

impl SoftwareTimeline {
    /// Creates a timeline at value zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug)]
struct SoftwarePoint {
    value: Arc<AtomicU64>,
    point: u64,
}

impl SyncPoint for SoftwarePoint {
    fn point(&self) -> u64 {
        self.point
    }

    fn is_signaled(&self) -> bool {
        self.value.load(Ordering::Acquire) >= self.point
    }
}

impl SyncTimeline for SoftwareTimeline {
    fn create_fence(&self, _name: &str, point: u64) -> Result<Fence, FenceError> {
        Ok(Fence::new(Arc::new(SoftwarePoint {
            value: Arc::clone(&self.value),
            point,
        })))
    }

    fn advance_to(&self, point: u64) {
        self.value.fetch_max(point, Ordering::AcqRel);
    }

    fn current(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// A [`TimelineFactory`] producing [`SoftwareTimeline`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareTimelineFactory;

impl TimelineFactory for SoftwareTimelineFactory {
    fn create_timeline(&self) -> Result<Arc<dyn SyncTimeline>, FenceError> {
        Ok(Arc::new(SoftwareTimeline::new()))
    }
}

// ---------------------------------------------------------------------------
// FenceTimeline
// ---------------------------------------------------------------------------

/// Frame-local fence bookkeeping on top of a [`SyncTimeline`].
///
/// `created` is the highest point handed out; `realized` is the highest point
/// this composition has advanced the timeline to. Fences are never created
/// for points at or below `realized`, so a new fence always starts pending.
pub struct FenceTimeline {
    timeline: Arc<dyn SyncTimeline>,
    created: Arc<AtomicU64>,
    realized: u64,
    squash_done: u64,
    pre_comp_done: u64,
}

impl fmt::Debug for FenceTimeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceTimeline")
            .field("created", &self.last_created())
            .field("realized", &self.realized)
            .field("squash_done", &self.squash_done)
            .field("pre_comp_done", &self.pre_comp_done)
            .finish_non_exhaustive()
    }
}

impl FenceTimeline {
    /// Wraps a freshly created timeline.
    #[must_use]
    pub fn new(timeline: Arc<dyn SyncTimeline>) -> Self {
        Self {
            timeline,
            created: Arc::new(AtomicU64::new(0)),
            realized: 0,
            squash_done: 0,
            pre_comp_done: 0,
        }
    }

    /// Creates a fence at the next point.
    ///
    /// The counter only advances when the timeline accepts the fence, so
    /// points handed out are strictly increasing with no gaps.
    pub fn create_next_timeline_fence(&mut self, name: &str) -> Result<Fence> {
        let next = self.last_created().max(self.realized) + 1;
        let fence = self.timeline.create_fence(name, next)?;
        self.created.store(next, Ordering::Release);
        Ok(fence)
    }

    /// Advances the realized timeline to `point`.
    ///
    /// A no-op when `point` is at or below the already realized point.
    pub fn increase_timeline_to_point(&mut self, point: u64) {
        if point <= self.realized {
            return;
        }
        self.timeline.advance_to(point);
        self.realized = point;
    }

    /// Highest point handed out so far.
    #[must_use]
    pub fn last_created(&self) -> u64 {
        self.created.load(Ordering::Acquire)
    }

    /// Highest point this composition has realized.
    #[must_use]
    pub fn realized(&self) -> u64 {
        self.realized
    }

    /// Point signaled once the squash composite has been rendered.
    #[must_use]
    pub fn squash_done_point(&self) -> u64 {
        self.squash_done
    }

    /// Point signaled once the precomposition has been rendered.
    #[must_use]
    pub fn pre_comp_done_point(&self) -> u64 {
        self.pre_comp_done
    }

    pub(crate) fn set_squash_done_point(&mut self, point: u64) {
        self.squash_done = point;
    }

    pub(crate) fn set_pre_comp_done_point(&mut self, point: u64) {
        self.pre_comp_done = point;
    }

    /// Releases buffers consumed only by the squash composite.
    pub fn signal_squash_done(&mut self) {
        self.increase_timeline_to_point(self.squash_done);
    }

    /// Releases buffers consumed only by the precomposition.
    pub fn signal_pre_comp_done(&mut self) {
        self.increase_timeline_to_point(self.pre_comp_done);
    }

    /// Releases every buffer of the composition.
    pub fn signal_composition_done(&mut self) {
        self.increase_timeline_to_point(self.last_created());
    }

    /// Returns a handle that can force-signal this timeline from another
    /// thread while the composition itself is owned elsewhere.
    #[must_use]
    pub fn signal_handle(&self) -> SignalHandle {
        SignalHandle {
            timeline: Arc::clone(&self.timeline),
            created: Arc::clone(&self.created),
        }
    }
}

/// Force-signals every point a composition has handed out.
#[derive(Clone)]
pub struct SignalHandle {
    timeline: Arc<dyn SyncTimeline>,
    created: Arc<AtomicU64>,
}

impl SignalHandle {
    /// Advances the timeline past every fence created so far.
    pub fn signal_all(&self) {
        self.timeline
            .advance_to(self.created.load(Ordering::Acquire));
    }
}

impl fmt::Debug for SignalHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalHandle")
            .field("created", &self.created.load(Ordering::Relaxed))
            .field("current", &self.timeline.current())
            .finish()
    }
}
