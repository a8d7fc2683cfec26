// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Frame scheduling and the compositor façade for Strata.
//!
//! [`strata_core`] decides what each frame looks like; this crate gets it
//! onto the glass. Every output runs a [`FrameScheduler`] with its own
//! worker threads, so outputs never wait on each other, while a single
//! [`Compositor`] shares the plane pool between them.
//!
//! ```text
//!   Compositor::queue_composition(output, comp)
//!       │  plan and queue under the output lock, claim planes
//!       ▼
//!   FrameScheduler::queue()        blocks at queue_depth
//!       │
//!       ▼
//!   stage worker                   squash + precomposition + pre-transform
//!       │
//!       ▼
//!   commit worker                  dry run, apply, retire previous frame
//!       │
//!       ▼
//!   FrameEvent                     Presented / CommitFailed / ...
//! ```
//!
//! A failed commit force-signals every fence of the output and turns its
//! planes off; see [`FrameScheduler::clear_display`].
//!
//! # Crate features
//!
//! - `trace` (disabled by default): Enables [`strata_core::trace::Tracer`]
//!   method bodies so a sink passed to [`Compositor::with_trace_sink`]
//!   receives events.

mod error;
mod stage;

pub mod compositor;
pub mod scheduler;

pub use compositor::{Compositor, QueuedFrame};
pub use error::SchedulerError;
pub use scheduler::{AppliedHook, FrameEvent, FrameScheduler, OutputDevices, SharedTraceSink};
