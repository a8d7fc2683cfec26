// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Plane planning and frame compositions for hardware display composition.
//!
//! `strata_core` decides, once per output per frame, how to show a stack of
//! layers with a few hardware scan-out planes, falling back to off-screen
//! composites only where it must. It is `no_std` compatible (with `alloc`)
//! and never talks to hardware itself: every platform collaborator is a
//! trait in [`backend`].
//!
//! # Architecture
//!
//! ```text
//!   caller layers
//!       │
//!       ▼
//!   FrameComposition::set_layers() ──► BufferImporter
//!       │
//!       ▼
//!   FrameComposition::plan()
//!       ├─► ChangeHistoryCache (squash)   which regions are idle
//!       ├─► Planner::plan()               layers onto planes
//!       ├─► separate_layers()             precomposition regions
//!       └─► release fences                FenceTimeline
//!       │
//!       ▼
//!   scheduler: composite, commit, retire  (strata_scheduler)
//! ```
//!
//! **[`planner`]** — Greedy most-capable-first plane assignment. Leftover
//! layers share one precomposition; idle regions may share one squash
//! composite. Protected layers always get a plane of their own.
//!
//! **[`region`]** — Splits overlapping rectangles into disjoint regions
//! tagged with the set of inputs covering them.
//!
//! **[`squash`]** — Per-region change history deciding which regions have
//! been idle long enough to be served from a cached composite.
//!
//! **[`composition`]** — [`FrameComposition`](composition::FrameComposition),
//! one output's frame: layers, plan, regions and fence timeline.
//!
//! **[`fence`]** — Sync timelines and the per-frame milestone fences.
//!
//! **[`plane`]** — Planes, capability ranking and the
//! [`PlaneRoster`](plane::PlaneRoster) shared by all outputs.
//!
//! **[`packing`]** — Optional grouping of disjoint layers onto multi-area
//! planes.
//!
//! **[`trace`]** — [`TraceSink`](trace::TraceSink) trait and event types,
//! with a zero-overhead [`Tracer`](trace::Tracer) wrapper.
//!
//! # Crate features
//!
//! - `std` (disabled by default): Enables `std` support in dependencies.
//! - `trace` (disabled by default): Enables `Tracer` method bodies (one branch
//!   per call site).

#![no_std]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;

pub mod backend;
pub mod composition;
pub mod config;
pub mod error;
pub mod fence;
pub mod geometry;
pub mod layer;
pub mod output;
pub mod packing;
pub mod plane;
pub mod planner;
pub mod region;
pub mod squash;
pub mod trace;

pub use error::{Error, Result};
