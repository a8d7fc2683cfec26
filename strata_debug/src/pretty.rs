// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Human-readable trace output.
//!
//! [`PrettyPrintSink`] implements [`TraceSink`] and writes one line per event
//! to a [`Write`](std::io::Write) destination (default: stderr). Timestamps
//! are printed in microseconds since the emitting scheduler started.

use std::io::Write;

use strata_core::backend::CommitMode;
use strata_core::trace::{
    ClearEvent, ClearReason, CommitEvent, PlanEvent, SquashEvent, StageEvent, StageKind,
    TraceSink,
};

/// Writes human-readable trace lines to a [`Write`](std::io::Write) destination.
pub struct PrettyPrintSink<W: Write = Box<dyn Write + Send>> {
    writer: W,
}

impl<W: Write> std::fmt::Debug for PrettyPrintSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrettyPrintSink").finish_non_exhaustive()
    }
}

impl PrettyPrintSink {
    /// Creates a sink that writes to stderr.
    #[must_use]
    pub fn stderr() -> Self {
        Self {
            writer: Box::new(std::io::stderr()),
        }
    }
}

impl<W: Write> PrettyPrintSink<W> {
    /// Creates a sink that writes to the given destination.
    #[must_use]
    pub fn with_writer(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink and returns its destination.
    #[must_use]
    pub fn into_writer(self) -> W {
        self.writer
    }
}

fn us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

fn stage_name(stage: StageKind) -> &'static str {
    match stage {
        StageKind::Plan => "plan",
        StageKind::Prepare => "prepare",
        StageKind::TestCommit => "test",
        StageKind::Commit => "commit",
    }
}

fn reason_name(reason: ClearReason) -> &'static str {
    match reason {
        ClearReason::CommitFailed => "commit-failed",
        ClearReason::PowerOff => "power-off",
        ClearReason::Requested => "requested",
        ClearReason::Shutdown => "shutdown",
    }
}

impl<W: Write> TraceSink for PrettyPrintSink<W> {
    fn on_plan(&mut self, e: &PlanEvent) {
        let _ = writeln!(
            self.writer,
            "[plan] output={} frame={} at {:.1}µs layers={} direct={} precomp={} squash={} degraded={:?}",
            e.output.0,
            e.frame_no,
            us(e.timestamp_ns),
            e.layers,
            e.direct,
            e.precomposed,
            e.squash,
            e.degraded,
        );
    }

    fn on_squash(&mut self, e: &SquashEvent) {
        let how = if e.reused { "reused" } else { "rendered" };
        let _ = writeln!(
            self.writer,
            "[squash] output={} frame={} regions={} {how}",
            e.output.0, e.frame_no, e.regions,
        );
    }

    fn on_stage(&mut self, e: &StageEvent) {
        let _ = writeln!(
            self.writer,
            "[stage] output={} frame={} {} {:.1}µs..{:.1}µs",
            e.output.0,
            e.frame_no,
            stage_name(e.stage),
            us(e.start_ns),
            us(e.end_ns),
        );
    }

    fn on_commit(&mut self, e: &CommitEvent) {
        let mode = match e.mode {
            CommitMode::TestOnly => "test",
            CommitMode::Apply => "apply",
        };
        let result = if e.ok { "ok" } else { "REJECTED" };
        let _ = writeln!(
            self.writer,
            "[commit] output={} frame={} {mode} planes={} {result}",
            e.output.0, e.frame_no, e.planes,
        );
    }

    fn on_clear(&mut self, e: &ClearEvent) {
        let _ = writeln!(
            self.writer,
            "[clear] output={} at {:.1}µs reason={} compositions={}",
            e.output.0,
            us(e.timestamp_ns),
            reason_name(e.reason),
            e.compositions,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::output::OutputId;

    #[test]
    fn rejected_commit_is_flagged() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_commit(&CommitEvent {
            output: OutputId(2),
            frame_no: 9,
            timestamp_ns: 1_500,
            mode: CommitMode::Apply,
            planes: 3,
            ok: false,
        });
        let output = String::from_utf8(sink.into_writer()).unwrap();
        assert!(output.starts_with("[commit]"), "got: {output}");
        assert!(output.contains("output=2 frame=9 apply"), "got: {output}");
        assert!(output.contains("REJECTED"), "got: {output}");
    }

    #[test]
    fn clear_prints_reason() {
        let mut sink = PrettyPrintSink::with_writer(Vec::<u8>::new());
        sink.on_clear(&ClearEvent {
            output: OutputId(0),
            timestamp_ns: 2_000,
            reason: ClearReason::PowerOff,
            compositions: 1,
        });
        let output = String::from_utf8(sink.into_writer()).unwrap();
        assert!(output.contains("at 2.0µs"), "got: {output}");
        assert!(output.contains("reason=power-off"), "got: {output}");
    }
}
