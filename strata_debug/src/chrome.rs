// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Chrome Trace Event Format exporter.
//!
//! [`export`] reads recorded bytes from a [`RecorderSink`](super::recorder::RecorderSink)
//! and writes [Chrome Trace Event Format][format] JSON to the given writer.
//! Each output becomes a process; stages run on per-stage threads so the
//! stage and commit workers show up as separate tracks.
//!
//! [format]: https://docs.google.com/document/d/1CvAClvFfyA5R-PhYUmn5OOQtYMH4h6I0nSsKchNAySU

use std::io::{self, Write};

use serde_json::{Value, json};

use strata_core::trace::StageKind;

use crate::recorder::{RecordedEvent, decode};

/// Exports recorded events as Chrome Trace Event Format JSON.
///
/// The output is a complete JSON array of trace event objects, suitable for
/// loading into `chrome://tracing` or [Perfetto](https://ui.perfetto.dev/).
pub fn export(bytes: &[u8], writer: &mut dyn Write) -> io::Result<()> {
    let mut events: Vec<Value> = Vec::new();

    for recorded in decode(bytes) {
        match recorded {
            RecordedEvent::Plan(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Plan",
                    "cat": "Planner",
                    "ts": ns_to_us(e.timestamp_ns),
                    "pid": e.output.0,
                    "tid": 0,
                    "s": "t",
                    "args": {
                        "frame_no": e.frame_no,
                        "layers": e.layers,
                        "direct": e.direct,
                        "precomposed": e.precomposed,
                        "squash": e.squash,
                        "degraded": format!("{:?}", e.degraded),
                    }
                }));
            }
            RecordedEvent::Squash(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "Squash",
                    "cat": "Squash",
                    "ts": 0,
                    "pid": e.output.0,
                    "tid": 1,
                    "s": "p",
                    "args": {
                        "frame_no": e.frame_no,
                        "regions": e.regions,
                        "reused": e.reused,
                    }
                }));
            }
            RecordedEvent::Stage(e) => {
                events.push(json!({
                    "ph": "X",
                    "name": format!("{:?}", e.stage),
                    "cat": "Frame",
                    "ts": ns_to_us(e.start_ns),
                    "dur": ns_to_us(e.end_ns.saturating_sub(e.start_ns)),
                    "pid": e.output.0,
                    "tid": stage_track(e.stage),
                    "args": {
                        "frame_no": e.frame_no,
                    }
                }));
            }
            RecordedEvent::Commit(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": if e.ok { "Commit" } else { "CommitRejected" },
                    "cat": "Commit",
                    "ts": ns_to_us(e.timestamp_ns),
                    "pid": e.output.0,
                    "tid": 2,
                    "s": "t",
                    "args": {
                        "frame_no": e.frame_no,
                        "mode": format!("{:?}", e.mode),
                        "planes": e.planes,
                    }
                }));
            }
            RecordedEvent::Clear(e) => {
                events.push(json!({
                    "ph": "i",
                    "name": "ClearDisplay",
                    "cat": "Commit",
                    "ts": ns_to_us(e.timestamp_ns),
                    "pid": e.output.0,
                    "tid": 2,
                    "s": "p",
                    "args": {
                        "reason": format!("{:?}", e.reason),
                        "compositions": e.compositions,
                    }
                }));
            }
        }
    }

    serde_json::to_writer_pretty(writer, &events)?;
    Ok(())
}

fn stage_track(stage: StageKind) -> u32 {
    match stage {
        StageKind::Plan => 0,
        StageKind::Prepare => 1,
        StageKind::TestCommit | StageKind::Commit => 2,
    }
}

fn ns_to_us(ns: u64) -> f64 {
    ns as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::RecorderSink;
    use strata_core::backend::CommitMode;
    use strata_core::output::OutputId;
    use strata_core::trace::{CommitEvent, StageEvent, TraceSink};

    #[test]
    fn stages_export_as_complete_events() {
        let mut rec = RecorderSink::new();
        rec.on_stage(&StageEvent {
            output: OutputId(1),
            frame_no: 4,
            stage: StageKind::Prepare,
            start_ns: 1_000,
            end_ns: 3_500,
        });
        rec.on_commit(&CommitEvent {
            output: OutputId(1),
            frame_no: 4,
            timestamp_ns: 4_000,
            mode: CommitMode::Apply,
            planes: 2,
            ok: true,
        });

        let mut out = Vec::new();
        export(rec.as_bytes(), &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed.len(), 2);

        assert_eq!(parsed[0]["ph"], "X");
        assert_eq!(parsed[0]["name"], "Prepare");
        assert_eq!(parsed[0]["dur"], 2.5);
        assert_eq!(parsed[0]["pid"], 1);

        assert_eq!(parsed[1]["name"], "Commit");
        assert_eq!(parsed[1]["args"]["mode"], "Apply");
    }

    #[test]
    fn export_empty_recording() {
        let mut out = Vec::new();
        export(&[], &mut out).unwrap();
        let parsed: Vec<Value> = serde_json::from_slice(&out).unwrap();
        assert!(parsed.is_empty());
    }
}
