// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary event recording and decoding.
//!
//! [`RecorderSink`] implements [`TraceSink`] and encodes events into a
//! `Vec<u8>` as fixed-size little-endian records. [`decode`] reads them back
//! as an iterator of [`RecordedEvent`].

use strata_core::backend::CommitMode;
use strata_core::output::OutputId;
use strata_core::planner::DegradeReason;
use strata_core::trace::{
    ClearEvent, ClearReason, CommitEvent, PlanEvent, SquashEvent, StageEvent, StageKind,
    TraceSink,
};

// ---------------------------------------------------------------------------
// Event type discriminants
// ---------------------------------------------------------------------------

const TAG_PLAN: u8 = 1;
const TAG_SQUASH: u8 = 2;
const TAG_STAGE: u8 = 3;
const TAG_COMMIT: u8 = 4;
const TAG_CLEAR: u8 = 5;

// ---------------------------------------------------------------------------
// RecorderSink
// ---------------------------------------------------------------------------

/// A [`TraceSink`] that encodes events into a compact binary buffer.
#[derive(Debug, Default)]
pub struct RecorderSink {
    buf: Vec<u8>,
}

impl RecorderSink {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a view of the recorded bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consumes the recorder and returns the recorded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    // -- encoding helpers --------------------------------------------------

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_header(&mut self, tag: u8, output: OutputId) {
        self.write_u8(tag);
        self.write_u32(output.0);
    }
}

impl TraceSink for RecorderSink {
    fn on_plan(&mut self, e: &PlanEvent) {
        self.write_header(TAG_PLAN, e.output);
        self.write_u64(e.frame_no);
        self.write_u64(e.timestamp_ns);
        self.write_u32(e.layers);
        self.write_u32(e.direct);
        self.write_u32(e.precomposed);
        self.write_bool(e.squash);
        self.write_u8(e.degraded.bits());
    }

    fn on_squash(&mut self, e: &SquashEvent) {
        self.write_header(TAG_SQUASH, e.output);
        self.write_u64(e.frame_no);
        self.write_u32(e.regions);
        self.write_bool(e.reused);
    }

    fn on_stage(&mut self, e: &StageEvent) {
        self.write_header(TAG_STAGE, e.output);
        self.write_u64(e.frame_no);
        self.write_u8(match e.stage {
            StageKind::Plan => 0,
            StageKind::Prepare => 1,
            StageKind::TestCommit => 2,
            StageKind::Commit => 3,
        });
        self.write_u64(e.start_ns);
        self.write_u64(e.end_ns);
    }

    fn on_commit(&mut self, e: &CommitEvent) {
        self.write_header(TAG_COMMIT, e.output);
        self.write_u64(e.frame_no);
        self.write_u64(e.timestamp_ns);
        self.write_bool(e.mode == CommitMode::Apply);
        self.write_u32(e.planes);
        self.write_bool(e.ok);
    }

    fn on_clear(&mut self, e: &ClearEvent) {
        self.write_header(TAG_CLEAR, e.output);
        self.write_u64(e.timestamp_ns);
        self.write_u8(match e.reason {
            ClearReason::CommitFailed => 0,
            ClearReason::PowerOff => 1,
            ClearReason::Requested => 2,
            ClearReason::Shutdown => 3,
        });
        self.write_u32(e.compositions);
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// A decoded event from a binary recording.
#[derive(Clone, Copy, Debug)]
pub enum RecordedEvent {
    /// A [`PlanEvent`].
    Plan(PlanEvent),
    /// A [`SquashEvent`].
    Squash(SquashEvent),
    /// A [`StageEvent`].
    Stage(StageEvent),
    /// A [`CommitEvent`].
    Commit(CommitEvent),
    /// A [`ClearEvent`].
    Clear(ClearEvent),
}

/// Decodes a byte slice produced by [`RecorderSink`] into an iterator of
/// [`RecordedEvent`].
///
/// Iteration stops at the first truncated record or unknown tag.
pub fn decode(bytes: &[u8]) -> DecodeIter<'_> {
    DecodeIter {
        data: bytes,
        pos: 0,
    }
}

/// Iterator over decoded events.
#[derive(Debug)]
pub struct DecodeIter<'a> {
    data: &'a [u8],
    pos: usize,
}

impl DecodeIter<'_> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        let bytes = self.data.get(self.pos..self.pos + N)?.try_into().ok()?;
        self.pos += N;
        Some(bytes)
    }

    fn read_u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|[v]| v)
    }

    fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|v| v != 0)
    }

    fn read_u32(&mut self) -> Option<u32> {
        self.take().map(u32::from_le_bytes)
    }

    fn read_u64(&mut self) -> Option<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn read_output(&mut self) -> Option<OutputId> {
        self.read_u32().map(OutputId)
    }

    fn decode_plan(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Plan(PlanEvent {
            output: self.read_output()?,
            frame_no: self.read_u64()?,
            timestamp_ns: self.read_u64()?,
            layers: self.read_u32()?,
            direct: self.read_u32()?,
            precomposed: self.read_u32()?,
            squash: self.read_bool()?,
            degraded: DegradeReason::from_bits_truncate(self.read_u8()?),
        }))
    }

    fn decode_squash(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Squash(SquashEvent {
            output: self.read_output()?,
            frame_no: self.read_u64()?,
            regions: self.read_u32()?,
            reused: self.read_bool()?,
        }))
    }

    fn decode_stage(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Stage(StageEvent {
            output: self.read_output()?,
            frame_no: self.read_u64()?,
            stage: match self.read_u8()? {
                0 => StageKind::Plan,
                1 => StageKind::Prepare,
                2 => StageKind::TestCommit,
                _ => StageKind::Commit,
            },
            start_ns: self.read_u64()?,
            end_ns: self.read_u64()?,
        }))
    }

    fn decode_commit(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Commit(CommitEvent {
            output: self.read_output()?,
            frame_no: self.read_u64()?,
            timestamp_ns: self.read_u64()?,
            mode: if self.read_bool()? {
                CommitMode::Apply
            } else {
                CommitMode::TestOnly
            },
            planes: self.read_u32()?,
            ok: self.read_bool()?,
        }))
    }

    fn decode_clear(&mut self) -> Option<RecordedEvent> {
        Some(RecordedEvent::Clear(ClearEvent {
            output: self.read_output()?,
            timestamp_ns: self.read_u64()?,
            reason: match self.read_u8()? {
                0 => ClearReason::CommitFailed,
                1 => ClearReason::PowerOff,
                2 => ClearReason::Requested,
                _ => ClearReason::Shutdown,
            },
            compositions: self.read_u32()?,
        }))
    }
}

impl Iterator for DecodeIter<'_> {
    type Item = RecordedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_u8()? {
            TAG_PLAN => self.decode_plan(),
            TAG_SQUASH => self.decode_squash(),
            TAG_STAGE => self.decode_stage(),
            TAG_COMMIT => self.decode_commit(),
            TAG_CLEAR => self.decode_clear(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> PlanEvent {
        PlanEvent {
            output: OutputId(1),
            frame_no: 7,
            timestamp_ns: 1_000_000,
            layers: 5,
            direct: 2,
            precomposed: 3,
            squash: false,
            degraded: DegradeReason::SQUASH_DROPPED,
        }
    }

    #[test]
    fn plan_event_survives_recording() {
        let mut rec = RecorderSink::new();
        let orig = sample_plan();
        rec.on_plan(&orig);

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 1);
        match &events[0] {
            RecordedEvent::Plan(e) => {
                assert_eq!(e.output, orig.output);
                assert_eq!(e.frame_no, orig.frame_no);
                assert_eq!(e.precomposed, 3);
                assert_eq!(e.degraded, DegradeReason::SQUASH_DROPPED);
            }
            other => panic!("expected Plan, got {other:?}"),
        }
    }

    #[test]
    fn mixed_events_keep_their_order() {
        let mut rec = RecorderSink::new();
        rec.on_plan(&sample_plan());
        rec.on_stage(&StageEvent {
            output: OutputId(1),
            frame_no: 7,
            stage: StageKind::TestCommit,
            start_ns: 2_000,
            end_ns: 3_000,
        });
        rec.on_commit(&CommitEvent {
            output: OutputId(1),
            frame_no: 7,
            timestamp_ns: 3_000,
            mode: CommitMode::TestOnly,
            planes: 3,
            ok: false,
        });
        rec.on_clear(&ClearEvent {
            output: OutputId(1),
            timestamp_ns: 4_000,
            reason: ClearReason::CommitFailed,
            compositions: 2,
        });

        let events: Vec<_> = decode(rec.as_bytes()).collect();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], RecordedEvent::Plan(_)));
        match events[1] {
            RecordedEvent::Stage(e) => {
                assert_eq!(e.stage, StageKind::TestCommit);
                assert_eq!(e.end_ns - e.start_ns, 1_000);
            }
            other => panic!("expected Stage, got {other:?}"),
        }
        match events[2] {
            RecordedEvent::Commit(e) => {
                assert_eq!(e.mode, CommitMode::TestOnly);
                assert!(!e.ok);
            }
            other => panic!("expected Commit, got {other:?}"),
        }
        match events[3] {
            RecordedEvent::Clear(e) => {
                assert_eq!(e.reason, ClearReason::CommitFailed);
                assert_eq!(e.compositions, 2);
            }
            other => panic!("expected Clear, got {other:?}"),
        }
    }

    #[test]
    fn truncated_record_stops_decoding() {
        let mut rec = RecorderSink::new();
        rec.on_squash(&SquashEvent {
            output: OutputId(0),
            frame_no: 3,
            regions: 4,
            reused: true,
        });
        rec.on_plan(&sample_plan());
        let bytes = rec.into_bytes();

        let events: Vec<_> = decode(&bytes[..bytes.len() - 1]).collect();
        assert_eq!(events.len(), 1, "only the complete squash record");
        assert!(matches!(
            events[0],
            RecordedEvent::Squash(SquashEvent { reused: true, .. })
        ));
    }

    #[test]
    fn empty_buffer_decodes_to_nothing() {
        assert_eq!(decode(&[]).count(), 0);
    }
}
