// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error taxonomy for planning and committing frames.
//!
//! Planning-time errors ([`Error::InvalidState`], [`Error::NoPlaneAvailable`],
//! [`Error::RegionOverflow`]) are returned synchronously and abort queueing of
//! the frame without touching shared state. [`Error::CommitFailed`] is raised
//! by the scheduler after it has cleared the display. Fence, import and
//! composite failures abort only the frame being planned or prepared.

use crate::backend::CompositeTarget;
use crate::composition::CompositionKind;
use crate::layer::BufferHandle;
use crate::output::OutputId;
use crate::plane::PlaneId;

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Every failure the composition engine can report.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// An operation was attempted in a state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(#[from] StateError),
    /// Content that must be scanned out could not be given a plane.
    #[error("no plane available: {0}")]
    NoPlaneAvailable(#[from] PlaneShortage),
    /// A region decomposition was asked to handle more rectangles than the
    /// membership mask can identify.
    #[error("region overflow: {rects} subject rectangles exceed the limit of {max}")]
    RegionOverflow {
        /// Number of subject rectangles that had to be represented.
        rects: usize,
        /// Maximum supported rectangle count.
        max: usize,
    },
    /// The fence timeline refused to create a sync point.
    #[error("fence creation failed: {0}")]
    FenceCreationFailed(#[from] FenceError),
    /// The hardware rejected a real commit.
    #[error("commit failed: {0}")]
    CommitFailed(#[from] CommitError),
    /// A layer buffer could not be imported.
    #[error("import failed: {0}")]
    ImportFailed(#[from] ImportError),
    /// The off-screen renderer failed to produce a composite.
    #[error("off-screen composite failed: {0}")]
    CompositeFailed(#[from] CompositeError),
}

/// Detail for [`Error::InvalidState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// A composition already holding one kind was asked to become another.
    #[error("composition is {current:?}, cannot become {requested:?}")]
    KindMismatch {
        /// Kind the composition already has.
        current: CompositionKind,
        /// Kind that was requested.
        requested: CompositionKind,
    },
    /// A frame-only operation was called on a non-frame composition.
    #[error("operation requires a Frame composition, found {0:?}")]
    NotAFrame(CompositionKind),
    /// A layer's release fence slot was already filled.
    #[error("release fence for layer {0} was already assigned")]
    ReleaseFenceAlreadySet(usize),
    /// A second precomposition entry was added to a plan.
    #[error("plan already holds a precomposition entry")]
    DuplicatePrecomposition,
    /// A second squash entry was added to a plan.
    #[error("plan already holds a squash entry")]
    DuplicateSquash,
    /// A layer was given two dedicated planes.
    #[error("layer {0} is already placed on a plane")]
    DuplicateDirectLayer(usize),
    /// A plane was used by two entries of one plan.
    #[error("{0:?} is used by more than one entry")]
    DuplicatePlane(PlaneId),
    /// A layer index does not name a layer of the composition.
    #[error("layer index {0} is out of range")]
    LayerOutOfRange(usize),
    /// The output is not registered with the compositor.
    #[error("{0:?} is not registered")]
    UnknownOutput(OutputId),
    /// The output is already registered with the compositor.
    #[error("{0:?} is already registered")]
    DuplicateOutput(OutputId),
    /// A plan entry refers to a composite buffer that was never rendered.
    #[error("no {0:?} composite has been rendered")]
    MissingComposite(CompositeTarget),
}

/// Detail for [`Error::NoPlaneAvailable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PlaneShortage {
    /// The pipe has no usable planes at all.
    #[error("the pipe has no usable planes")]
    NoUsablePlanes,
    /// A protected layer found no compatible plane. Protected content may
    /// never be merged into an off-screen buffer.
    #[error("protected layer {0} has no compatible plane")]
    ProtectedLayer(usize),
    /// Layers were left without a dedicated plane and no plane remained to
    /// show their precomposition.
    #[error("{0} layers are unplaced and no plane remains for a precomposition")]
    NoPrecompositionPlane(usize),
}

/// Failure reported by a [`SyncTimeline`](crate::fence::SyncTimeline).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("timeline rejected point {point} (code {code})")]
pub struct FenceError {
    /// Point the fence was requested for.
    pub point: u64,
    /// Backend-specific error code.
    pub code: i32,
}

/// Failure reported by a [`CommitBackend`](crate::backend::CommitBackend).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("hardware rejected the commit (code {code})")]
pub struct CommitError {
    /// Backend-specific error code.
    pub code: i32,
}

/// Failure reported by a [`BufferImporter`](crate::backend::BufferImporter).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("could not import {handle:?} (code {code})")]
pub struct ImportError {
    /// Handle that failed to import.
    pub handle: BufferHandle,
    /// Backend-specific error code.
    pub code: i32,
}

/// Failure reported by an
/// [`OffscreenCompositor`](crate::backend::OffscreenCompositor).
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("renderer failed (code {code})")]
pub struct CompositeError {
    /// Backend-specific error code.
    pub code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn messages_carry_context() {
        let e = Error::from(PlaneShortage::ProtectedLayer(3));
        assert_eq!(
            e.to_string(),
            "no plane available: protected layer 3 has no compatible plane"
        );

        let e = Error::RegionOverflow { rects: 70, max: 64 };
        assert!(e.to_string().contains("70"), "got: {e}");
    }

    #[test]
    fn backend_errors_convert() {
        let e: Error = CommitError { code: -22 }.into();
        assert!(matches!(e, Error::CommitFailed(CommitError { code: -22 })));
    }
}
