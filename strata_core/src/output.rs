// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Display output and pipe identification.
//!
//! [`OutputId`] names a logical display. [`PipeId`] names the hardware pipe
//! (CRTC) currently driving it. Planes advertise which pipes they can attach
//! to as a bitmask over pipe indices.

use core::fmt;

/// Identifies a specific display output.
///
/// Callers assign output IDs; core code passes them through without
/// interpreting the value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct OutputId(pub u32);

impl fmt::Debug for OutputId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutputId({})", self.0)
    }
}

/// Index of a hardware display pipe.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PipeId(pub u32);

impl PipeId {
    /// Returns this pipe's bit in a plane's possible-pipes mask.
    ///
    /// Pipes beyond index 31 cannot be expressed and yield an empty mask.
    #[must_use]
    pub const fn bit(self) -> u32 {
        if self.0 < 32 { 1 << self.0 } else { 0 }
    }
}

impl fmt::Debug for PipeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PipeId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_bits() {
        assert_eq!(PipeId(0).bit(), 1);
        assert_eq!(PipeId(3).bit(), 8);
        assert_eq!(PipeId(40).bit(), 0);
    }
}
