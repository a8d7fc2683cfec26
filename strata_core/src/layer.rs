// Copyright 2026 the Strata Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Layers: the per-frame visual inputs handed to the compositor.
//!
//! A frame's layers form a stack ordered **front to back**: index 0 is the
//! topmost layer. Layers are immutable once planned, except for their two
//! fence slots. The acquire fence is taken once when the layer is staged for
//! scan-out; the release fence is filled once when the composition assigns
//! release fences.

use core::fmt;

use bitflags::bitflags;

use crate::error::{Result, StateError};
use crate::fence::Fence;
use crate::geometry::IntRect;

/// Caller-side identity of a graphics buffer.
///
/// The squash history compares handles frame to frame to detect content
/// changes, so a producer must hand out a new handle whenever it renders new
/// content.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BufferHandle(pub u64);

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({:#x})", self.0)
    }
}

bitflags! {
    /// Orientation applied to a layer's source before scan-out.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Transform: u32 {
        /// Mirror horizontally.
        const FLIP_H = 1 << 0;
        /// Mirror vertically.
        const FLIP_V = 1 << 1;
        /// Rotate 90° clockwise.
        const ROTATE_90 = 1 << 2;
        /// Rotate 180°.
        const ROTATE_180 = 1 << 3;
        /// Rotate 270° clockwise.
        const ROTATE_270 = 1 << 4;
    }
}

impl Transform {
    /// No transform.
    pub const IDENTITY: Self = Self::empty();

    /// Returns `true` if the transform swaps the width and height axes.
    #[must_use]
    pub const fn swaps_axes(self) -> bool {
        self.intersects(Self::ROTATE_90.union(Self::ROTATE_270))
    }
}

bitflags! {
    /// Per-layer content flags.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct LayerFlags: u32 {
        /// Protected content. Must get a dedicated plane and is never copied
        /// into an off-screen buffer.
        const PROTECTED = 1 << 0;
        /// Content beneath this layer stays visible through it, so a
        /// precomposition is not punched out where this layer overlaps it.
        const SHOW_UNDERLAY = 1 << 1;
    }
}

/// How a layer's pixels combine with what lies below.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    /// The layer is opaque.
    None,
    /// Colour channels are premultiplied by alpha.
    #[default]
    Premultiplied,
    /// Colour channels are not premultiplied.
    Coverage,
}

/// Pixel layout of a layer's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 8-bit RGBA.
    #[default]
    Rgba8888,
    /// 8-bit RGB with an ignored alpha byte.
    Rgbx8888,
    /// 8-bit BGRA.
    Bgra8888,
    /// 16-bit RGB.
    Rgb565,
    /// 10-bit RGB with 2-bit alpha.
    Rgba1010102,
    /// 8-bit 4:2:0 YUV, interleaved chroma.
    Nv12,
    /// 8-bit 4:2:0 YUV, interleaved chroma (V first).
    Nv21,
    /// 10-bit 4:2:0 YUV.
    P010,
}

impl PixelFormat {
    /// Returns `true` for YUV layouts, which need a YUV-capable plane.
    #[must_use]
    pub const fn is_yuv(self) -> bool {
        matches!(self, Self::Nv12 | Self::Nv21 | Self::P010)
    }

    /// Returns `true` for formats that need an HDR-capable plane.
    #[must_use]
    pub const fn is_hdr(self) -> bool {
        matches!(self, Self::Rgba1010102 | Self::P010)
    }
}

/// One visual input of a frame.
#[derive(Clone, Debug)]
pub struct Layer {
    /// Buffer holding the layer's content.
    pub buffer: BufferHandle,
    /// Region of the buffer to sample, in buffer pixels (subpixel precision).
    pub source_crop: kurbo::Rect,
    /// Destination on the display.
    pub display_frame: IntRect,
    /// Buffer pixel layout.
    pub format: PixelFormat,
    /// Orientation applied before scan-out.
    pub transform: Transform,
    /// Blend mode against lower layers.
    pub blending: BlendMode,
    /// Plane-wide alpha, 255 is opaque.
    pub alpha: u8,
    /// Content flags.
    pub flags: LayerFlags,
    acquire_fence: Option<Fence>,
    release_fence: Option<Fence>,
}

impl Layer {
    /// Creates an opaque, untransformed RGBA layer whose source covers the
    /// whole display frame.
    #[must_use]
    pub fn new(buffer: BufferHandle, display_frame: IntRect) -> Self {
        Self {
            buffer,
            source_crop: kurbo::Rect::new(
                0.0,
                0.0,
                f64::from(display_frame.width()),
                f64::from(display_frame.height()),
            ),
            display_frame,
            format: PixelFormat::Rgba8888,
            transform: Transform::IDENTITY,
            blending: BlendMode::Premultiplied,
            alpha: 255,
            flags: LayerFlags::empty(),
            acquire_fence: None,
            release_fence: None,
        }
    }

    /// Sets the source crop.
    #[must_use]
    pub fn with_source_crop(mut self, crop: kurbo::Rect) -> Self {
        self.source_crop = crop;
        self
    }

    /// Sets the pixel format.
    #[must_use]
    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the transform.
    #[must_use]
    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    /// Sets the blend mode.
    #[must_use]
    pub fn with_blending(mut self, blending: BlendMode) -> Self {
        self.blending = blending;
        self
    }

    /// Sets the plane-wide alpha.
    #[must_use]
    pub fn with_alpha(mut self, alpha: u8) -> Self {
        self.alpha = alpha;
        self
    }

    /// Sets the content flags.
    #[must_use]
    pub fn with_flags(mut self, flags: LayerFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Attaches the fence that signals when the producer finished rendering.
    #[must_use]
    pub fn with_acquire_fence(mut self, fence: Fence) -> Self {
        self.acquire_fence = Some(fence);
        self
    }

    /// Returns `true` for protected content.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        self.flags.contains(LayerFlags::PROTECTED)
    }

    /// Returns `true` if scan-out needs scaling, accounting for transforms
    /// that swap axes.
    #[must_use]
    pub fn is_scaled(&self) -> bool {
        let (src_w, src_h) = if self.transform.swaps_axes() {
            (self.source_crop.height(), self.source_crop.width())
        } else {
            (self.source_crop.width(), self.source_crop.height())
        };
        let dst_w = f64::from(self.display_frame.width());
        let dst_h = f64::from(self.display_frame.height());
        let off = |a: f64, b: f64| a - b > 0.5 || b - a > 0.5;
        off(src_w, dst_w) || off(src_h, dst_h)
    }

    /// The acquire fence, if it has not been taken yet.
    #[must_use]
    pub fn acquire_fence(&self) -> Option<&Fence> {
        self.acquire_fence.as_ref()
    }

    /// Takes the acquire fence. Later calls return `None`.
    pub fn take_acquire_fence(&mut self) -> Option<Fence> {
        self.acquire_fence.take()
    }

    /// The release fence, once assigned.
    #[must_use]
    pub fn release_fence(&self) -> Option<&Fence> {
        self.release_fence.as_ref()
    }

    /// Fills the release fence slot.
    ///
    /// `index` is the layer's position in its stack and is only used for the
    /// error. Fails if the slot is already filled.
    pub fn set_release_fence(&mut self, index: usize, fence: Fence) -> Result<()> {
        if self.release_fence.is_some() {
            return Err(StateError::ReleaseFenceAlreadySet(index).into());
        }
        self.release_fence = Some(fence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::fence::{SoftwareTimeline, SyncTimeline};

    #[test]
    fn unscaled_by_default() {
        let layer = Layer::new(BufferHandle(1), IntRect::new(0, 0, 100, 50));
        assert!(!layer.is_scaled());
    }

    #[test]
    fn rotation_swaps_source_axes() {
        let layer = Layer::new(BufferHandle(1), IntRect::new(0, 0, 50, 100))
            .with_source_crop(kurbo::Rect::new(0.0, 0.0, 100.0, 50.0));
        assert!(layer.is_scaled(), "landscape source into portrait frame");
        let rotated = layer.with_transform(Transform::ROTATE_90);
        assert!(!rotated.is_scaled());
    }

    #[test]
    fn release_fence_fills_once() {
        let tl = SoftwareTimeline::new();
        let mut layer = Layer::new(BufferHandle(7), IntRect::new(0, 0, 10, 10));
        layer
            .set_release_fence(2, tl.create_fence("a", 1).unwrap())
            .unwrap();
        let err = layer
            .set_release_fence(2, tl.create_fence("b", 2).unwrap())
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidState(StateError::ReleaseFenceAlreadySet(2))
        );
        assert_eq!(layer.release_fence().map(Fence::point), Some(1));
    }

    #[test]
    fn acquire_fence_is_taken_once() {
        let tl = SoftwareTimeline::new();
        let mut layer = Layer::new(BufferHandle(7), IntRect::new(0, 0, 10, 10))
            .with_acquire_fence(tl.create_fence("acq", 1).unwrap());
        assert!(layer.take_acquire_fence().is_some());
        assert!(layer.take_acquire_fence().is_none());
    }

    #[test]
    fn format_classes() {
        assert!(PixelFormat::Nv12.is_yuv());
        assert!(!PixelFormat::Nv12.is_hdr());
        assert!(PixelFormat::P010.is_yuv() && PixelFormat::P010.is_hdr());
        assert!(!PixelFormat::Rgba8888.is_yuv());
    }
}
