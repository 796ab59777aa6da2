// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pixel formats and buffer geometry.
//!
//! [`PixelFormat`] is a little-endian four-character code as used by the
//! display subsystem. [`BufferLayout`] derives strides and total size from a
//! format and image size: rows are padded to [`ROW_ALIGNMENT`] bytes, which
//! is the bus burst size and also what the kernel GEM allocator aligns to.

use core::fmt;

/// Row alignment in bytes applied to every buffer stride.
pub const ROW_ALIGNMENT: u32 = 64;

/// Pixel size assumed for formats missing from the lookup table.
pub const FALLBACK_PIXEL_SIZE: u32 = 4;

/// Vendor compression modifier: ARM AFBC with 16x16 superblocks.
pub const AFBC_MODIFIER: u64 = (0x08 << 56) | 0x1;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// A pixel format four-character code.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    /// `[31:0] x:B:G:R 8:8:8:8`
    pub const XBGR8888: Self = Self(fourcc(b"XB24"));
    /// `[31:0] x:R:G:B 8:8:8:8`
    pub const XRGB8888: Self = Self(fourcc(b"XR24"));
    /// `[31:0] R:G:B:x 8:8:8:8`
    pub const RGBX8888: Self = Self(fourcc(b"RX24"));
    /// `[31:0] B:G:R:x 8:8:8:8`
    pub const BGRX8888: Self = Self(fourcc(b"BX24"));
    /// `[31:0] A:R:G:B 8:8:8:8`
    pub const ARGB8888: Self = Self(fourcc(b"AR24"));
    /// `[31:0] A:B:G:R 8:8:8:8`
    pub const ABGR8888: Self = Self(fourcc(b"AB24"));
    /// `[31:0] R:G:B:A 8:8:8:8`
    pub const RGBA8888: Self = Self(fourcc(b"RA24"));
    /// `[31:0] B:G:R:A 8:8:8:8`
    pub const BGRA8888: Self = Self(fourcc(b"BA24"));
    /// `[23:0] R:G:B`
    pub const RGB888: Self = Self(fourcc(b"RG24"));
    /// `[23:0] B:G:R`
    pub const BGR888: Self = Self(fourcc(b"BG24"));
    /// `[15:0] R:G:B 5:6:5`
    pub const RGB565: Self = Self(fourcc(b"RG16"));
    /// `[15:0] B:G:R 5:6:5`
    pub const BGR565: Self = Self(fourcc(b"BG16"));
    /// `[7:0] R:G:B 3:3:2`
    pub const RGB332: Self = Self(fourcc(b"RGB8"));
    /// `[7:0] B:G:R 2:3:3`
    pub const BGR233: Self = Self(fourcc(b"BGR8"));

    const NAMED: [(&'static str, Self); 14] = [
        ("XBGR8888", Self::XBGR8888),
        ("XRGB8888", Self::XRGB8888),
        ("RGBX8888", Self::RGBX8888),
        ("BGRX8888", Self::BGRX8888),
        ("ARGB8888", Self::ARGB8888),
        ("ABGR8888", Self::ABGR8888),
        ("RGBA8888", Self::RGBA8888),
        ("BGRA8888", Self::BGRA8888),
        ("RGB888", Self::RGB888),
        ("BGR888", Self::BGR888),
        ("RGB565", Self::RGB565),
        ("BGR565", Self::BGR565),
        ("RGB332", Self::RGB332),
        ("BGR233", Self::BGR233),
    ];

    /// Returns the raw four-character code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u32 {
        self.0
    }

    /// Bytes per pixel, or `None` for formats outside the lookup table.
    #[must_use]
    pub const fn pixel_size(self) -> Option<u32> {
        match self {
            Self::XBGR8888
            | Self::XRGB8888
            | Self::RGBX8888
            | Self::BGRX8888
            | Self::ARGB8888
            | Self::ABGR8888
            | Self::RGBA8888
            | Self::BGRA8888 => Some(4),
            Self::RGB888 | Self::BGR888 => Some(3),
            Self::RGB565 | Self::BGR565 => Some(2),
            Self::RGB332 | Self::BGR233 => Some(1),
            _ => None,
        }
    }

    /// Builds a format from its four-character code, e.g. `*b"XB24"`.
    #[must_use]
    pub const fn from_fourcc(code: [u8; 4]) -> Self {
        Self(fourcc(&code))
    }

    /// Looks up a format by its conventional name (e.g. `"XBGR8888"`),
    /// ignoring ASCII case.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(name))
            .map(|&(_, format)| format)
    }

    /// Returns the conventional name of a format in the lookup table.
    #[must_use]
    pub fn name(self) -> Option<&'static str> {
        Self::NAMED
            .iter()
            .find(|(_, format)| *format == self)
            .map(|&(name, _)| name)
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "PixelFormat({:#010x})", self.0),
        }
    }
}

/// Stride and size of a packed single-plane buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferLayout {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per pixel.
    pub pixel_size: u32,
    /// Row pitch in bytes, a multiple of [`ROW_ALIGNMENT`].
    pub byte_stride: u32,
    /// Row pitch in pixels.
    pub pixel_stride: u32,
    /// Total size in bytes (`byte_stride * height`).
    pub size: u64,
}

impl BufferLayout {
    /// Computes the layout of a `width` x `height` buffer of `format`.
    ///
    /// Formats outside the lookup table are treated as
    /// [`FALLBACK_PIXEL_SIZE`] bytes per pixel and a warning is logged.
    /// Returns `None` when the row pitch does not fit in 32 bits.
    #[must_use]
    pub fn for_format(width: u32, height: u32, format: PixelFormat) -> Option<Self> {
        let pixel_size = format.pixel_size().unwrap_or_else(|| {
            log::warn!(
                "unsupported format {format:?}, assuming {FALLBACK_PIXEL_SIZE} bytes per pixel"
            );
            FALLBACK_PIXEL_SIZE
        });
        Self::with_pixel_size(width, height, pixel_size)
    }

    /// Computes the layout for an explicit pixel size.
    ///
    /// Returns `None` for a zero pixel size or when the aligned row pitch
    /// overflows `u32`.
    #[must_use]
    pub const fn with_pixel_size(width: u32, height: u32, pixel_size: u32) -> Option<Self> {
        let Some(packed) = width.checked_mul(pixel_size) else {
            return None;
        };
        let Some(byte_stride) = align_up(packed, ROW_ALIGNMENT) else {
            return None;
        };
        let Some(pixel_stride) = byte_stride.checked_div(pixel_size) else {
            return None;
        };
        Some(Self {
            width,
            height,
            pixel_size,
            byte_stride,
            pixel_stride,
            size: byte_stride as u64 * height as u64,
        })
    }

    /// Total size in bytes as a `usize`, saturating on narrow targets.
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        usize::try_from(self.size).unwrap_or(usize::MAX)
    }
}

/// Rounds `value` up to the next multiple of `align` (a power of two).
///
/// Returns `None` if the result does not fit in `u32`.
#[inline]
#[must_use]
pub const fn align_up(value: u32, align: u32) -> Option<u32> {
    match value.checked_add(align - 1) {
        Some(padded) => Some(padded & !(align - 1)),
        None => None,
    }
}
