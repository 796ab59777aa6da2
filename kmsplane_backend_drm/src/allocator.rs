// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! [`BufferAllocator`] over dumb buffers and PRIME descriptors.
//!
//! Fresh allocations are dumb buffers sized so that the 64-byte aligned
//! stride fits in every row; each is exported as a dmabuf right away so the
//! buffer always carries a process handle. Imports go the other way: the
//! inherited dmabuf descriptor is duplicated, checked against the expected
//! size and turned into a device-local handle. A failed import is reported
//! as such and never replaced by a fresh allocation.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};

use drm::buffer::{self, Buffer as _, DrmFourcc};
use drm::control::Device as ControlDevice;
use drm::control::dumbbuffer::{DumbBuffer, DumbMapping};
use kmsplane_core::device::{AllocRequest, BufferAllocator};
use kmsplane_core::error::{AllocationError, EINVAL};
use kmsplane_core::format::BufferLayout;
use kmsplane_core::object::BufferHandle;
use rustix::fs::{OFlags, SeekFrom, seek};

use crate::card::{Card, errno};
use crate::device::raw;
use crate::dmabuf::{self, DmabufMapping};

enum Storage {
    Dumb(DumbBuffer),
    Imported,
}

/// A scanout buffer owned by a [`Card`].
pub struct CardBuffer {
    storage: Storage,
    handle: buffer::Handle,
    export: OwnedFd,
    len: usize,
}

impl CardBuffer {
    /// The dmabuf descriptor exported for (or imported into) this buffer.
    #[must_use]
    pub fn export_fd(&self) -> BorrowedFd<'_> {
        self.export.as_fd()
    }

    /// Returns `true` when the buffer was imported from an external
    /// descriptor.
    #[must_use]
    pub fn is_imported(&self) -> bool {
        matches!(self.storage, Storage::Imported)
    }
}

impl fmt::Debug for CardBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardBuffer")
            .field("handle", &raw(self.handle))
            .field("imported", &self.is_imported())
            .field("export", &self.export)
            .field("len", &self.len)
            .finish()
    }
}

/// CPU view of a [`CardBuffer`].
pub enum CardMapping<'a> {
    /// Mapping through the dumb-buffer interface.
    Dumb(DumbMapping<'a>),
    /// Mapping of the dmabuf descriptor.
    Dmabuf(DmabufMapping<'a>),
}

impl fmt::Debug for CardMapping<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dumb(map) => f.debug_tuple("Dumb").field(&map.len()).finish(),
            Self::Dmabuf(map) => f.debug_tuple("Dmabuf").field(map).finish(),
        }
    }
}

impl Deref for CardMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Dumb(map) => map,
            Self::Dmabuf(map) => map,
        }
    }
}

impl DerefMut for CardMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Self::Dumb(map) => map,
            Self::Dmabuf(map) => map,
        }
    }
}

/// Dumb-buffer geometry whose rows hold `layout.byte_stride` bytes.
///
/// Returns `(width, height, bpp)` for the create ioctl.
fn dumb_geometry(layout: &BufferLayout) -> (u32, u32, u32) {
    let pixel_size = layout.pixel_size.max(1);
    (
        layout.byte_stride.div_ceil(pixel_size),
        layout.height,
        pixel_size * 8,
    )
}

fn prime_flags() -> u32 {
    (OFlags::CLOEXEC | OFlags::RDWR).bits()
}

impl Card {
    fn create(&self, request: &AllocRequest) -> Result<CardBuffer, AllocationError> {
        let layout = request.layout;
        let failed = |code| AllocationError::CreateFailed {
            width: layout.width,
            height: layout.height,
            size: layout.size,
            code,
        };
        let len = usize::try_from(layout.size).map_err(|_| failed(EINVAL))?;
        let (width, height, bpp) = dumb_geometry(&layout);
        // The create ioctl only looks at bpp; the fourcc is informational.
        let fourcc = DrmFourcc::try_from(request.format.code()).unwrap_or(DrmFourcc::Xbgr8888);

        let dumb = self
            .create_dumb_buffer((width, height), fourcc, bpp)
            .map_err(|err| failed(errno(&err)))?;
        log::debug!(
            "dumb buffer {} {}x{} bpp {}: kernel pitch {}, stride {}",
            raw(dumb.handle()),
            width,
            height,
            bpp,
            dumb.pitch(),
            layout.byte_stride
        );

        let export = match self.buffer_to_prime_fd(dumb.handle(), prime_flags()) {
            Ok(fd) => fd,
            Err(err) => {
                let code = errno(&err);
                if let Err(err) = self.destroy_dumb_buffer(dumb) {
                    log::warn!("failed to destroy unexported dumb buffer: {err}");
                }
                return Err(failed(code));
            }
        };

        Ok(CardBuffer {
            handle: dumb.handle(),
            storage: Storage::Dumb(dumb),
            export,
            len,
        })
    }

    fn import(&self, fd: i32, request: &AllocRequest) -> Result<CardBuffer, AllocationError> {
        let size = request.layout.size;
        let failed = |code| AllocationError::ImportFailed { fd, size, code };

        let export = dmabuf::adopt(fd).map_err(|err| failed(err.raw_os_error()))?;
        let available = seek(&export, SeekFrom::End(0)).map_err(|err| failed(err.raw_os_error()))?;
        if available < size {
            log::warn!("external buffer fd {fd} holds {available} bytes, {size} needed");
            return Err(failed(EINVAL));
        }
        let len = usize::try_from(size).map_err(|_| failed(EINVAL))?;
        let handle = self
            .prime_fd_to_buffer(export.as_fd())
            .map_err(|err| failed(errno(&err)))?;
        log::debug!("imported fd {fd} as buffer {}", raw(handle));

        Ok(CardBuffer {
            storage: Storage::Imported,
            handle,
            export,
            len,
        })
    }
}

impl BufferAllocator for Card {
    type Buffer = CardBuffer;
    type Mapping<'a> = CardMapping<'a>;

    fn allocate(&self, request: &AllocRequest) -> Result<CardBuffer, AllocationError> {
        match request.external_fd {
            Some(fd) => self.import(fd, request),
            None => self.create(request),
        }
    }

    fn handle(&self, buffer: &CardBuffer) -> BufferHandle {
        BufferHandle(raw(buffer.handle))
    }

    fn map<'a>(&'a self, buffer: &'a mut CardBuffer) -> Result<CardMapping<'a>, AllocationError> {
        let handle = BufferHandle(raw(buffer.handle));
        let failed = |code| AllocationError::MapFailed { handle, code };
        let len = buffer.len;
        match &mut buffer.storage {
            Storage::Dumb(dumb) => self
                .map_dumb_buffer(dumb)
                .map(CardMapping::Dumb)
                .map_err(|err| failed(errno(&err))),
            Storage::Imported => DmabufMapping::new(&mut buffer.export, len)
                .map(CardMapping::Dmabuf)
                .map_err(|err| failed(err.raw_os_error())),
        }
    }

    fn free(&self, buffer: CardBuffer) -> Result<(), AllocationError> {
        let CardBuffer {
            storage,
            handle,
            export,
            ..
        } = buffer;
        let failed = |err: &std::io::Error| AllocationError::FreeFailed {
            handle: BufferHandle(raw(handle)),
            code: errno(err),
        };

        drop(export);
        match storage {
            Storage::Dumb(dumb) => self.destroy_dumb_buffer(dumb).map_err(|err| failed(&err)),
            Storage::Imported => self.close_buffer(handle).map_err(|err| failed(&err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use kmsplane_core::format::{BufferLayout, PixelFormat};

    use super::{dumb_geometry, prime_flags};

    #[test]
    fn dumb_rows_hold_the_aligned_stride() {
        let layout = BufferLayout::for_format(640, 480, PixelFormat::XBGR8888).unwrap();
        assert_eq!(dumb_geometry(&layout), (640, 480, 32));

        let layout = BufferLayout::for_format(100, 10, PixelFormat::RGB888).unwrap();
        assert_eq!(layout.byte_stride, 320);
        let (width, height, bpp) = dumb_geometry(&layout);
        assert_eq!((height, bpp), (10, 24));
        assert!(width * 3 >= layout.byte_stride, "row must fit the stride");
    }

    #[test]
    fn prime_export_is_cloexec_and_writable() {
        assert_eq!(prime_flags(), 0o2_000_000 | 0o2);
    }
}
