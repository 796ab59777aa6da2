// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Framebuffer construction and release.
//!
//! [`FrameBuilder::build`] turns one image into a [`Frame`]: it allocates (or
//! imports) a buffer sized for the image, copies the image bytes into a
//! scoped mapping, and registers the buffer as a framebuffer.
//!
//! A frame is released in two steps that must happen in order, and only once
//! the commit showing it has retired: [`Frame::deregister`] removes the
//! framebuffer, then [`Frame::free`] releases the buffer. Freeing a buffer
//! that still backs a registered framebuffer is refused.

use core::fmt;

use crate::device::{AllocRequest, BufferAllocator, DisplayDevice, FramebufferDesc};
use crate::error::{AllocationError, BuildError, EINVAL, SourceError, TeardownError};
use crate::format::{AFBC_MODIFIER, BufferLayout, PixelFormat};
use crate::object::{BufferHandle, FramebufferId};

/// Description of one input image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ImageSpec {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format of the file contents.
    pub format: PixelFormat,
    /// Register with the vendor compression modifier.
    pub compress: bool,
    /// Existing allocation to import instead of allocating.
    pub external_fd: Option<i32>,
    /// Backend-specific allocation flags.
    pub flags: u32,
}

impl ImageSpec {
    /// An uncompressed image with freshly allocated memory.
    #[must_use]
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            compress: false,
            external_fd: None,
            flags: 0,
        }
    }

    /// Modifier used at registration time.
    #[must_use]
    pub const fn modifier(&self) -> Option<u64> {
        if self.compress {
            Some(AFBC_MODIFIER)
        } else {
            None
        }
    }
}

/// Sequential source of image bytes.
pub trait ByteSource {
    /// Total number of bytes available, if known up front.
    fn len_hint(&self) -> Option<u64>;

    /// Fills `dst` from the source, returning how many bytes were written.
    ///
    /// Returns fewer than `dst.len()` bytes only at end of input.
    fn read_into(&mut self, dst: &mut [u8]) -> Result<usize, SourceError>;
}

impl ByteSource for &[u8] {
    fn len_hint(&self) -> Option<u64> {
        u64::try_from(self.len()).ok()
    }

    fn read_into(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        let n = dst.len().min(self.len());
        let (head, tail) = self.split_at(n);
        dst[..n].copy_from_slice(head);
        *self = tail;
        Ok(n)
    }
}

/// An allocated buffer and its geometry.
pub struct GraphicsBuffer<B> {
    raw: B,
    handle: BufferHandle,
    layout: BufferLayout,
}

impl<B> GraphicsBuffer<B> {
    /// Geometry of the allocation.
    #[must_use]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Device-local handle.
    #[must_use]
    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    /// Backend allocation.
    #[must_use]
    pub fn raw(&self) -> &B {
        &self.raw
    }
}

impl<B> fmt::Debug for GraphicsBuffer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsBuffer")
            .field("handle", &self.handle)
            .field("layout", &self.layout)
            .finish_non_exhaustive()
    }
}

/// A registered framebuffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Framebuffer {
    /// ID returned at registration.
    pub id: FramebufferId,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixel format.
    pub format: PixelFormat,
    /// Compression modifier, if registered with one.
    pub modifier: Option<u64>,
}

/// A buffer registered as a framebuffer.
#[derive(Debug)]
pub struct Frame<B> {
    buffer: GraphicsBuffer<B>,
    framebuffer: Framebuffer,
    registered: bool,
}

impl<B> Frame<B> {
    /// The framebuffer registered for this frame.
    #[must_use]
    pub fn framebuffer(&self) -> Framebuffer {
        self.framebuffer
    }

    /// The backing buffer.
    #[must_use]
    pub fn buffer(&self) -> &GraphicsBuffer<B> {
        &self.buffer
    }

    /// Returns `true` until [`deregister`](Self::deregister) succeeds.
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Removes the framebuffer from the display subsystem.
    ///
    /// Call only after the commit that showed this frame has retired.
    /// Deregistering twice is a no-op.
    pub fn deregister<D: DisplayDevice + ?Sized>(
        &mut self,
        device: &D,
    ) -> Result<(), TeardownError> {
        if !self.registered {
            return Ok(());
        }
        let id = self.framebuffer.id;
        log::debug!("remove fb {id}");
        device
            .remove_framebuffer(id)
            .map_err(|source| TeardownError::Deregister { id, source })?;
        self.registered = false;
        Ok(())
    }

    /// Frees the backing buffer.
    ///
    /// Fails with [`TeardownError::StillRegistered`] if the framebuffer has
    /// not been deregistered; the allocation is then left untouched.
    pub fn free<A>(self, allocator: &A) -> Result<(), TeardownError>
    where
        A: BufferAllocator<Buffer = B> + ?Sized,
    {
        if self.registered {
            return Err(TeardownError::StillRegistered(self.framebuffer.id));
        }
        allocator.free(self.buffer.raw)?;
        Ok(())
    }

    /// Deregisters the framebuffer, then frees the buffer.
    pub fn release<D, A>(mut self, device: &D, allocator: &A) -> Result<(), TeardownError>
    where
        D: DisplayDevice + ?Sized,
        A: BufferAllocator<Buffer = B> + ?Sized,
    {
        self.deregister(device)?;
        self.free(allocator)
    }
}

/// Builds framebuffers from image sources.
pub struct FrameBuilder<'a, D: ?Sized, A: ?Sized> {
    device: &'a D,
    allocator: &'a A,
}

impl<D: ?Sized, A: ?Sized> fmt::Debug for FrameBuilder<'_, D, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuilder").finish_non_exhaustive()
    }
}

impl<'a, D, A> FrameBuilder<'a, D, A>
where
    D: DisplayDevice + ?Sized,
    A: BufferAllocator + ?Sized,
{
    /// Creates a builder over a device channel and an allocator.
    #[must_use]
    pub fn new(device: &'a D, allocator: &'a A) -> Self {
        Self { device, allocator }
    }

    /// Allocates, fills and registers one image.
    ///
    /// A source larger than the buffer is truncated to the buffer size. On
    /// any failure after allocation the buffer is freed before returning.
    /// Dimensions whose row pitch overflows are rejected with
    /// [`AllocationError::CreateFailed`] before anything is allocated.
    pub fn build<S: ByteSource + ?Sized>(
        &self,
        spec: &ImageSpec,
        source: &mut S,
    ) -> Result<Frame<A::Buffer>, BuildError> {
        let layout = BufferLayout::for_format(spec.width, spec.height, spec.format).ok_or(
            AllocationError::CreateFailed {
                width: spec.width,
                height: spec.height,
                size: 0,
                code: EINVAL,
            },
        )?;
        log::debug!(
            "{}x{} pixel size {}, pixel stride {}, byte stride {}, size {}",
            layout.width,
            layout.height,
            layout.pixel_size,
            layout.pixel_stride,
            layout.byte_stride,
            layout.size
        );

        let mut raw = self.allocator.allocate(&AllocRequest {
            layout,
            format: spec.format,
            flags: spec.flags,
            external_fd: spec.external_fd,
        })?;

        if let Err(err) = self.fill(&mut raw, &layout, source) {
            self.discard(raw);
            return Err(err);
        }

        let handle = self.allocator.handle(&raw);
        let desc = FramebufferDesc {
            width: spec.width,
            height: spec.height,
            format: spec.format,
            handle,
            pitch: layout.byte_stride,
            offset: 0,
            modifier: spec.modifier(),
        };
        let id = match self.device.add_framebuffer(&desc) {
            Ok(id) => id,
            Err(err) => {
                self.discard(raw);
                return Err(BuildError::RegistrationFailed {
                    code: err.code,
                    width: desc.width,
                    height: desc.height,
                    format: desc.format,
                    handle: desc.handle,
                    pitch: desc.pitch,
                    offset: desc.offset,
                    modifier: desc.modifier,
                });
            }
        };
        log::debug!("created fb {id} for buffer {handle:?}");

        Ok(Frame {
            buffer: GraphicsBuffer { raw, handle, layout },
            framebuffer: Framebuffer {
                id,
                width: spec.width,
                height: spec.height,
                format: spec.format,
                modifier: desc.modifier,
            },
            registered: true,
        })
    }

    fn fill<S: ByteSource + ?Sized>(
        &self,
        raw: &mut A::Buffer,
        layout: &BufferLayout,
        source: &mut S,
    ) -> Result<(), BuildError> {
        let mut mapping = self.allocator.map(raw)?;
        let capacity = mapping.len().min(layout.size_bytes());
        if let Some(len) = source.len_hint() {
            if len > layout.size {
                log::warn!(
                    "image data is {len} bytes but the buffer holds {}; truncating",
                    layout.size
                );
            }
        }
        let copied = source.read_into(&mut mapping[..capacity])?;
        if copied < capacity {
            log::debug!("image data filled {copied} of {capacity} bytes");
        }
        Ok(())
    }

    fn discard(&self, raw: A::Buffer) {
        if let Err(err) = self.allocator.free(raw) {
            log::warn!("{err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ByteSource, FrameBuilder, ImageSpec};
    use crate::error::{AllocationError, BuildError, TeardownError};
    use crate::fake::{Call, FakeAllocator, FakeDevice};
    use crate::format::{AFBC_MODIFIER, PixelFormat};
    use alloc::vec;

    const EMPTY: &[u8] = &[];

    #[test]
    fn build_allocates_fills_and_registers() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let data = vec![0xab_u8; 640 * 480 * 4];

        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(640, 480, PixelFormat::XBGR8888), &mut &data[..])
            .unwrap();

        let layout = frame.buffer().layout();
        assert_eq!(layout.byte_stride, 2560);
        assert_eq!(layout.size, 1_228_800);
        assert!(frame.is_registered());
        assert_eq!(frame.framebuffer().modifier, None);
        assert!(allocator.contents(frame.buffer().handle()).iter().all(|&b| b == 0xab));
    }

    #[test]
    fn compressed_images_register_with_modifier() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let spec = ImageSpec {
            compress: true,
            ..ImageSpec::new(16, 16, PixelFormat::ARGB8888)
        };

        let frame = FrameBuilder::new(&device, &allocator)
            .build(&spec, &mut &[0_u8; 16][..])
            .unwrap();

        assert_eq!(frame.framebuffer().modifier, Some(AFBC_MODIFIER));
        assert_eq!(device.framebuffer_desc(frame.framebuffer().id).unwrap().modifier, Some(AFBC_MODIFIER));
    }

    #[test]
    fn oversized_source_is_truncated() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let data = vec![7_u8; 64 * 2 + 100];
        let mut source = &data[..];

        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(16, 2, PixelFormat::XBGR8888), &mut source)
            .unwrap();

        assert_eq!(frame.buffer().layout().size, 128);
        assert_eq!(source.len_hint(), Some(100));
    }

    #[test]
    fn registration_failure_frees_buffer_and_reports_context() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        device.fail_next_framebuffer(22);
        let allocator = FakeAllocator::new();

        let err = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(32, 8, PixelFormat::RGB565), &mut EMPTY)
            .unwrap_err();

        match err {
            BuildError::RegistrationFailed {
                code,
                width,
                height,
                pitch,
                modifier,
                ..
            } => {
                assert_eq!((code, width, height, pitch, modifier), (22, 32, 8, 64, None));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn failed_import_is_not_replaced_by_fresh_allocation() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let spec = ImageSpec {
            external_fd: Some(-5),
            ..ImageSpec::new(8, 8, PixelFormat::XBGR8888)
        };

        let err = FrameBuilder::new(&device, &allocator)
            .build(&spec, &mut EMPTY)
            .unwrap_err();

        assert!(matches!(
            err,
            BuildError::Allocation(AllocationError::ImportFailed { fd: -5, .. })
        ));
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn unknown_format_still_allocates_four_bytes_per_pixel() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();

        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(10, 10, PixelFormat(0x3231_564e)), &mut EMPTY)
            .unwrap();

        assert_eq!(frame.buffer().layout().pixel_size, 4);
        assert_eq!(frame.buffer().layout().size, 640);
    }

    #[test]
    fn deregister_then_free_succeeds() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let mut frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(4, 4, PixelFormat::XBGR8888), &mut EMPTY)
            .unwrap();
        let fb = frame.framebuffer().id;
        let handle = frame.buffer().handle();

        frame.deregister(&device).unwrap();
        frame.free(&allocator).unwrap();

        let calls = device.calls();
        assert!(calls.contains(&Call::RemoveFramebuffer(fb)));
        assert_eq!(allocator.freed(), [handle]);
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn freeing_registered_frame_is_a_sequencing_error() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(4, 4, PixelFormat::XBGR8888), &mut EMPTY)
            .unwrap();
        let fb = frame.framebuffer().id;

        let err = frame.free(&allocator).unwrap_err();
        assert_eq!(err, TeardownError::StillRegistered(fb));
        assert!(allocator.freed().is_empty(), "free must not be attempted");
    }

    #[test]
    fn release_orders_deregister_before_free() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::with_journal(device.journal());
        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(4, 4, PixelFormat::XBGR8888), &mut EMPTY)
            .unwrap();
        let fb = frame.framebuffer().id;
        let handle = frame.buffer().handle();

        frame.release(&device, &allocator).unwrap();

        let calls = device.calls();
        let removed = calls
            .iter()
            .position(|c| *c == Call::RemoveFramebuffer(fb))
            .unwrap();
        let freed = calls.iter().position(|c| *c == Call::Free(handle)).unwrap();
        assert!(removed < freed, "framebuffer must be removed before the buffer is freed");
    }

    #[test]
    fn oversized_dimensions_fail_before_allocating() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::with_journal(device.journal());

        let err = FrameBuilder::new(&device, &allocator)
            .build(
                &ImageSpec::new(u32::MAX / 4, 1, PixelFormat::XBGR8888),
                &mut EMPTY,
            )
            .unwrap_err();

        assert_eq!(
            err,
            BuildError::Allocation(AllocationError::CreateFailed {
                width: u32::MAX / 4,
                height: 1,
                size: 0,
                code: 22,
            })
        );
        assert_eq!(err.code(), 22);
        assert!(device.calls().is_empty(), "nothing may be allocated or registered");
        assert_eq!(allocator.live_buffers(), 0);
    }

    #[test]
    fn imported_buffers_share_the_exported_storage() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::with_journal(device.journal());
        allocator.publish_external(77, 512);
        let shared = ImageSpec {
            external_fd: Some(77),
            ..ImageSpec::new(8, 8, PixelFormat::XBGR8888)
        };

        let first = FrameBuilder::new(&device, &allocator)
            .build(&shared, &mut &[0x5a_u8; 512][..])
            .unwrap();
        let second = FrameBuilder::new(&device, &allocator)
            .build(&shared, &mut EMPTY)
            .unwrap();

        assert_ne!(first.buffer().handle(), second.buffer().handle());
        assert!(allocator.contents(second.buffer().handle()).iter().all(|&b| b == 0x5a));
        assert!(device.calls().contains(&Call::Import(second.buffer().handle())));

        // A fresh allocation's export handle can be imported the same way.
        let fresh = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(8, 8, PixelFormat::XBGR8888), &mut &[0x11_u8; 512][..])
            .unwrap();
        let reimport = ImageSpec {
            external_fd: Some(fresh.buffer().raw().export_fd()),
            ..ImageSpec::new(8, 8, PixelFormat::XBGR8888)
        };
        let mirror = FrameBuilder::new(&device, &allocator)
            .build(&reimport, &mut EMPTY)
            .unwrap();
        assert_eq!(
            allocator.contents(mirror.buffer().handle()),
            allocator.contents(fresh.buffer().handle())
        );
    }

    #[test]
    fn allocation_failure_leaks_nothing() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::new();
        allocator.fail_next_allocation(12);

        let err = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(16, 4, PixelFormat::XBGR8888), &mut EMPTY)
            .unwrap_err();

        assert_eq!(
            err,
            BuildError::Allocation(AllocationError::CreateFailed {
                width: 16,
                height: 4,
                size: 256,
                code: 12,
            })
        );
        assert_eq!(allocator.live_buffers(), 0);
        assert_eq!(device.live_framebuffers(), 0);

        // The failure is one-shot.
        assert!(
            FrameBuilder::new(&device, &allocator)
                .build(&ImageSpec::new(16, 4, PixelFormat::XBGR8888), &mut EMPTY)
                .is_ok()
        );
    }

    #[test]
    fn free_closes_the_export_before_releasing_memory() {
        let device = FakeDevice::rockchip_like(1, 1, 1);
        let allocator = FakeAllocator::with_journal(device.journal());
        let frame = FrameBuilder::new(&device, &allocator)
            .build(&ImageSpec::new(4, 4, PixelFormat::XBGR8888), &mut EMPTY)
            .unwrap();
        let handle = frame.buffer().handle();
        let export_fd = frame.buffer().raw().export_fd();

        frame.release(&device, &allocator).unwrap();

        let calls = device.calls();
        let closed = calls
            .iter()
            .position(|c| *c == Call::CloseExport(export_fd))
            .unwrap();
        let freed = calls.iter().position(|c| *c == Call::Free(handle)).unwrap();
        assert_eq!(closed + 1, freed);
    }
}
