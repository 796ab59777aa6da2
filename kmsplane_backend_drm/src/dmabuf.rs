// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! CPU mappings of dmabuf file descriptors.

use core::ffi::c_void;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::ptr::{self, NonNull};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

use rustix::io::{self, fcntl_dupfd_cloexec};
use rustix::mm::{MapFlags, ProtFlags, mmap, munmap};

/// Duplicates an inherited descriptor so the buffer owns an independent
/// reference to it. The original descriptor stays open.
pub(crate) fn adopt(fd: RawFd) -> io::Result<OwnedFd> {
    if fd < 0 {
        return Err(io::Errno::BADF);
    }
    fcntl_dupfd_cloexec(borrow_inherited(fd), 0)
}

#[expect(
    unsafe_code,
    reason = "descriptors passed on the command line are inherited from the parent process and stay open for its lifetime"
)]
fn borrow_inherited(fd: RawFd) -> BorrowedFd<'static> {
    // SAFETY: `fd` is non-negative and inherited; it is only used for the
    // duplication above.
    unsafe { BorrowedFd::borrow_raw(fd) }
}

/// Read/write shared mapping of `len` bytes of a dmabuf.
///
/// Unmapped on drop. Holds the descriptor mutably borrowed so it cannot be
/// closed while mapped.
#[derive(Debug)]
pub struct DmabufMapping<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _fd: PhantomData<&'a mut OwnedFd>,
}

impl<'a> DmabufMapping<'a> {
    pub(crate) fn new(fd: &'a mut OwnedFd, len: usize) -> io::Result<Self> {
        if len == 0 {
            return Err(io::Errno::INVAL);
        }
        let ptr = map_shared(fd.as_fd(), len)?;
        NonNull::new(ptr.cast::<u8>())
            .map(|ptr| Self {
                ptr,
                len,
                _fd: PhantomData,
            })
            .ok_or(io::Errno::NOMEM)
    }
}

#[expect(
    unsafe_code,
    reason = "mapping a dmabuf requires mmap; the result is wrapped in DmabufMapping which unmaps on drop"
)]
fn map_shared(fd: BorrowedFd<'_>, len: usize) -> io::Result<*mut c_void> {
    // SAFETY: a null hint lets the kernel pick the address, so no existing
    // mapping is replaced.
    unsafe {
        mmap(
            ptr::null_mut(),
            len,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
    }
}

#[expect(
    unsafe_code,
    reason = "the pointer and length come from a live mmap owned by DmabufMapping"
)]
impl Deref for DmabufMapping<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: `ptr` points to `len` mapped bytes that live until drop.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

#[expect(
    unsafe_code,
    reason = "the pointer and length come from a live mmap owned by DmabufMapping"
)]
impl DerefMut for DmabufMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `deref`; `&mut self` guarantees exclusivity.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

#[expect(unsafe_code, reason = "releases the mapping created in DmabufMapping::new")]
impl Drop for DmabufMapping<'_> {
    fn drop(&mut self) {
        // SAFETY: the region was mapped by `new` and is not referenced after
        // this point.
        if let Err(err) = unsafe { munmap(self.ptr.as_ptr().cast::<c_void>(), self.len) } {
            log::warn!("munmap of {} bytes failed: {err}", self.len);
        }
    }
}
