// Copyright 2026 the Kmsplane Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Image files as byte sources.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use kmsplane_core::error::SourceError;
use kmsplane_core::frame::ByteSource;

const EIO: i32 = 5;

fn source_error(err: &io::Error) -> SourceError {
    SourceError {
        code: err.raw_os_error().unwrap_or(EIO),
    }
}

/// A raw image file read front to back.
#[derive(Debug)]
pub(crate) struct FileSource<R = File> {
    reader: R,
    len: Option<u64>,
}

impl FileSource {
    /// Opens `path` for reading.
    pub(crate) fn open(path: &Path) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(|err| source_error(&err))?;
        let len = file.metadata().ok().map(|meta| meta.len());
        Ok(Self { reader: file, len })
    }
}

impl<R: Read> FileSource<R> {
    #[cfg(test)]
    fn from_reader(reader: R, len: Option<u64>) -> Self {
        Self { reader, len }
    }
}

impl<R: Read> ByteSource for FileSource<R> {
    fn len_hint(&self) -> Option<u64> {
        self.len
    }

    fn read_into(&mut self, dst: &mut [u8]) -> Result<usize, SourceError> {
        let mut filled = 0;
        while filled < dst.len() {
            match self.reader.read(&mut dst[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(source_error(&err)),
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read};
    use std::path::Path;

    use kmsplane_core::error::SourceError;
    use kmsplane_core::frame::ByteSource;

    use super::FileSource;

    /// Hands out at most `chunk` bytes per read, failing once if asked.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        interrupt_once: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.interrupt_once {
                self.interrupt_once = false;
                return Err(io::ErrorKind::Interrupted.into());
            }
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn short_reads_are_accumulated() {
        let mut source = FileSource::from_reader(
            Trickle {
                data: (0..10).collect(),
                pos: 0,
                chunk: 3,
                interrupt_once: true,
            },
            Some(10),
        );
        let mut dst = [0_u8; 8];

        assert_eq!(source.read_into(&mut dst), Ok(8));
        assert_eq!(dst, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(source.len_hint(), Some(10));
    }

    #[test]
    fn end_of_input_returns_partial_count() {
        let mut source = FileSource::from_reader(&[9_u8, 9, 9][..], None);
        let mut dst = [0_u8; 8];
        assert_eq!(source.read_into(&mut dst), Ok(3));
    }

    #[test]
    fn missing_file_reports_errno() {
        let err = FileSource::open(Path::new("/nonexistent/image.raw")).unwrap_err();
        assert_eq!(err, SourceError { code: 2 });
    }
}
