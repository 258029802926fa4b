//! Transfer driver contract and virtual in-memory file (spec §4.H, §6;
//! SPEC_FULL §10.1.3).
//!
//! `TransferDriver` is the capability both the [`crate::logger::Logger`] and
//! the LTB's per-instance sender hand packs off to. `send`/`recv` suspend the
//! caller; `try_send`/`try_recv`/`delete` never do, which is why this is an
//! `async_trait` rather than a plain sync trait — mixing blocking and
//! non-blocking methods on one object without one is awkward in Rust.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::{PipelineError, Result};

/// A single-use in-memory file standing in for the virtual storage file of
/// spec.md §6. `fend` is the high-water mark of bytes ever written — the
/// watermark clients read back against, distinct from the read/write cursor.
pub struct VFile {
    buf: BytesMut,
    pos: usize,
    fend: usize,
    owns_buf: bool,
    has_data: bool,
    closed: bool,
}

impl VFile {
    /// A fresh, empty file that owns its own growable buffer.
    pub fn new_empty() -> Self {
        Self { buf: BytesMut::new(), pos: 0, fend: 0, owns_buf: true, has_data: false, closed: false }
    }

    /// Wrap an already-filled buffer (e.g. the bytes a serializer swap just
    /// produced) as a read-only file ready for transfer.
    pub fn from_filled(data: Vec<u8>) -> Self {
        let fend = data.len();
        Self {
            buf: BytesMut::from(&data[..]),
            pos: 0,
            fend,
            owns_buf: false,
            has_data: fend > 0,
            closed: false,
        }
    }

    pub fn fend(&self) -> usize {
        self.fend
    }

    pub fn owns_buf(&self) -> bool {
        self.owns_buf
    }

    pub fn has_data(&self) -> bool {
        self.has_data
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Freeze the current contents as an immutable byte range, without
    /// consuming the file.
    pub fn as_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf[..self.fend])
    }

    pub fn close(&mut self) {
        self.closed = true;
    }
}

impl Read for VFile {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "file closed"));
        }
        let avail = self.fend.saturating_sub(self.pos);
        let n = avail.min(out.len());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for VFile {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::Other, "file closed"));
        }
        let end = self.pos + data.len();
        if end > self.buf.len() {
            self.buf.resize(end, 0);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        self.fend = self.fend.max(self.pos);
        self.has_data = self.fend > 0;
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for VFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => n as i64,
            SeekFrom::End(n) => self.fend as i64 + n,
            SeekFrom::Current(n) => self.pos as i64 + n,
        };
        if target < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "negative seek"));
        }
        self.pos = target as usize;
        Ok(self.pos as u64)
    }
}

/// One unit of outbound work: a file to transfer plus an optional
/// completion callback, invoked exactly once (spec §4.H).
pub struct TransferJob {
    pub file: VFile,
    pub on_complete: Option<Box<dyn FnOnce(Result<usize>) + Send>>,
}

impl TransferJob {
    pub fn new(file: VFile) -> Self {
        Self { file, on_complete: None }
    }

    pub fn with_callback(file: VFile, cb: impl FnOnce(Result<usize>) + Send + 'static) -> Self {
        Self { file, on_complete: Some(Box::new(cb)) }
    }

    pub fn complete(self, result: Result<usize>) {
        if let Some(cb) = self.on_complete {
            cb(result);
        }
    }
}

#[async_trait]
pub trait TransferDriver: Send + Sync {
    /// Non-blocking enqueue. Never invoked if this returns `Err`.
    fn try_send(&self, job: TransferJob) -> Result<()>;

    /// Enqueue and wait for completion, returning the bytes transferred.
    async fn send(&self, job: TransferJob) -> Result<usize>;

    fn try_recv(&self) -> Result<TransferJob>;

    async fn recv(&self) -> Result<TransferJob>;

    /// Wait for all in-flight jobs to finish, then release the driver.
    async fn delete(self: Arc<Self>);
}

/// Convenience for drivers with nothing sensible to return for `try_recv`/
/// `recv` (publish-only sinks such as the Publisher's outbound side).
pub fn not_implemented(what: &'static str) -> PipelineError {
    PipelineError::NotImplemented(what)
}
