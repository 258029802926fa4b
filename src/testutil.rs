//! Mock transfer driver shared by the serializer/logger/LTB/publisher unit
//! test suites (SPEC_FULL §10.4), so each doesn't hand-roll its own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{PipelineError, Result};
use crate::transfer::{not_implemented, TransferDriver, TransferJob};

pub struct RecordingDriver {
    sent: Mutex<Vec<Vec<u8>>>,
    fail_next: AtomicUsize,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self { sent: Mutex::new(Vec::new()), fail_next: AtomicUsize::new(0) }
    }

    /// The next `n` calls to `try_send` return `would-block` instead of
    /// accepting the job.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent_packs(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

impl Default for RecordingDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferDriver for RecordingDriver {
    fn try_send(&self, job: TransferJob) -> Result<()> {
        if self.fail_next.load(Ordering::SeqCst) > 0 {
            self.fail_next.fetch_sub(1, Ordering::SeqCst);
            return Err(PipelineError::WouldBlock);
        }
        let bytes = job.file.as_bytes().to_vec();
        let len = bytes.len();
        self.sent.lock().unwrap().push(bytes);
        job.complete(Ok(len));
        Ok(())
    }

    async fn send(&self, job: TransferJob) -> Result<usize> {
        let bytes = job.file.as_bytes().to_vec();
        let len = bytes.len();
        self.sent.lock().unwrap().push(bytes);
        Ok(len)
    }

    fn try_recv(&self) -> Result<TransferJob> {
        Err(not_implemented("RecordingDriver::try_recv"))
    }

    async fn recv(&self) -> Result<TransferJob> {
        Err(not_implemented("RecordingDriver::recv"))
    }

    async fn delete(self: Arc<Self>) {}
}
