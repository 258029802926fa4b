//! Logger (spec §4.D) — the public, thread-safe ingress point. All public
//! operations serialize on one coarse mutex guarding the serializer; all
//! actual transport I/O is deferred to the driver's own worker, so `put`
//! never blocks on the network.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::truncate_name;
use crate::error::{PipelineError, PutOutcome, Result};
use crate::record::Record;
use crate::serializer::{Serializer, SwapResult};
use crate::transfer::{TransferDriver, TransferJob, VFile};

pub struct Logger<'a> {
    serializer: Mutex<Serializer<'a>>,
    driver: Arc<dyn TransferDriver>,
    encoding_buf_size: usize,
    /// Truncated to 8 chars (spec §6); carried into log lines so multiple
    /// loggers in one process can be told apart.
    name: Option<String>,
}

impl<'a> Logger<'a> {
    pub fn new(
        record_queue_size: usize,
        encoding_buf_size: usize,
        base_name: Option<String>,
        name: Option<String>,
        driver: Arc<dyn TransferDriver>,
    ) -> Result<Self> {
        let buf = vec![0u8; encoding_buf_size];
        let serializer = Serializer::new(buf, record_queue_size, base_name)?;
        let name = name.map(|n| truncate_name(&n));
        Ok(Self { serializer: Mutex::new(serializer), driver, encoding_buf_size, name })
    }

    fn fresh_buf(&self) -> Vec<u8> {
        vec![0u8; self.encoding_buf_size]
    }

    /// Hand a filled buffer to the driver's non-blocking `try_send`. An
    /// empty buffer carries nothing and is dropped without a hand-off.
    /// Hand-off failure releases the file; the driver never sees it again
    /// (spec §4.D: "on failure the allocated file descriptor and job are
    /// released").
    fn dispatch(&self, filled: Vec<u8>) {
        if filled.is_empty() {
            return;
        }
        let bytes = filled.len();
        let job = TransferJob::new(VFile::from_filled(filled));
        match self.driver.try_send(job) {
            Ok(()) => debug!(logger = ?self.name, bytes, "pack handed off to transfer driver"),
            Err(e) => warn!(logger = ?self.name, error = %e, bytes, "dropping pack: transfer driver refused hand-off"),
        }
    }

    /// Allocate a fresh buffer, swap it in, and dispatch whatever the swap
    /// filled — used by `put`'s single-shot must-swap/queue-full recovery
    /// (spec §4.D step 2; contrast with `flush_locked`'s loop).
    fn swap_and_dispatch(&self, ser: &mut Serializer<'a>) -> Result<()> {
        match ser.swap(Some(self.fresh_buf()))? {
            SwapResult::Invalidated => Ok(()),
            SwapResult::Swapped { filled, .. } => {
                self.dispatch(filled);
                Ok(())
            }
        }
    }

    /// Repeatedly swap until a swap produces zero bytes (spec §4.D step 1:
    /// "Terminate when `swap` returns success with zero bytes or any
    /// error"). Every non-empty buffer along the way is dispatched,
    /// including ones returned with a must-swap outcome.
    fn flush_locked(&self, ser: &mut Serializer<'a>) -> Result<()> {
        loop {
            match ser.swap(Some(self.fresh_buf()))? {
                SwapResult::Invalidated => return Ok(()),
                SwapResult::Swapped { filled, .. } => {
                    let empty = filled.is_empty();
                    self.dispatch(filled);
                    if empty {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Copy `rec` into the serializer; the caller's original is untouched
    /// regardless of outcome (spec §4.D step 2: "copy the record so failure
    /// leaves the caller's record untouched").
    pub fn put(&self, rec: &Record<'a>) -> Result<()> {
        let copy = rec.try_clone(false)?;
        let mut ser = self.serializer.lock().unwrap();

        match ser.put(copy) {
            Ok(PutOutcome::Accepted) => Ok(()),
            Ok(PutOutcome::AcceptedMustSwap) => self.swap_and_dispatch(&mut ser),
            Err((PipelineError::QueueFull, rejected)) => {
                self.swap_and_dispatch(&mut ser)?;
                // Guaranteed to succeed: the fresh buffer has room for at
                // least one record and the ring just gave up a slot.
                ser.put(rejected).map(|_| ()).map_err(|(e, _)| e)
            }
            Err((e, _)) => Err(e),
        }
    }

    /// Flush everything pending, then invalidate the serializer. Concurrent
    /// callers of `put`/`close` on the same logger must be externally
    /// excluded (spec §4.D).
    pub fn close(&self) -> Result<()> {
        let mut ser = self.serializer.lock().unwrap();
        self.flush_locked(&mut ser)?;
        match ser.swap(None)? {
            SwapResult::Invalidated => Ok(()),
            SwapResult::Swapped { .. } => {
                unreachable!("swap(None) always returns Invalidated")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{RecordValue, Timestamp, Unit};
    use crate::testutil::RecordingDriver;

    fn rec(name: &str) -> Record<'_> {
        Record::new(name, Timestamp::new(1, 0), Unit::Celsius, RecordValue::U32(1)).unwrap()
    }

    #[test]
    fn put_then_close_dispatches_exactly_one_pack() {
        let driver = Arc::new(RecordingDriver::new());
        let logger = Logger::new(4, 512, None, None, driver.clone()).unwrap();

        logger.put(&rec("a")).unwrap();
        logger.put(&rec("b")).unwrap();
        logger.close().unwrap();

        assert_eq!(driver.sent_count(), 1);
    }

    #[test]
    fn tiny_buffer_splits_across_two_dispatched_packs() {
        let driver = Arc::new(RecordingDriver::new());
        let logger = Logger::new(4, 48, None, None, driver.clone()).unwrap();

        logger.put(&rec("a")).unwrap();
        logger.put(&rec("b")).unwrap();
        logger.close().unwrap();

        assert_eq!(driver.sent_count(), 2);
    }

    #[test]
    fn queue_full_swaps_and_retries_transparently() {
        let driver = Arc::new(RecordingDriver::new());
        let logger = Logger::new(2, 4096, None, None, driver.clone()).unwrap();

        logger.put(&rec("a")).unwrap();
        logger.put(&rec("b")).unwrap();
        // Ring capacity is 2 and both records still fit the buffer, so this
        // third put hits queue-full and must swap to make room.
        logger.put(&rec("c")).unwrap();
        logger.close().unwrap();

        assert!(driver.sent_count() >= 1);
    }
}
