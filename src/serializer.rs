//! Record serializer (spec §4.C) — the simulate-then-commit bridge between
//! the logger's one-record-at-a-time ingress and a wholesale-swapped output
//! buffer.
//!
//! `fit_cnt` is the invariant tying the two encoder phases together: it is
//! only ever produced by a *simulation* encode (never written), and is only
//! ever consumed by a *commit* encode (actually written), inside `swap`.
//! Between calls the encoder is always back in simulation mode.

use crate::encoder::{PackEncoder, ARRAY_MAX_BYTES};
use crate::error::{PipelineError, PutOutcome, Result, SwapOutcome};
use crate::record::Record;
use crate::ring::Ring;

/// A `put` that could not be accepted hands the record straight back so the
/// caller retains ownership — mirroring spec §4.C step 1/2/4's "ownership is
/// returned to caller" rule.
pub type PutReject<'a> = (PipelineError, Record<'a>);

/// Result of [`Serializer::swap`].
pub enum SwapResult {
    /// NUL-destination case: the serializer has been invalidated. Remaining
    /// records were drained (and their owned data freed) without being
    /// encoded anywhere.
    Invalidated,
    /// Normal swap. `filled` is the buffer that was in use, truncated to
    /// its actual encoded length (zero length if nothing was pending).
    Swapped { filled: Vec<u8>, outcome: SwapOutcome },
}

pub struct Serializer<'a> {
    ring: Ring<'a>,
    base: Option<String>,
    buf: Vec<u8>,
    sim: PackEncoder<'static>,
    fit_cnt: usize,
    /// Set once a `put` probe has found a record that doesn't fit the
    /// current buffer. Record sizes aren't monotone (a large `Text` record
    /// can be followed by a tiny `Empty` one), so once one record has
    /// overflowed, every later record must also be routed past the buffer
    /// without re-probing — otherwise `fit_cnt` could count a record that
    /// isn't contiguous with the ones actually committed ahead of it.
    overflowed: bool,
    valid: bool,
}

impl<'a> Serializer<'a> {
    /// `buf` must be at least [`ARRAY_MAX_BYTES`] long; `ring_capacity` must
    /// be a positive power of two.
    pub fn new(buf: Vec<u8>, ring_capacity: usize, base: Option<String>) -> Result<Self> {
        if buf.len() < ARRAY_MAX_BYTES {
            return Err(PipelineError::InvalidArgument(
                "encoding_buf_size must be at least ARRAY_MAX_BYTES".into(),
            ));
        }
        let ring = Ring::new(ring_capacity)?;
        let budget = buf.len() - ARRAY_MAX_BYTES;
        let mut sim = PackEncoder::simulate(budget);
        sim.open(base.as_deref())?;
        Ok(Self { ring, base, buf, sim, fit_cnt: 0, overflowed: false, valid: true })
    }

    pub fn fit_cnt(&self) -> usize {
        self.fit_cnt
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }

    fn check_invariants(&self) {
        debug_assert!(self.fit_cnt <= self.ring.len());
    }

    /// Accept one record into the ring, if there is room and/or useful
    /// buffer space for it (spec §4.C `put`).
    pub fn put(&mut self, rec: Record<'a>) -> std::result::Result<PutOutcome, PutReject<'a>> {
        if !self.valid {
            return Err((PipelineError::InvalidArgument("serializer invalidated".into()), rec));
        }
        if self.ring.is_full() {
            return Err((PipelineError::QueueFull, rec));
        }

        // Once an earlier record has already overflowed the buffer, every
        // later one must also wait for the next buffer — re-probing it
        // would count it in `fit_cnt` out of order with the record(s) ahead
        // of it that didn't fit.
        if self.overflowed {
            self.ring.put(rec).expect("checked not full above");
            self.check_invariants();
            return Ok(PutOutcome::AcceptedMustSwap);
        }

        match self.sim.try_add_record(self.base.as_deref(), &rec) {
            Ok(true) => {
                self.ring.put(rec).expect("checked not full above");
                self.fit_cnt += 1;
                self.check_invariants();
                Ok(PutOutcome::Accepted)
            }
            Ok(false) if self.fit_cnt == 0 => {
                Err((
                    PipelineError::NoSpace(
                        "encoding_buf_size is too small to hold even one record".into(),
                    ),
                    rec,
                ))
            }
            Ok(false) => {
                // Will land in the *next* buffer after `swap`; ownership is
                // taken now even though it hasn't been encoded yet.
                self.overflowed = true;
                self.ring.put(rec).expect("checked not full above");
                self.check_invariants();
                Ok(PutOutcome::AcceptedMustSwap)
            }
            Err(e) => Err((e, rec)),
        }
    }

    /// Swap the working buffer for `new_buf`, committing everything counted
    /// by `fit_cnt` into the outgoing buffer first. `new_buf = None`
    /// invalidates the serializer instead (spec §4.C `swap` step 3).
    pub fn swap(&mut self, new_buf: Option<Vec<u8>>) -> Result<SwapResult> {
        if !self.valid {
            return Err(PipelineError::InvalidArgument("serializer already invalidated".into()));
        }

        let Some(mut new_buf) = new_buf else {
            // Drain remaining records, freeing owned strings, without
            // writing any bytes anywhere. The pretend budget of 0xFFFF
            // mirrors the source exactly (spec §9 open question: may
            // under-size extreme cases — not fixed here).
            let mut drain = PackEncoder::<'static>::simulate(0xFFFF);
            let _ = drain.open(self.base.as_deref());
            while let Some(rec) = self.ring.get() {
                let _ = drain.try_add_record(self.base.as_deref(), &rec);
                // `rec` drops here, freeing any owned string.
            }
            self.valid = false;
            return Ok(SwapResult::Invalidated);
        };

        if new_buf.len() < ARRAY_MAX_BYTES {
            return Err(PipelineError::InvalidArgument(
                "encoding_buf_size must be at least ARRAY_MAX_BYTES".into(),
            ));
        }

        if self.fit_cnt > 0 {
            let committed = {
                let mut commit = PackEncoder::commit(&mut self.buf);
                commit
                    .open(self.base.as_deref())
                    .expect("commit-phase open must succeed: simulation already proved it fits");
                for _ in 0..self.fit_cnt {
                    let rec = self.ring.get().expect("fit_cnt <= ring_fill");
                    let fit = commit
                        .try_add_record(self.base.as_deref(), &rec)
                        .expect("commit-phase add must succeed: simulation already proved it fits");
                    assert!(fit, "simulation and commit encoders disagree on record size");
                    // `rec` drops here, freeing any owned string — mirrors
                    // "each owned string is freed after it has been encoded".
                }
                commit
                    .close()
                    .expect("commit-phase close must succeed: budget was reserved for it")
            };
            self.buf.truncate(committed);
        } else {
            self.buf.clear();
        }

        std::mem::swap(&mut self.buf, &mut new_buf);
        let filled = new_buf; // now holds what was `self.buf` before the swap
        self.fit_cnt = 0;

        let budget = self.buf.len() - ARRAY_MAX_BYTES;
        self.sim = PackEncoder::simulate(budget);
        self.sim.open(self.base.as_deref())?;

        let mut cursor = self.ring.cursor();
        let mut fit = 0usize;
        let mut overflowed = false;
        while let Some(rec) = self.ring.next(&mut cursor) {
            if self.sim.try_add_record(self.base.as_deref(), rec)? {
                fit += 1;
            } else {
                overflowed = true;
                break;
            }
        }
        self.fit_cnt = fit;
        self.overflowed = overflowed;
        self.check_invariants();

        // "Success" means there is nothing left pending at all — any
        // record still sitting in the ring, fitting or not, means another
        // swap is required to actually flush it (spec §4.C step 4, §9
        // invariant: fit_cnt == 0 whenever swap returns non-must-swap).
        let outcome = if self.ring.is_empty() {
            SwapOutcome::Done
        } else {
            SwapOutcome::MustSwapAgain
        };

        Ok(SwapResult::Swapped { filled, outcome })
    }
}
