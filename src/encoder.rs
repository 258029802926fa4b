//! SenML/CBOR pack encoder (spec §4.B).
//!
//! Two sink types share one encoding path: [`PackEncoder::simulate`] counts
//! bytes a real encode would consume without writing any, and
//! [`PackEncoder::commit`] writes through a caller-supplied buffer. Both
//! route through `minicbor::Encoder`, so "does it fit" and "write it" can
//! never disagree about how many bytes a record costs.

use minicbor::encode::Write as CborWrite;
use minicbor::Encoder;

use crate::error::{PipelineError, Result};
use crate::record::{Record, RecordValue};

/// Bytes reserved for closing the outer indefinite-length array. The actual
/// CBOR break byte is a single byte; this budget is kept at the source's
/// literal constant rather than trimmed to the true minimum.
pub const ARRAY_MAX_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkOverflow;

struct CountingSink {
    budget: usize,
    used: usize,
}

impl CborWrite for CountingSink {
    type Error = SinkOverflow;
    fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), Self::Error> {
        if self.used + buf.len() > self.budget {
            return Err(SinkOverflow);
        }
        self.used += buf.len();
        Ok(())
    }
}

struct SliceSink<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> CborWrite for SliceSink<'a> {
    type Error = SinkOverflow;
    fn write_all(&mut self, data: &[u8]) -> std::result::Result<(), Self::Error> {
        let end = self.pos + data.len();
        if end > self.buf.len() {
            return Err(SinkOverflow);
        }
        self.buf[self.pos..end].copy_from_slice(data);
        self.pos = end;
        Ok(())
    }
}

enum Sink<'a> {
    Counting(CountingSink),
    Slice(SliceSink<'a>),
}

impl<'a> Sink<'a> {
    fn used(&self) -> usize {
        match self {
            Sink::Counting(s) => s.used,
            Sink::Slice(s) => s.pos,
        }
    }

    fn truncate_to(&mut self, n: usize) {
        match self {
            Sink::Counting(s) => s.used = n,
            Sink::Slice(s) => s.pos = n,
        }
    }
}

impl<'a> CborWrite for Sink<'a> {
    type Error = SinkOverflow;
    fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), Self::Error> {
        match self {
            Sink::Counting(s) => s.write_all(buf),
            Sink::Slice(s) => s.write_all(buf),
        }
    }
}

impl<'a, 'b> CborWrite for &'b mut Sink<'a> {
    type Error = SinkOverflow;
    fn write_all(&mut self, buf: &[u8]) -> std::result::Result<(), Self::Error> {
        (**self).write_all(buf)
    }
}

fn overflow_to_no_space<E: std::fmt::Debug>(_e: minicbor::encode::Error<E>) -> PipelineError {
    PipelineError::NoSpace("CBOR pack encoder ran out of room".into())
}

/// Two-mode SenML/CBOR pack encoder (spec §4.B, §9 design note: "prefer two
/// encoder modes as sum-type variants").
pub struct PackEncoder<'a> {
    sink: Sink<'a>,
    opened: bool,
}

impl<'a> PackEncoder<'a> {
    /// Simulation mode, accounting against `budget` usable bytes without
    /// writing anything.
    pub fn simulate(budget: usize) -> Self {
        Self {
            sink: Sink::Counting(CountingSink { budget, used: 0 }),
            opened: false,
        }
    }

    /// Commit mode, writing through `buf` from its start.
    pub fn commit(buf: &'a mut [u8]) -> Self {
        Self {
            sink: Sink::Slice(SliceSink { buf, pos: 0 }),
            opened: false,
        }
    }

    pub fn bytes_used(&self) -> usize {
        self.sink.used()
    }

    /// Open the outer indefinite-length array, emitting the leading
    /// base-name map (`{-2: base}`) if `base` is non-empty.
    pub fn open(&mut self, base: Option<&str>) -> Result<()> {
        debug_assert!(!self.opened);
        let mut enc = Encoder::new(&mut self.sink);
        enc.begin_array().map_err(overflow_to_no_space)?;
        if let Some(name) = base {
            if !name.is_empty() {
                enc.map(1).map_err(overflow_to_no_space)?;
                enc.i8(-2).map_err(overflow_to_no_space)?;
                enc.str(name).map_err(overflow_to_no_space)?;
            }
        }
        self.opened = true;
        Ok(())
    }

    /// Encode one record's SenML map, unconditionally. Callers that need
    /// the "does it fit" query should use [`Self::try_add_record`] instead —
    /// this writes straight through and can leave the sink partially
    /// advanced on overflow.
    fn add_record(&mut self, _base: Option<&str>, rec: &Record<'_>) -> Result<()> {
        debug_assert!(self.opened);
        let unit = rec.unit.senml_str();
        let has_value = !matches!(rec.value, RecordValue::Empty);
        let mut n = 2u64; // name (0) + timestamp (6) always present
        if unit.is_some() {
            n += 1;
        }
        if has_value {
            n += 1;
        }

        let mut enc = Encoder::new(&mut self.sink);
        enc.map(n).map_err(overflow_to_no_space)?;

        // The base name was already emitted once in the pack's leading `{-2:
        // base}` map (see `open`); a decoder reconstructs the full name by
        // concatenating that with this bare record name, so it must not be
        // prepended again here.
        enc.i8(0).map_err(overflow_to_no_space)?;
        enc.str(rec.name).map_err(overflow_to_no_space)?;

        enc.i8(6).map_err(overflow_to_no_space)?;
        enc.f64(rec.timestamp.as_f64_seconds()).map_err(overflow_to_no_space)?;

        if let Some(u) = unit {
            enc.i8(1).map_err(overflow_to_no_space)?;
            enc.str(u).map_err(overflow_to_no_space)?;
        }

        match &rec.value {
            RecordValue::Empty => {}
            RecordValue::U32(v) => {
                enc.i8(2).map_err(overflow_to_no_space)?;
                enc.u32(*v).map_err(overflow_to_no_space)?;
            }
            RecordValue::I32(v) => {
                enc.i8(2).map_err(overflow_to_no_space)?;
                enc.i32(*v).map_err(overflow_to_no_space)?;
            }
            RecordValue::Text(s) => {
                enc.i8(2).map_err(overflow_to_no_space)?;
                enc.str(s).map_err(overflow_to_no_space)?;
            }
        }

        Ok(())
    }

    /// Try to encode `rec`; on overflow the sink is rolled back to exactly
    /// where it was before the attempt, so a failed "would it fit" probe
    /// never leaves a half-written record behind. This is the mechanism the
    /// serializer's `put`/`swap` simulate-then-commit protocol relies on.
    pub fn try_add_record(&mut self, base: Option<&str>, rec: &Record<'_>) -> Result<bool> {
        let snapshot = self.sink.used();
        match self.add_record(base, rec) {
            Ok(()) => Ok(true),
            Err(PipelineError::NoSpace(_)) => {
                self.sink.truncate_to(snapshot);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Close the outer array, returning the total bytes accounted/written.
    pub fn close(&mut self) -> Result<usize> {
        debug_assert!(self.opened);
        let mut enc = Encoder::new(&mut self.sink);
        enc.end().map_err(overflow_to_no_space)?;
        Ok(self.sink.used())
    }
}
