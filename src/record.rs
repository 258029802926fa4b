//! Record model (spec §3, §4.A).
//!
//! A `Record` borrows its name from the caller — the caller must keep the
//! name alive until the record has been flushed out of the serializer — and
//! owns its value outright. Only `RecordValue::Text` carries heap data.

use crate::error::{PipelineError, Result};

/// SenML unit tag (spec §3). `None` is a first-class variant: it means "no
/// unit", not "unit unset".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    Celsius,
    Percent,
    Volt,
    Ampere,
    Watt,
    Lux,
    Pascal,
    Meter,
    MeterPerSecond,
    Hertz,
    Ratio,
}

impl Unit {
    /// SenML unit string per RFC 8428 §12.1, or `None` for [`Unit::None`].
    pub fn senml_str(self) -> Option<&'static str> {
        match self {
            Unit::None => None,
            Unit::Celsius => Some("Cel"),
            Unit::Percent => Some("%RH"),
            Unit::Volt => Some("V"),
            Unit::Ampere => Some("A"),
            Unit::Watt => Some("W"),
            Unit::Lux => Some("lx"),
            Unit::Pascal => Some("Pa"),
            Unit::Meter => Some("m"),
            Unit::MeterPerSecond => Some("m/s"),
            Unit::Hertz => Some("Hz"),
            Unit::Ratio => Some("/"),
        }
    }
}

/// Timestamp as whole seconds plus a microsecond remainder, matching the
/// source's `seconds + microseconds` pair rather than a single floating
/// point so records stay cheap and exact until encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub seconds: i64,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(seconds: i64, micros: u32) -> Self {
        debug_assert!(micros < 1_000_000);
        Self { seconds, micros }
    }

    /// Seconds-precision floating point value for SenML key 6.
    pub fn as_f64_seconds(self) -> f64 {
        self.seconds as f64 + (self.micros as f64) * 1e-6
    }
}

/// The tagged value a record carries. Only `Text` owns heap data.
#[derive(Debug, Clone)]
pub enum RecordValue {
    Empty,
    U32(u32),
    I32(i32),
    /// The only variant with a single, statically-enforced owner.
    Text(String),
}

/// A single measurement. `name` is borrowed — its lifetime must outlive the
/// record's time inside the serializer, which the `'a` bound makes the
/// compiler check rather than a documented caller contract.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    pub name: &'a str,
    pub timestamp: Timestamp,
    pub unit: Unit,
    pub value: RecordValue,
}

impl<'a> Record<'a> {
    pub fn new(name: &'a str, timestamp: Timestamp, unit: Unit, value: RecordValue) -> Result<Self> {
        if name.is_empty() {
            return Err(PipelineError::InvalidArgument("record name must not be empty".into()));
        }
        Ok(Self { name, timestamp, unit, value })
    }

    /// Fallible clone, mirroring the source's "copy — duplicate owned
    /// string, fail with out-of-memory if duplication fails" contract.
    /// `String::clone` cannot itself fail in safe Rust; `simulate_oom` exists
    /// so tests can exercise the failure path the source's API contract
    /// promises callers must handle.
    pub fn try_clone(&self, simulate_oom: bool) -> Result<Record<'a>> {
        if simulate_oom {
            if let RecordValue::Text(_) = &self.value {
                return Err(PipelineError::OutOfMemory);
            }
        }
        Ok(Record {
            name: self.name,
            timestamp: self.timestamp,
            unit: self.unit,
            value: self.value.clone(),
        })
    }
}
