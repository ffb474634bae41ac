//! Deterministic fault injection.
//!
//! Both injectors are driven purely by call counts, never by time, so a
//! fixed command sequence always produces the same faults.

use serde::{Deserialize, Serialize};

use crate::CorruptionKind;

const SINGLE_THRESHOLD_MODULUS: i32 = 8;
const DOUBLE_THRESHOLD_MODULUS: i32 = 100;
/// Distance from a periodic hit to the irregular follow-up hit.
const RETRIGGER_OFFSET: u64 = 4;
/// Counter jump taken after an irregular hit.
const RETRIGGER_SKIP: u64 = 7;

impl CorruptionKind {
    /// Largest bin a corrupted decision can take, or `None` when nothing
    /// is ever corrupted.
    pub fn highest_output(self) -> Option<i32> {
        match self {
            CorruptionKind::None => None,
            CorruptionKind::SingleThreshold { .. } => Some(SINGLE_THRESHOLD_MODULUS - 1),
            CorruptionKind::DoubleThreshold { .. } => Some(DOUBLE_THRESHOLD_MODULUS - 1),
        }
    }
}

/// Alters the value of a bin decision on schedule. One call per decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorruptionScheme {
    kind: CorruptionKind,
    count: u64,
    next_trigger: Option<u64>,
    corrupted: u64,
}

impl CorruptionScheme {
    pub fn new(kind: CorruptionKind) -> Self {
        Self {
            kind,
            count: 0,
            next_trigger: None,
            corrupted: 0,
        }
    }

    pub fn kind(&self) -> CorruptionKind {
        self.kind
    }

    /// Number of decisions that were altered so far.
    pub fn corrupted(&self) -> u64 {
        self.corrupted
    }

    pub fn corrupt(&mut self, bin: i32) -> i32 {
        let out = match self.kind {
            CorruptionKind::None => return bin,
            CorruptionKind::SingleThreshold { period } => self.single(bin, period),
            CorruptionKind::DoubleThreshold { first, second } => self.double(bin, first, second),
        };
        if out != bin {
            self.corrupted += 1;
        }
        out
    }

    fn single(&mut self, bin: i32, period: u64) -> i32 {
        self.count += 1;
        let periodic = self.count % period == 0;
        let irregular = self.next_trigger == Some(self.count);
        if !periodic && !irregular {
            return bin;
        }
        let out = remap(bin, self.count, SINGLE_THRESHOLD_MODULUS);
        tracing::debug!(call = self.count, from = bin, to = out, "corrupt bin data");
        if periodic {
            self.next_trigger = Some(self.count + RETRIGGER_OFFSET);
        } else {
            self.count += RETRIGGER_SKIP;
        }
        out
    }

    fn double(&mut self, bin: i32, first: u64, second: u64) -> i32 {
        self.count += 1;
        if self.count % first != 0 && self.count % second != 0 {
            return bin;
        }
        let out = remap(bin, self.count, DOUBLE_THRESHOLD_MODULUS);
        tracing::debug!(call = self.count, from = bin, to = out, "corrupt bin data");
        out
    }
}

fn remap(bin: i32, count: u64, modulus: i32) -> i32 {
    let shift = i32::try_from(count % u64::from(modulus.unsigned_abs())).unwrap_or(0);
    (bin.rem_euclid(modulus) + shift).rem_euclid(modulus)
}

/// Replaces every K-th query reply with a one-character degenerate reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryFault {
    every: Option<u64>,
    queries: u64,
}

impl QueryFault {
    pub const DEGENERATE_REPLY: &'static str = " ";

    pub fn new(every: Option<u64>) -> Self {
        Self {
            every: every.filter(|&k| k > 0),
            queries: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    pub fn queries(&self) -> u64 {
        self.queries
    }

    /// Counts one query and reports whether its reply must be degenerate.
    pub fn next_is_faulty(&mut self) -> bool {
        self.queries += 1;
        match self.every {
            Some(every) if self.queries % every == 0 => {
                tracing::debug!(query = self.queries, "sending degenerate query reply");
                true
            }
            _ => false,
        }
    }

    /// Passes `reply` through, or substitutes the degenerate reply on schedule.
    pub fn filter<'a>(&mut self, reply: &'a str) -> &'a str {
        if self.next_is_faulty() {
            Self::DEGENERATE_REPLY
        } else {
            reply
        }
    }
}
