//! Record Store
//!
//! Authoritative, deduplicated collection of records for one recovery run,
//! keyed by sequence number.

use std::collections::btree_map::{BTreeMap, Entry};
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use super::wire::Record;

/// What to do when a sequence number arrives twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Latest arrival replaces the stored record
    #[default]
    LastWriteWins,
    /// First arrival is kept, later ones are dropped
    FirstWriteWins,
}

/// Result of a single insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Sequence was not present before
    New,
    /// Same sequence, identical payload
    Duplicate,
    /// Same sequence, different payload
    Divergent,
    /// Sequence < 1, never stored
    Rejected,
}

/// Inclusive run of consecutive sequence numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SeqRange {
    pub from: i32,
    pub to: i32,
}

impl SeqRange {
    pub fn new(from: i32, to: i32) -> Self {
        Self { from, to }
    }

    pub fn single(seq: i32) -> Self {
        Self { from: seq, to: seq }
    }

    /// Number of sequences covered
    pub fn len(&self) -> u64 {
        (self.to as i64 - self.from as i64 + 1).max(0) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }

    pub fn iter(&self) -> RangeInclusive<i32> {
        self.from..=self.to
    }
}

#[derive(Debug, Default)]
pub struct RecordStore {
    records: BTreeMap<i32, Record>,
    highest_seen: i32,
    policy: DuplicatePolicy,
}

impl RecordStore {
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            records: BTreeMap::new(),
            highest_seen: 0,
            policy,
        }
    }

    /// Upsert by sequence and advance the running maximum.
    pub fn insert(&mut self, record: Record) -> InsertOutcome {
        let seq = record.sequence;
        if seq < 1 {
            return InsertOutcome::Rejected;
        }
        if seq > self.highest_seen {
            self.highest_seen = seq;
        }

        match self.records.entry(seq) {
            Entry::Vacant(slot) => {
                slot.insert(record);
                InsertOutcome::New
            }
            Entry::Occupied(slot) if *slot.get() == record => InsertOutcome::Duplicate,
            Entry::Occupied(mut slot) => {
                if self.policy == DuplicatePolicy::LastWriteWins {
                    slot.insert(record);
                }
                InsertOutcome::Divergent
            }
        }
    }

    /// Ascending sequence numbers in `[1, n]` with no stored record
    pub fn missing_up_to(&self, n: i32) -> Vec<i32> {
        self.gaps_up_to(n).iter().flat_map(SeqRange::iter).collect()
    }

    /// Same set as [`Self::missing_up_to`], as ascending runs.
    ///
    /// Walks stored keys only, so the cost is bounded by the number of
    /// records rather than by `n`.
    pub fn gaps_up_to(&self, n: i32) -> Vec<SeqRange> {
        let mut gaps = Vec::new();
        if n < 1 {
            return gaps;
        }

        // i64 so the successor of i32::MAX does not wrap
        let mut next: i64 = 1;
        for &seq in self.records.range(1..=n).map(|(seq, _)| seq) {
            if seq as i64 > next {
                gaps.push(SeqRange::new(next as i32, seq - 1));
            }
            next = seq as i64 + 1;
        }
        if next <= n as i64 {
            gaps.push(SeqRange::new(next as i32, n));
        }
        gaps
    }

    /// All records ordered by sequence
    pub fn snapshot_sorted(&self) -> Vec<Record> {
        self.records.values().cloned().collect()
    }

    /// Highest sequence ever inserted (0 when empty)
    pub fn highest_sequence_seen(&self) -> i32 {
        self.highest_seen
    }

    pub fn contains(&self, seq: i32) -> bool {
        self.records.contains_key(&seq)
    }

    pub fn get(&self, seq: i32) -> Option<&Record> {
        self.records.get(&seq)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
