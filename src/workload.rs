//! Workload record/replay - a market-data-replay-style facility adapted to
//! this domain. A `Recorder` turns a sequence of
//! `allocate`/`free`/`realloc` calls into a flat, timestamped CSV log; `replay`
//! drives an arena back through that log deterministically.
//!
//! Allocations are identified by an opaque id assigned at record time (not by
//! the pointer itself, which isn't stable across a process boundary); `free`
//! and `realloc` records reference that id.

use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Write};
use std::ptr::NonNull;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::arena::{AllocError, HeapArena};
use crate::page::PageSupplier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Allocate,
    Free,
    Realloc,
}

/// One logged operation. `size` is populated for `Allocate`/`Realloc` and
/// empty for `Free`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub timestamp: DateTime<Utc>,
    pub op: OpKind,
    pub id: u64,
    pub size: Option<usize>,
}

/// Accumulates `Record`s as the caller drives an arena, assigning each
/// allocation a fresh id.
#[derive(Default)]
pub struct Recorder {
    records: Vec<Record>,
    next_id: u64,
}

impl Recorder {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            next_id: 0,
        }
    }

    /// Logs an allocation of `size` bytes and returns the id to reference it
    /// by in later `record_free`/`record_realloc` calls.
    pub fn record_allocate(&mut self, size: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.records.push(Record {
            timestamp: Utc::now(),
            op: OpKind::Allocate,
            id,
            size: Some(size),
        });
        id
    }

    pub fn record_free(&mut self, id: u64) {
        self.records.push(Record {
            timestamp: Utc::now(),
            op: OpKind::Free,
            id,
            size: None,
        });
    }

    pub fn record_realloc(&mut self, id: u64, new_size: usize) {
        self.records.push(Record {
            timestamp: Utc::now(),
            op: OpKind::Realloc,
            id,
            size: Some(new_size),
        });
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// Writes `records` as CSV to `writer`.
pub fn write_csv<W: Write>(records: &[Record], writer: W) -> csv::Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Reads a sequence of `Record`s previously written by `write_csv`.
pub fn read_csv<R: Read>(reader: R) -> csv::Result<Vec<Record>> {
    let mut rdr = csv::Reader::from_reader(reader);
    rdr.deserialize().collect()
}

#[derive(Debug)]
pub enum ReplayError {
    /// An `Allocate`/`Realloc` record was missing its `size` field.
    MissingSize(u64),
    /// A `Free`/`Realloc` record referenced an id with no live allocation.
    UnknownId(u64),
    Alloc(AllocError),
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplayError::MissingSize(id) => write!(f, "record {} is missing a size", id),
            ReplayError::UnknownId(id) => write!(f, "record references unknown allocation id {}", id),
            ReplayError::Alloc(e) => write!(f, "allocation failed during replay: {}", e),
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReplayError::Alloc(e) => Some(e),
            _ => None,
        }
    }
}

/// Replays `records` against `arena`, reconstructing the id -> live-pointer
/// mapping as it goes.
pub fn replay<S: PageSupplier>(
    arena: &mut HeapArena<S>,
    records: &[Record],
) -> Result<(), ReplayError> {
    let mut live: HashMap<u64, NonNull<u8>> = HashMap::new();
    for record in records {
        match record.op {
            OpKind::Allocate => {
                let size = record.size.ok_or(ReplayError::MissingSize(record.id))?;
                let ptr = arena.allocate(size).map_err(ReplayError::Alloc)?;
                live.insert(record.id, ptr);
            }
            OpKind::Free => {
                let ptr = live
                    .remove(&record.id)
                    .ok_or(ReplayError::UnknownId(record.id))?;
                arena.free(ptr);
            }
            OpKind::Realloc => {
                let size = record.size.ok_or(ReplayError::MissingSize(record.id))?;
                let ptr = live
                    .remove(&record.id)
                    .ok_or(ReplayError::UnknownId(record.id))?;
                let new_ptr = arena.realloc(ptr, size).map_err(ReplayError::Alloc)?;
                live.insert(record.id, new_ptr);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::DEFAULT_NORMAL_ALLOCATION_SIZE;

    #[test]
    fn csv_round_trip_preserves_records() {
        let mut recorder = Recorder::new();
        let a = recorder.record_allocate(64);
        let b = recorder.record_allocate(128);
        recorder.record_realloc(a, 256);
        recorder.record_free(b);

        let mut buf = Vec::new();
        write_csv(recorder.records(), &mut buf).unwrap();

        let read_back = read_csv(&buf[..]).unwrap();
        assert_eq!(read_back.len(), 4);
        assert_eq!(read_back[0].op, OpKind::Allocate);
        assert_eq!(read_back[2].op, OpKind::Realloc);
        assert_eq!(read_back[3].op, OpKind::Free);
    }

    #[test]
    fn replay_reproduces_allocation_pattern() {
        let mut recorder = Recorder::new();
        let a = recorder.record_allocate(64);
        let b = recorder.record_allocate(64);
        recorder.record_free(a);
        recorder.record_realloc(b, 512);

        let mut arena = HeapArena::default();
        replay(&mut arena, recorder.records()).unwrap();
        arena.check_invariants().unwrap();
        assert!(arena.used_bytes() > 0);
    }

    #[test]
    fn replay_rejects_unknown_id() {
        let records = vec![Record {
            timestamp: Utc::now(),
            op: OpKind::Free,
            id: 999,
            size: None,
        }];
        let mut arena = HeapArena::new(DEFAULT_NORMAL_ALLOCATION_SIZE);
        let err = replay(&mut arena, &records).unwrap_err();
        assert!(matches!(err, ReplayError::UnknownId(999)));
    }
}
