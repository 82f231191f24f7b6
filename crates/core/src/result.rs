//! Result records mirroring the task forest.
//!
//! Records live in an arena and refer to each other by index, so the tree
//! carries no parent back-pointers. Each record holds one execution slot per
//! device that ran it; roll-up combines slot statuses under the severity
//! scale, except for suites, whose rolled status is the combination of their
//! children so that one device's fixture failure does not taint a suite that
//! another device completed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::status::Status;

pub type RecordId = usize;

/// Arena shared between the tasker, the contexts and the sinks.
pub type SharedResults = Arc<Mutex<ResultArena>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordKind {
    Suite,
    Case,
    Step,
}

/// One core dump observed on a device. The (path, mtime, size) triple is
/// the identity used for de-duplication across tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoreDump {
    pub path: String,
    /// Modification timestamp exactly as the device reported it.
    pub mtime: String,
    pub size: u64,
}

/// Execution of one record on one device.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Slot {
    pub status: Status,
    pub started: Option<DateTime<Utc>>,
    pub elapsed: Option<Duration>,
    pub errors: Vec<String>,
    pub cores: Vec<CoreDump>,
}

impl Slot {
    /// True when this slot saw any execution at all.
    pub fn ran(&self) -> bool {
        self.status != Status::NoRun || self.started.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct Record {
    pub kind: RecordKind,
    pub name: String,
    /// Step function name, recorded for steps only.
    pub func: Option<String>,
    /// Step argument rendering, recorded for steps only.
    pub args: Option<String>,
    pub attrs: BTreeMap<String, String>,
    pub parent: Option<RecordId>,
    pub children: Vec<RecordId>,
    /// Per-device execution slots, keyed by device name.
    pub slots: BTreeMap<String, Slot>,
}

#[derive(Debug, Default, Serialize)]
pub struct ResultArena {
    records: Vec<Record>,
    roots: Vec<RecordId>,
}

impl ResultArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: RecordKind, name: impl Into<String>, parent: Option<RecordId>) -> RecordId {
        let id = self.records.len();
        self.records.push(Record {
            kind,
            name: name.into(),
            func: None,
            args: None,
            attrs: BTreeMap::new(),
            parent,
            children: Vec::new(),
            slots: BTreeMap::new(),
        });
        match parent {
            Some(parent) => {
                if let Some(record) = self.records.get_mut(parent) {
                    record.children.push(id);
                }
            }
            None => self.roots.push(id),
        }
        id
    }

    pub fn roots(&self) -> &[RecordId] {
        &self.roots
    }

    pub fn record(&self, id: RecordId) -> Option<&Record> {
        self.records.get(id)
    }

    pub fn record_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.records.get_mut(id)
    }

    /// The slot of `device` on `id`, created on first touch.
    pub fn slot_mut(&mut self, id: RecordId, device: &str) -> Option<&mut Slot> {
        self.records
            .get_mut(id)
            .map(|record| record.slots.entry(device.to_string()).or_default())
    }

    /// First record with the given name, depth-first.
    pub fn find(&self, name: &str) -> Option<RecordId> {
        self.records.iter().position(|r| r.name == name)
    }

    /// Rolled-up status: suites combine their children; cases and steps
    /// combine their own slots. `NoRun` only when nothing underneath ran.
    pub fn rolled_status(&self, id: RecordId) -> Status {
        let Some(record) = self.record(id) else {
            return Status::NoRun;
        };
        match record.kind {
            RecordKind::Suite => record
                .children
                .iter()
                .fold(Status::NoRun, |acc, &child| acc.combine(self.rolled_status(child))),
            RecordKind::Case | RecordKind::Step => record
                .slots
                .values()
                .fold(Status::NoRun, |acc, slot| acc.combine(slot.status)),
        }
    }
}

/// Stamps an error text and its status onto one slot.
pub fn record_error(results: &SharedResults, id: RecordId, device: &str, text: String, status: Status) {
    let mut arena = results.lock();
    if let Some(slot) = arena.slot_mut(id, device) {
        slot.errors.push(text);
        slot.status = slot.status.combine(status);
    }
}

/// Combines `status` into one slot without touching its errors.
pub fn mark_status(results: &SharedResults, id: RecordId, device: &str, status: Status) {
    let mut arena = results.lock();
    if let Some(slot) = arena.slot_mut(id, device) {
        slot.status = slot.status.combine(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arena_with_suite() -> (ResultArena, RecordId, RecordId, RecordId) {
        let mut arena = ResultArena::new();
        let suite = arena.add(RecordKind::Suite, "suite", None);
        let case1 = arena.add(RecordKind::Case, "case1", Some(suite));
        let case2 = arena.add(RecordKind::Case, "case2", Some(suite));
        (arena, suite, case1, case2)
    }

    #[test]
    fn slots_are_created_on_first_touch() {
        let (mut arena, _, case1, _) = arena_with_suite();
        arena.slot_mut(case1, "dev-a").unwrap().status = Status::Passed;
        assert_eq!(arena.record(case1).unwrap().slots["dev-a"].status, Status::Passed);
    }

    #[test]
    fn case_rolls_up_the_strongest_slot() {
        let (mut arena, _, case1, _) = arena_with_suite();
        arena.slot_mut(case1, "dev-a").unwrap().status = Status::Passed;
        arena.slot_mut(case1, "dev-b").unwrap().status = Status::Failed;
        assert_eq!(arena.rolled_status(case1), Status::Failed);
    }

    #[test]
    fn suite_rolls_up_children_not_own_slots() {
        let (mut arena, suite, case1, case2) = arena_with_suite();
        arena.slot_mut(case1, "dev-b").unwrap().status = Status::Passed;
        arena.slot_mut(case2, "dev-b").unwrap().status = Status::Passed;
        // A fixture failure on one device stays on the suite slot.
        arena.slot_mut(suite, "dev-a").unwrap().status = Status::Failed;
        assert_eq!(arena.rolled_status(suite), Status::Passed);
        assert_eq!(arena.record(suite).unwrap().slots["dev-a"].status, Status::Failed);
    }

    #[test]
    fn nothing_ran_is_no_run() {
        let (arena, suite, case1, _) = arena_with_suite();
        assert_eq!(arena.rolled_status(suite), Status::NoRun);
        assert_eq!(arena.rolled_status(case1), Status::NoRun);
    }
}
