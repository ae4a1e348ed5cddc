//! Boundary to the switch control plane.
//!
//! The controller talks to switches through two calls only: reading an
//! indexed port counter and installing a table entry. [`ControlPlane`] is
//! that boundary; transports implement it outside this crate.
//! [`InMemoryControlPlane`] keeps everything in memory and backs replays
//! and tests.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlPlaneError {
    #[error("Reading {counter}[{index}] on {switch} failed: {reason}")]
    CounterRead {
        switch: String,
        counter: String,
        index: u32,
        reason: String,
    },
    #[error("Installing into {table} on {switch} failed: {reason}")]
    Install {
        switch: String,
        table: String,
        reason: String,
    },
}

/// Cumulative packet and byte count of one counter cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterReading {
    pub packets: u64,
    pub bytes: u64,
}

/// A match-field or action-parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(u64),
    Bytes(Vec<u8>),
    Text(String),
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Int(v as u64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

/// An immutable table entry. Build a fresh one per install with
/// [`TableEntry::builder`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    table: String,
    match_fields: BTreeMap<String, FieldValue>,
    action: String,
    params: BTreeMap<String, FieldValue>,
    default_action: bool,
}

impl TableEntry {
    pub fn builder(table: &str, action: &str) -> TableEntryBuilder {
        TableEntryBuilder {
            entry: TableEntry {
                table: table.to_string(),
                match_fields: BTreeMap::new(),
                action: action.to_string(),
                params: BTreeMap::new(),
                default_action: false,
            },
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn match_fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.match_fields
    }

    pub fn params(&self) -> &BTreeMap<String, FieldValue> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&FieldValue> {
        self.params.get(name)
    }

    /// Whether this entry sets the table's default action instead of
    /// matching.
    pub fn is_default_action(&self) -> bool {
        self.default_action
    }
}

pub struct TableEntryBuilder {
    entry: TableEntry,
}

impl TableEntryBuilder {
    pub fn match_field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.entry.match_fields.insert(name.to_string(), value.into());
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.entry.params.insert(name.to_string(), value.into());
        self
    }

    pub fn default_action(mut self) -> Self {
        self.entry.default_action = true;
        self
    }

    pub fn build(self) -> TableEntry {
        self.entry
    }
}

/// Switch control-plane operations the controller depends on.
///
/// Both calls may block. There is no timeout: a stuck call stalls its
/// caller until it returns.
pub trait ControlPlane: Send + Sync {
    fn read_counter(
        &self,
        switch: &str,
        counter: &str,
        index: u32,
    ) -> Result<CounterReading, ControlPlaneError>;

    fn install_rule(&self, switch: &str, entry: &TableEntry) -> Result<(), ControlPlaneError>;
}

type CounterCell = (String, String, u32);

/// Control plane held entirely in memory.
///
/// Counters read as zero until set. Installs are recorded in order. Reads and
/// installs can be made to fail per counter cell or per switch.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    counters: Mutex<HashMap<CounterCell, CounterReading>>,
    failing_counters: Mutex<HashSet<CounterCell>>,
    failing_switches: Mutex<HashSet<String>>,
    installed: Mutex<Vec<(String, TableEntry)>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_counter(&self, switch: &str, counter: &str, index: u32, reading: CounterReading) {
        self.counters
            .lock()
            .insert((switch.to_string(), counter.to_string(), index), reading);
    }

    /// Add `bytes` to a counter cell, counting one packet.
    pub fn add_bytes(&self, switch: &str, counter: &str, index: u32, bytes: u64) {
        let mut counters = self.counters.lock();
        let cell = counters
            .entry((switch.to_string(), counter.to_string(), index))
            .or_default();
        cell.packets += 1;
        cell.bytes += bytes;
    }

    pub fn fail_counter(&self, switch: &str, counter: &str, index: u32) {
        self.failing_counters
            .lock()
            .insert((switch.to_string(), counter.to_string(), index));
    }

    pub fn restore_counter(&self, switch: &str, counter: &str, index: u32) {
        self.failing_counters
            .lock()
            .remove(&(switch.to_string(), counter.to_string(), index));
    }

    pub fn fail_installs_on(&self, switch: &str) {
        self.failing_switches.lock().insert(switch.to_string());
    }

    pub fn restore_installs(&self) {
        self.failing_switches.lock().clear();
    }

    /// Every successful install so far, in order.
    pub fn installed(&self) -> Vec<(String, TableEntry)> {
        self.installed.lock().clone()
    }

    /// Successful installs into one table, in order.
    pub fn installed_in(&self, table: &str) -> Vec<(String, TableEntry)> {
        self.installed
            .lock()
            .iter()
            .filter(|(_, e)| e.table() == table)
            .cloned()
            .collect()
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn read_counter(
        &self,
        switch: &str,
        counter: &str,
        index: u32,
    ) -> Result<CounterReading, ControlPlaneError> {
        let cell = (switch.to_string(), counter.to_string(), index);
        if self.failing_counters.lock().contains(&cell) {
            return Err(ControlPlaneError::CounterRead {
                switch: switch.to_string(),
                counter: counter.to_string(),
                index,
                reason: "injected read failure".to_string(),
            });
        }
        Ok(self.counters.lock().get(&cell).copied().unwrap_or_default())
    }

    fn install_rule(&self, switch: &str, entry: &TableEntry) -> Result<(), ControlPlaneError> {
        if self.failing_switches.lock().contains(switch) {
            return Err(ControlPlaneError::Install {
                switch: switch.to_string(),
                table: entry.table().to_string(),
                reason: "injected install failure".to_string(),
            });
        }
        self.installed
            .lock()
            .push((switch.to_string(), entry.clone()));
        Ok(())
    }
}
