//! WorkStore - generic persistent record storage over SQLite
//!
//! WorkStore persists heterogeneous record types in a single SQLite database.
//! Records serialize to JSON; each type declares a collection name and the
//! fields it wants indexed for equality queries. The store assigns integer
//! ids, stamps row timestamps, and guards every update with an optimistic
//! version check so concurrent writers are serialized deterministically.
//!
//! # Core Concepts
//!
//! - **Records are JSON**: any `Serialize + Deserialize` type can be stored
//! - **Declared indexes**: `Record::indexed_fields` drives equality queries
//! - **Versioned writes**: stale updates fail with `StoreError::Conflict`
//! - **Soft delete**: lookups exclude deleted rows by default
//! - **Checkpoint streams**: append-only numbered snapshots per session

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

mod error;
mod store;

pub use error::StoreError;
pub use store::{Checkpoint, Filter, Row, Store, Txn};

/// A value that can appear in the field index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Canonical text form used by the index table
    pub fn canonical(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Int(i) => i.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl std::fmt::Display for IndexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<&str> for IndexValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for IndexValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for IndexValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// A storable record type
pub trait Record: Serialize + DeserializeOwned {
    /// Name of the collection this type is stored under
    fn collection_name() -> &'static str;

    /// Fields to index for equality queries
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
