//! Identifiers and mode enums shared by requests and backends.

use serde::{Deserialize, Serialize};

use crate::key::IdbKey;

pub type ObjectStoreId = i64;
pub type IndexId = i64;

/// Index id used by requests that address the object store itself.
pub const NO_INDEX: IndexId = -1;

/// Client-assigned transaction identifier. The dispatcher never allocates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub i64);

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CursorDirection {
    #[default]
    Next,
    NextNoDuplicate,
    Prev,
    PrevNoDuplicate,
}

impl CursorDirection {
    pub fn is_forward(&self) -> bool {
        matches!(self, CursorDirection::Next | CursorDirection::NextNoDuplicate)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PutMode {
    #[default]
    AddOrUpdate,
    AddOnly,
    CursorUpdate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    #[default]
    Normal,
    /// Index population; runs ahead of queued normal tasks.
    Preemptive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataLoss {
    #[default]
    None,
    Total,
}

/// Index entries computed by the client for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexKeys {
    pub index_id: IndexId,
    pub keys: Vec<IdbKey>,
}
