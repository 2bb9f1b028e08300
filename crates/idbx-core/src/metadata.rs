//! Database, object store and index metadata.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{IndexId, ObjectStoreId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyPath {
    String(String),
    Sequence(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub id: IndexId,
    pub name: String,
    pub key_path: KeyPath,
    pub unique: bool,
    pub multi_entry: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStoreMetadata {
    pub id: ObjectStoreId,
    pub name: String,
    pub key_path: Option<KeyPath>,
    pub auto_increment: bool,
    pub indexes: BTreeMap<IndexId, IndexMetadata>,
    pub max_index_id: IndexId,
}

impl ObjectStoreMetadata {
    pub fn new(
        id: ObjectStoreId,
        name: impl Into<String>,
        key_path: Option<KeyPath>,
        auto_increment: bool,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            key_path,
            auto_increment,
            indexes: BTreeMap::new(),
            max_index_id: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    pub version: i64,
    pub max_object_store_id: ObjectStoreId,
    pub object_stores: BTreeMap<ObjectStoreId, ObjectStoreMetadata>,
}

impl DatabaseMetadata {
    /// Version of a database that has never been opened.
    pub const NO_VERSION: i64 = 0;

    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Self::NO_VERSION,
            max_object_store_id: 0,
            object_stores: BTreeMap::new(),
        }
    }
}
