//! Serialized values and the blob handles they carry.

use serde::{Deserialize, Serialize};

use crate::key::IdbKey;
use crate::metadata::KeyPath;

/// A large object referenced by a value. The server keeps the blob alive until
/// the client acknowledges receipt of its `uuid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub uuid: String,
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl BlobInfo {
    pub fn new(uuid: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            uuid: uuid.into(),
            mime_type: mime_type.into(),
            size,
            file_name: None,
        }
    }
}

/// A structured-clone serialized value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdbValue {
    pub bits: Vec<u8>,
    #[serde(default)]
    pub blobs: Vec<BlobInfo>,
}

impl IdbValue {
    pub fn new(bits: impl Into<Vec<u8>>) -> Self {
        Self {
            bits: bits.into(),
            blobs: Vec::new(),
        }
    }

    pub fn with_blobs(mut self, blobs: Vec<BlobInfo>) -> Self {
        self.blobs = blobs;
        self
    }

    /// Size of the serialized bits in bytes.
    pub fn size(&self) -> usize {
        self.bits.len()
    }

    pub fn blob_uuids(&self) -> impl Iterator<Item = &str> {
        self.blobs.iter().map(|b| b.uuid.as_str())
    }
}

/// A value returned from a read, with the generated primary key to inject when
/// the object store uses a key generator with an in-line key path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValue {
    pub value: IdbValue,
    #[serde(default)]
    pub primary_key: Option<IdbKey>,
    #[serde(default)]
    pub key_path: Option<KeyPath>,
}

impl From<IdbValue> for ReturnValue {
    fn from(value: IdbValue) -> Self {
        Self {
            value,
            primary_key: None,
            key_path: None,
        }
    }
}
