//! Observer registration options and change batches.

use std::collections::BTreeMap;

use idbx_core::{IdbValue, KeyRange, ObjectStoreId};
use serde::{Deserialize, Serialize};

use crate::ids::ObserverId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Add,
    Put,
    Delete,
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverOptions {
    pub include_transaction: bool,
    pub no_records: bool,
    pub values: bool,
    pub operation_types: Vec<OperationType>,
}

impl Default for ObserverOptions {
    fn default() -> Self {
        Self {
            include_transaction: false,
            no_records: false,
            values: false,
            operation_types: vec![
                OperationType::Add,
                OperationType::Put,
                OperationType::Delete,
                OperationType::Clear,
            ],
        }
    }
}

impl ObserverOptions {
    pub fn records(&self, kind: OperationType) -> bool {
        self.operation_types.contains(&kind)
    }
}

/// One recorded change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    pub object_store_id: ObjectStoreId,
    pub kind: OperationType,
    /// `None` for `Clear`.
    pub key_range: Option<KeyRange>,
    pub value: Option<IdbValue>,
}

/// A batch of observations for one connection; each observer's interest is
/// expressed as indexes into `observations`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObserverChanges {
    pub observation_index_map: BTreeMap<ObserverId, Vec<usize>>,
    pub observations: Vec<Observation>,
}

impl ObserverChanges {
    /// The observations one observer is interested in, in batch order.
    pub fn for_observer(&self, observer: ObserverId) -> Vec<Observation> {
        self.observation_index_map
            .get(&observer)
            .map(|indexes| {
                indexes
                    .iter()
                    .filter_map(|&i| self.observations.get(i).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }
}
