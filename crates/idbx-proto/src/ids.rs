//! Opaque identifiers carried on the wire.

use std::fmt;

use idbx_core::SlotKey;
use serde::{Deserialize, Serialize};

macro_rules! slot_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }

            pub fn slot(&self) -> SlotKey {
                SlotKey::from_raw(self.0)
            }
        }

        impl From<SlotKey> for $name {
            fn from(key: SlotKey) -> Self {
                Self(key.to_raw())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let slot = self.slot();
                write!(f, "{}#{}.{}", $label, slot.index(), slot.generation())
            }
        }
    };
}

slot_id!(
    /// Correlates one outbound request with its inbound response(s).
    CallbackId,
    "cb"
);

slot_id!(
    /// Names the per-connection event sink (forced close, version change,
    /// transaction abort/complete, observer changes).
    DatabaseCallbacksId,
    "dbcb"
);

slot_id!(
    /// Server-side database connection.
    DatabaseId,
    "db"
);

slot_id!(
    /// Server-side cursor.
    CursorId,
    "cursor"
);

impl CursorId {
    /// Sentinel for cursors that were never backed by a server cursor.
    pub const INVALID: CursorId = CursorId(u64::MAX);

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

/// Logical thread identity of a client context. `WorkerId::MAIN` is the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub const MAIN: WorkerId = WorkerId(0);

    pub fn is_main(&self) -> bool {
        *self == Self::MAIN
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            f.write_str("main")
        } else {
            write!(f, "worker#{}", self.0)
        }
    }
}

/// Client-assigned observer identifier, unique per dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObserverId(pub i32);
