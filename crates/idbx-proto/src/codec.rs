//! Byte framing for transports that only carry opaque bytes.
//!
//! Frames are JSON documents. The format is private to idbx; both ends are
//! always built from the same `idbx-proto`.

use idbx::Result;

use crate::messages::{ClientMessage, HostMessage};

pub fn encode_host(message: &HostMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode_host(bytes: &[u8]) -> Result<HostMessage> {
    Ok(serde_json::from_slice(bytes)?)
}

pub fn encode_client(message: &ClientMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode_client(bytes: &[u8]) -> Result<ClientMessage> {
    Ok(serde_json::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{CallbackId, CursorId, WorkerId};
    use crate::messages::{ClientEvent, CursorEntry, Ticket};
    use idbx_core::{BlobInfo, IdbKey, IdbValue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_prefetch_response_survives_framing() {
        let message = ClientMessage {
            worker: WorkerId(4),
            event: ClientEvent::SuccessCursorPrefetch {
                callbacks: CallbackId::from_raw(12),
                cursor: CursorId::from_raw(3),
                keys: vec![IdbKey::Number(1.0), IdbKey::Number(2.0)],
                primary_keys: vec![IdbKey::Number(1.0), IdbKey::Number(2.0)],
                values: vec![
                    Some(IdbValue::new(b"one".to_vec())),
                    Some(
                        IdbValue::new(b"two".to_vec())
                            .with_blobs(vec![BlobInfo::new("blob-1", "text/plain", 3)]),
                    ),
                ],
            },
        };

        let bytes = encode_client(&message).unwrap();
        assert_eq!(decode_client(&bytes).unwrap(), message);
    }

    #[test]
    fn test_continue_request_keeps_ticket() {
        let ticket = Ticket {
            worker: WorkerId::MAIN,
            callbacks: CallbackId::from_raw(1 << 32),
        };
        let message = HostMessage::CursorContinue {
            ticket,
            cursor: CursorId::from_raw(8),
            key: Some(IdbKey::String("k".into())),
            primary_key: None,
        };

        let decoded = decode_host(&encode_host(&message).unwrap()).unwrap();
        assert_eq!(decoded.ticket(), Some(ticket));
        assert_eq!(decoded, message);
    }

    #[test]
    fn test_garbage_is_a_serialization_error() {
        let err = decode_host(b"\x00\x01").unwrap_err();
        assert!(matches!(err, idbx::Error::Serialization(_)));
    }

    #[test]
    fn test_entry_without_value_is_key_only() {
        let entry = CursorEntry {
            key: IdbKey::Number(1.0),
            primary_key: IdbKey::Number(1.0),
            value: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"value\":null"));
    }
}
