//! Per-index metadata blob stored alongside the KV storage.
//!
//! The wire form is `message_version: u32le`, `payload_len: u32le`, then the
//! serialized payload. Readers reject any version other than the current
//! constant. Blobs written before surrogate storage keys existed simply
//! carry `None` there.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::auth::ActionSet;
use crate::error::StorageError;
use crate::table::{IndexDefinition, TableDefinition};

/// Current metadata message version.
pub const MESSAGE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageOptions {
    pub table: TableDefinition,
    pub index: IndexDefinition,
    pub authorized_actions: BTreeMap<String, ActionSet>,
    pub public_actions: ActionSet,
    pub storage_key: Option<String>,
}

pub fn serialize_storage_options(options: &StorageOptions) -> Result<Vec<u8>, StorageError> {
    let payload =
        bincode::serialize(options).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let payload_len =
        u32::try_from(payload.len()).map_err(|e| StorageError::Serialization(e.to_string()))?;
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(&MESSAGE_VERSION.to_le_bytes());
    out.extend_from_slice(&payload_len.to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

pub fn deserialize_storage_options(data: &[u8]) -> Result<StorageOptions, StorageError> {
    if data.len() < 8 {
        return Err(StorageError::MalformedOptions("header truncated".into()));
    }
    let version = u32::from_le_bytes(data[..4].try_into().expect("4 bytes"));
    if version != MESSAGE_VERSION {
        return Err(StorageError::UnsupportedMessageVersion(version));
    }
    let payload_len = u32::from_le_bytes(data[4..8].try_into().expect("4 bytes")) as usize;
    let Some(payload) = data.get(8..8 + payload_len) else {
        return Err(StorageError::MalformedOptions("payload truncated".into()));
    };
    bincode::deserialize(payload).map_err(|e| StorageError::MalformedOptions(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ActionKind;
    use crate::table::{ColumnDefinition, IndexKey, SortDirection};
    use sakaki_common::types::FieldType;

    fn sample() -> StorageOptions {
        let table = TableDefinition {
            name: "T".into(),
            columns: vec![
                ColumnDefinition::new("C0", FieldType::Int8, false),
                ColumnDefinition::new("C1", FieldType::Float8, true),
            ],
        };
        let index = IndexDefinition {
            name: "T".into(),
            table_name: "T".into(),
            keys: vec![IndexKey { column: 0, direction: SortDirection::Ascending }],
            values: vec![1],
            primary: true,
        };
        let mut authorized_actions = BTreeMap::new();
        authorized_actions.insert("alice".to_owned(), ActionSet::of(&[ActionKind::Select]));
        StorageOptions {
            table,
            index,
            authorized_actions,
            public_actions: ActionSet::of(&[ActionKind::Select]),
            storage_key: Some("__system_1".into()),
        }
    }

    #[test]
    fn round_trip() {
        let options = sample();
        let blob = serialize_storage_options(&options).unwrap();
        assert_eq!(&blob[..4], &MESSAGE_VERSION.to_le_bytes());
        let back = deserialize_storage_options(&blob).unwrap();
        assert_eq!(back, options);
    }

    #[test]
    fn missing_storage_key_round_trips() {
        let mut options = sample();
        options.storage_key = None;
        let blob = serialize_storage_options(&options).unwrap();
        assert_eq!(deserialize_storage_options(&blob).unwrap().storage_key, None);
    }

    #[test]
    fn foreign_version_is_rejected() {
        let options = sample();
        let mut blob = serialize_storage_options(&options).unwrap();
        blob[0] = 0xEE;
        assert!(matches!(
            deserialize_storage_options(&blob),
            Err(StorageError::UnsupportedMessageVersion(_))
        ));
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let options = sample();
        let blob = serialize_storage_options(&options).unwrap();
        assert!(matches!(
            deserialize_storage_options(&blob[..blob.len() - 1]),
            Err(StorageError::MalformedOptions(_))
        ));
        assert!(matches!(
            deserialize_storage_options(&blob[..6]),
            Err(StorageError::MalformedOptions(_))
        ));
    }
}
