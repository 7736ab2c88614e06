//! JSON file persistence for [`MemorySource`].

use std::{collections::HashMap, path::Path, sync::atomic::AtomicBool};

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use super::{EntityLog, MemorySource};
use crate::{Error, Result, operation::Operation, source::SourceError};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

fn is_v0(v: &u8) -> bool {
    *v == 0
}

fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

/// On-disk layout: operations grouped by `type$id`.
#[derive(Serialize, Deserialize)]
struct SerializableSource {
    #[serde(
        rename = "_v",
        default,
        skip_serializing_if = "is_v0",
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    #[serde(default)]
    entities: HashMap<String, Vec<Operation>>,
}

pub(super) async fn save_to_file<P: AsRef<Path>>(source: &MemorySource, path: P) -> Result<()> {
    let entities = source
        .entities
        .read()
        .await
        .iter()
        .map(|(key, log)| (key.clone(), log.operations.clone()))
        .collect();

    let serializable = SerializableSource {
        version: PERSISTENCE_VERSION,
        entities,
    };

    let json = serde_json::to_string_pretty(&serializable)
        .map_err(|e| -> Error { SourceError::SerializationFailed { source: e }.into() })?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| -> Error { SourceError::FileIo { source: e }.into() })
}

pub(super) async fn load_from_file<P: AsRef<Path>>(name: String, path: P) -> Result<MemorySource> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let serializable: SerializableSource = serde_json::from_str(&json).map_err(|e| -> Error {
                SourceError::DeserializationFailed { source: e }.into()
            })?;
            let entities = serializable
                .entities
                .into_iter()
                .map(|(key, operations)| (key, EntityLog::from_operations(operations)))
                .collect();
            Ok(MemorySource {
                name,
                open: AtomicBool::new(false),
                entities: RwLock::new(entities),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(MemorySource::new(name)),
        Err(e) => Err(SourceError::FileIo { source: e }.into()),
    }
}
