// src/modules/consumer.rs
use log::{debug, warn};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::RwLock;

/// Receives newly available content, either from the cache at startup or from a fetch.
pub trait DataConsumer: Send + Sync {
    /// Returns `false` when the content must not become the new good state.
    fn on_data(&self, data: &[u8]) -> bool;
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedDocument {
    pub digest: String,
    pub document: Value,
}

/// Keeps the latest payload that parses as a JSON object.
#[derive(Debug, Default)]
pub struct JsonDocumentConsumer {
    current: RwLock<Option<AcceptedDocument>>,
}

impl JsonDocumentConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<AcceptedDocument> {
        self.current.read().ok().and_then(|guard| guard.clone())
    }
}

impl DataConsumer for JsonDocumentConsumer {
    fn on_data(&self, data: &[u8]) -> bool {
        let document: Value = match serde_json::from_slice(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("Rejecting payload of {} bytes: {}", data.len(), e);
                return false;
            }
        };
        if !document.is_object() {
            warn!("Rejecting payload: top-level JSON value is not an object");
            return false;
        }

        let digest = hex::encode(Sha256::digest(data));
        debug!("Accepted JSON document sha256={}", digest);
        match self.current.write() {
            Ok(mut guard) => {
                *guard = Some(AcceptedDocument { digest, document });
                true
            }
            Err(_) => {
                warn!("Document lock poisoned; rejecting payload");
                false
            }
        }
    }
}
