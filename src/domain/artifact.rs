//! Persisted round artifacts.
//!
//! An artifact is the validated output of one round for one run, keyed by
//! `(pipeline_id, round)`. Writing the same key again replaces it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::round::RoundId;

/// The validated output of one round, as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundArtifact {
    /// Run that produced this artifact
    pub pipeline_id: Uuid,

    /// Round that produced this artifact
    pub round: RoundId,

    /// Round-specific validated payload
    pub payload: serde_json::Value,

    /// When the artifact was written
    pub persisted_at: DateTime<Utc>,

    /// First 16 hex chars of the SHA-256 of the payload JSON
    pub checksum: String,
}

impl RoundArtifact {
    /// Create an artifact stamped with the current time
    pub fn new(pipeline_id: Uuid, round: RoundId, payload: serde_json::Value) -> Self {
        let checksum = payload_checksum(&payload);
        Self {
            pipeline_id,
            round,
            payload,
            persisted_at: Utc::now(),
            checksum,
        }
    }

    /// Receipt describing where this artifact was written
    pub fn receipt(&self, location: impl Into<String>) -> StoreReceipt {
        StoreReceipt {
            pipeline_id: self.pipeline_id,
            round: self.round,
            persisted_at: self.persisted_at,
            checksum: self.checksum.clone(),
            location: location.into(),
        }
    }
}

/// Acknowledgement of a successful `put`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReceipt {
    pub pipeline_id: Uuid,
    pub round: RoundId,
    pub persisted_at: DateTime<Utc>,
    pub checksum: String,

    /// Backend-specific location (file path, "memory://..." etc.)
    pub location: String,
}

/// Hash a payload (first 16 chars of SHA256 over its JSON text)
pub fn payload_checksum(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
