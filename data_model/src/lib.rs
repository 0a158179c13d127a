use std::fmt::Display;

use anyhow::{anyhow, Result};
use chrono::Utc;
use derive_builder::Builder;
use nanoid::nanoid;
use serde::{Deserialize, Serialize};

/// Epoch time in milliseconds, used for all creation timestamps.
pub fn get_epoch_time_in_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct DatasetId(String);

impl DatasetId {
    pub fn new(id: String) -> Self {
        Self(id)
    }

    pub fn generate() -> Self {
        Self(nanoid!())
    }

    pub fn get(&self) -> &str {
        &self.0
    }
}

impl Display for DatasetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identity of the caller as returned by the external identity provider.
/// Populated from verified claims only; never persisted by this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

/// Mutable profile document keyed by the owning user's id.
/// Writes merge into any existing document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    /// Avatar reference surfaced in listing enrichment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

/// Dataset metadata, immutable after creation. Document and JSON field
/// names are camelCase to match the catalog's wire format.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Builder)]
#[serde(rename_all = "camelCase")]
#[builder(build_fn(skip))]
pub struct DatasetRecord {
    pub id: DatasetId,
    pub filename: String,
    pub original_name: String,
    pub description: String,
    pub file_url: String,
    pub size: u64,
    pub user_id: String,
    pub created_at: u64,
}

impl DatasetRecordBuilder {
    pub fn build(&mut self) -> Result<DatasetRecord> {
        let filename = self.filename.clone().ok_or(anyhow!("filename is required"))?;
        let original_name = self
            .original_name
            .clone()
            .ok_or(anyhow!("original_name is required"))?;
        let file_url = self.file_url.clone().ok_or(anyhow!("file_url is required"))?;
        let size = self.size.ok_or(anyhow!("size is required"))?;
        let user_id = self.user_id.clone().ok_or(anyhow!("user_id is required"))?;
        let description = self.description.clone().unwrap_or_default();
        Ok(DatasetRecord {
            id: DatasetId::generate(),
            filename,
            original_name,
            description,
            file_url,
            size,
            user_id,
            created_at: get_epoch_time_in_ms(),
        })
    }
}

/// Denormalized snapshot of the owning user attached to listed records.
/// Best-effort: a missing profile degrades to null name/picture.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerSnapshot {
    pub id: String,
    pub name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedDatasetRecord {
    #[serde(flatten)]
    pub record: DatasetRecord,
    pub user: OwnerSnapshot,
}

/// Derives the storage filename for an upload: a second-resolution UTC
/// timestamp token, a random token to break same-second collisions, and
/// the client-supplied name.
pub fn derive_storage_filename(original_name: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    format!("{}_{}_{}", timestamp, nanoid!(8), original_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_record_builder_defaults() {
        let record = DatasetRecordBuilder::default()
            .filename("20240101_120000_abcd1234_report.csv".to_string())
            .original_name("report.csv".to_string())
            .file_url("file:///blobs/datasets/u1/report.csv".to_string())
            .size(1024)
            .user_id("u1".to_string())
            .build()
            .unwrap();
        assert_eq!(record.size, 1024);
        assert_eq!(record.original_name, "report.csv");
        assert_eq!(record.user_id, "u1");
        // description defaults to empty, never null
        assert_eq!(record.description, "");
        assert!(!record.id.get().is_empty());
        assert!(record.created_at > 0);
    }

    #[test]
    fn test_dataset_record_builder_missing_fields() {
        let result = DatasetRecordBuilder::default()
            .filename("f".to_string())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_storage_filename_shape() {
        let filename = derive_storage_filename("report.csv");
        assert!(filename.ends_with("_report.csv"));
        assert_ne!(filename, "report.csv");
        // timestamp token: YYYYMMDD_HHMMSS
        let (date, rest) = filename.split_once('_').unwrap();
        assert_eq!(date.len(), 8);
        assert!(date.chars().all(|c| c.is_ascii_digit()));
        let (time, _) = rest.split_once('_').unwrap();
        assert_eq!(time.len(), 6);
        assert!(time.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_storage_filename_distinct_for_same_original() {
        let a = derive_storage_filename("data.bin");
        let b = derive_storage_filename("data.bin");
        assert_ne!(a, b);
    }

    #[test]
    fn test_dataset_record_serde_field_names() {
        let record = DatasetRecordBuilder::default()
            .filename("f".to_string())
            .original_name("o".to_string())
            .file_url("u".to_string())
            .size(0)
            .user_id("u1".to_string())
            .build()
            .unwrap();
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("originalName").is_some());
        assert!(value.get("fileUrl").is_some());
        assert!(value.get("userId").is_some());
        assert!(value.get("createdAt").is_some());
    }
}
