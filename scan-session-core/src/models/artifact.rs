use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::device::OutputFormat;
use super::page::PageInfo;

/// Final encoded result of a finished session.
///
/// Read-only once built; the registry hands it out behind an `Arc`.
#[derive(Clone, PartialEq)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub pages: Vec<PageInfo>,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Suggested download name for this artifact.
    pub fn file_name(&self, session_id: &str) -> String {
        format!("scan_{}.{}", session_id, self.format.extension())
    }

    pub fn metadata(&self, session_id: &str, device_id: &str) -> ArtifactMetadata {
        ArtifactMetadata {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            device_id: device_id.to_string(),
            content_type: self.content_type().to_string(),
            size_bytes: self.bytes.len() as u64,
            checksum: self.checksum.clone(),
            created_at: self.created_at.to_rfc3339(),
            pages: self.pages.clone(),
        }
    }
}

impl std::fmt::Debug for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Artifact")
            .field("format", &self.format)
            .field("len", &self.bytes.len())
            .field("pages", &self.pages.len())
            .field("checksum", &self.checksum)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Metadata stored alongside a persisted artifact.
///
/// Serializable for the JSON sidecar and for the web layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub id: String,
    pub session_id: String,
    pub device_id: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub created_at: String,
    pub pages: Vec<PageInfo>,
}
