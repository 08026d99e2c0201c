//! Manifest describing one persisted index version.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::types::{FieldKind, IndexVersion};
use crate::vector::{ARTIFACT_VERSION, ArtifactError};

/// File name of the manifest inside a version directory.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    /// Artifact format the field indices were written with
    pub format_version: u32,
    pub version: IndexVersion,
    pub created_at: DateTime<Utc>,
    pub report_count: usize,
    pub dimension: usize,
    /// Embedder that produced the vectors
    pub model_id: String,
    /// Non-empty entries per field index
    pub field_counts: BTreeMap<FieldKind, usize>,
}

impl StoreManifest {
    pub fn new(
        version: IndexVersion,
        report_count: usize,
        dimension: usize,
        model_id: String,
        field_counts: BTreeMap<FieldKind, usize>,
    ) -> Self {
        Self {
            format_version: ARTIFACT_VERSION,
            version,
            created_at: Utc::now(),
            report_count,
            dimension,
            model_id,
            field_counts,
        }
    }

    /// Writes the manifest through a temp file renamed into place, so a
    /// crash never leaves a half-written manifest behind.
    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ArtifactError::InvalidFormat(format!("Failed to serialize manifest: {e}")))?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(dir.join(MANIFEST_FILE))
            .map_err(|e| ArtifactError::Io(e.error))?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let json = fs::read_to_string(dir.join(MANIFEST_FILE))?;
        serde_json::from_str(&json)
            .map_err(|e| ArtifactError::InvalidFormat(format!("Failed to parse manifest: {e}")))
    }

    /// Whether a manifest file exists in `dir`.
    pub fn exists(dir: &Path) -> bool {
        dir.join(MANIFEST_FILE).is_file()
    }
}
