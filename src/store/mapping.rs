//! Internal id <-> bug id mapping shared by the five field indices of one
//! generation.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{BugId, BugReport, InternalId};
use crate::vector::ArtifactError;

/// File name of the mapping inside a version directory.
pub const MAPPING_FILE: &str = "mapping.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingEntry {
    pub bug_id: BugId,
    /// Kept here so ranking tie-breaks need no source lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_date: Option<DateTime<Utc>>,
}

/// Dense table where position `i` holds the report with `InternalId(i)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdMapping {
    entries: Vec<MappingEntry>,
    by_bug: HashMap<BugId, InternalId>,
}

impl IdMapping {
    /// Assigns internal ids in the order the reports are given.
    ///
    /// Later duplicates of a bug id are skipped.
    pub fn from_reports(reports: &[BugReport]) -> Self {
        let mut mapping = Self::default();
        for report in reports {
            mapping.push(MappingEntry {
                bug_id: report.bug_id.clone(),
                fix_date: report.fix_date,
            });
        }
        mapping
    }

    fn push(&mut self, entry: MappingEntry) -> Option<InternalId> {
        if self.by_bug.contains_key(&entry.bug_id) {
            return None;
        }
        let id = InternalId(self.entries.len() as u32);
        self.by_bug.insert(entry.bug_id.clone(), id);
        self.entries.push(entry);
        Some(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, id: InternalId) -> Option<&MappingEntry> {
        self.entries.get(id.as_index())
    }

    pub fn bug_id(&self, id: InternalId) -> Option<&BugId> {
        self.entry(id).map(|e| &e.bug_id)
    }

    pub fn internal_id(&self, bug_id: &BugId) -> Option<InternalId> {
        self.by_bug.get(bug_id).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = (InternalId, &MappingEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (InternalId(i as u32), e))
    }

    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        let json = serde_json::to_vec(&self.entries)
            .map_err(|e| ArtifactError::InvalidFormat(format!("Failed to serialize mapping: {e}")))?;
        fs::write(dir.join(MAPPING_FILE), json)?;
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let bytes = fs::read(dir.join(MAPPING_FILE))?;
        let entries: Vec<MappingEntry> = serde_json::from_slice(&bytes)
            .map_err(|e| ArtifactError::InvalidFormat(format!("Failed to parse mapping: {e}")))?;

        let mut mapping = Self::default();
        for entry in entries {
            let bug_id = entry.bug_id.clone();
            if mapping.push(entry).is_none() {
                return Err(ArtifactError::InvalidFormat(format!(
                    "bug_id '{bug_id}' appears twice in the mapping"
                )));
            }
        }
        Ok(mapping)
    }
}
