//! One immutable generation of the five field indices plus their mapping.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;

use rayon::prelude::*;

use crate::embedding::{Embedder, field_text};
use crate::error::{SearchError, SearchResult};
use crate::types::{BugReport, FieldKind, IndexVersion, InternalId};
use crate::vector::{
    ARTIFACT_VERSION, ArtifactError, FieldIndex, IndexParams, read_index, write_index,
};

use super::manifest::StoreManifest;
use super::mapping::IdMapping;

/// Texts per embedder call during a build.
const EMBED_BATCH_SIZE: usize = 64;

/// Outcome of building one field index.
struct FieldBuild {
    index: FieldIndex,
    skipped: usize,
}

/// A complete, finalized index version.
///
/// Never mutated after construction; readers share it through an `Arc`.
#[derive(Debug)]
pub struct IndexGeneration {
    indices: Vec<FieldIndex>,
    mapping: IdMapping,
    manifest: StoreManifest,
    /// Field texts that could not be embedded during the build
    skipped: usize,
}

impl IndexGeneration {
    /// Embeds every field of every report and builds fresh indices.
    ///
    /// Field texts the embedder rejects are skipped with a warning. A field
    /// where every text fails aborts the build, since that points at an
    /// unusable embedder rather than odd input.
    #[tracing::instrument(skip_all, fields(version = %version, reports = reports.len()))]
    pub fn build(
        version: IndexVersion,
        reports: &[BugReport],
        embedder: &dyn Embedder,
        params: IndexParams,
    ) -> SearchResult<Self> {
        let started = Instant::now();
        let mapping = IdMapping::from_reports(reports);
        let dimension = embedder.dimension();

        // Reports in mapping order, later duplicates dropped
        let mut seen = HashSet::new();
        let ordered: Vec<&BugReport> = reports.iter().filter(|r| seen.insert(&r.bug_id)).collect();

        let builds = FieldKind::ALL
            .par_iter()
            .map(|&field| build_field(field, &ordered, &mapping, embedder, params))
            .collect::<SearchResult<Vec<FieldBuild>>>()?;

        let skipped = builds.iter().map(|b| b.skipped).sum();
        let indices: Vec<FieldIndex> = builds.into_iter().map(|b| b.index).collect();
        let field_counts: BTreeMap<FieldKind, usize> =
            indices.iter().map(|i| (i.field(), i.len())).collect();

        let manifest = StoreManifest::new(
            version,
            mapping.len(),
            dimension.get(),
            embedder.model_id(),
            field_counts,
        );

        tracing::info!(
            reports = mapping.len(),
            skipped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built index generation"
        );

        Ok(Self {
            indices,
            mapping,
            manifest,
            skipped,
        })
    }

    pub fn version(&self) -> IndexVersion {
        self.manifest.version
    }

    pub fn index(&self, field: FieldKind) -> &FieldIndex {
        &self.indices[field.index()]
    }

    pub fn mapping(&self) -> &IdMapping {
        &self.mapping
    }

    pub fn manifest(&self) -> &StoreManifest {
        &self.manifest
    }

    pub fn report_count(&self) -> usize {
        self.mapping.len()
    }

    pub fn skipped_fields(&self) -> usize {
        self.skipped
    }

    /// Writes artifacts, mapping and finally the manifest into `dir`.
    ///
    /// A directory without a manifest is never treated as a usable version.
    pub fn persist(&self, dir: &Path) -> Result<(), ArtifactError> {
        std::fs::create_dir_all(dir)?;
        for index in &self.indices {
            write_index(&dir.join(index.field().artifact_name()), index)?;
        }
        self.mapping.save(dir)?;
        self.manifest.save(dir)?;
        Ok(())
    }

    /// Loads a persisted version and checks it is internally consistent.
    pub fn load(dir: &Path, params: IndexParams) -> Result<Self, ArtifactError> {
        let manifest = StoreManifest::load(dir)?;
        if manifest.format_version != ARTIFACT_VERSION {
            return Err(ArtifactError::InvalidFormat(format!(
                "manifest format {} is not supported (expected {ARTIFACT_VERSION})",
                manifest.format_version
            )));
        }

        let mapping = IdMapping::load(dir)?;
        if mapping.len() != manifest.report_count {
            return Err(ArtifactError::InvalidFormat(format!(
                "mapping holds {} reports, manifest says {}",
                mapping.len(),
                manifest.report_count
            )));
        }

        let mut indices = Vec::with_capacity(FieldKind::ALL.len());
        for field in FieldKind::ALL {
            let index = read_index(&dir.join(field.artifact_name()), field, params)?;
            verify_field(&index, &manifest, &mapping)?;
            indices.push(index);
        }

        Ok(Self {
            indices,
            mapping,
            manifest,
            skipped: 0,
        })
    }
}

fn build_field(
    field: FieldKind,
    reports: &[&BugReport],
    mapping: &IdMapping,
    embedder: &dyn Embedder,
    params: IndexParams,
) -> SearchResult<FieldBuild> {
    let mut index = FieldIndex::new(field, embedder.dimension(), params);

    let texts: Vec<(InternalId, String)> = reports
        .iter()
        .filter_map(|report| {
            let id = mapping.internal_id(&report.bug_id)?;
            let text = field_text(report, field);
            (!text.is_empty()).then_some((id, text))
        })
        .collect();

    let mut skipped = 0;
    let mut last_error = None;
    for chunk in texts.chunks(EMBED_BATCH_SIZE) {
        let batch: Vec<&str> = chunk.iter().map(|(_, t)| t.as_str()).collect();
        let vectors: Vec<Option<Vec<f32>>> = match embedder.embed_batch(&batch, field) {
            Ok(vectors) if vectors.len() == batch.len() => vectors.into_iter().map(Some).collect(),
            // Retry one by one so a single bad text does not sink the batch
            _ => chunk
                .iter()
                .map(|(id, text)| match embedder.embed(text, field) {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        tracing::warn!(field = %field, internal_id = %id, error = %e, "skipping field text that failed to embed");
                        last_error = Some(e.to_string());
                        None
                    }
                })
                .collect(),
        };

        for ((id, _), vector) in chunk.iter().zip(vectors) {
            match vector {
                Some(vector) => index.insert(&vector, *id)?,
                None => skipped += 1,
            }
        }
    }

    if !texts.is_empty() && index.is_empty() {
        return Err(SearchError::Vectorization {
            reason: format!(
                "no {field} text could be embedded: {}",
                last_error.unwrap_or_else(|| "unknown error".to_string())
            ),
        });
    }

    index.finalize()?;
    tracing::debug!(field = %field, entries = index.len(), skipped, "field index finalized");
    Ok(FieldBuild { index, skipped })
}

fn verify_field(
    index: &FieldIndex,
    manifest: &StoreManifest,
    mapping: &IdMapping,
) -> Result<(), ArtifactError> {
    let field = index.field();
    if index.dimension().get() != manifest.dimension {
        return Err(ArtifactError::InvalidFormat(format!(
            "{field} index has dimension {}, manifest says {}",
            index.dimension(),
            manifest.dimension
        )));
    }
    let expected = manifest.field_counts.get(&field).copied().unwrap_or(0);
    if index.len() != expected {
        return Err(ArtifactError::InvalidFormat(format!(
            "{field} index holds {} entries, manifest says {expected}",
            index.len()
        )));
    }
    if let Some(frozen) = index.frozen() {
        if let Some(orphan) = frozen.ids.iter().find(|id| mapping.entry(**id).is_none()) {
            return Err(ArtifactError::InvalidFormat(format!(
                "{field} index references internal id {orphan} missing from the mapping"
            )));
        }
    }
    Ok(())
}
