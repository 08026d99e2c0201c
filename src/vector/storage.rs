//! On-disk artifact format for a finalized field index.
//!
//! One artifact holds one field's frozen IVF layout and is read back through
//! a memory map.
//!
//! # Storage Format
//!
//! - Header (32 bytes): magic, format version, field tag, dimension,
//!   entry count, centroid count, reserved
//! - Centroids: `centroid_count * dimension` little-endian f32
//! - Entries: per row, internal id (u32), cluster id (u32, 0 when the index
//!   is scanned exhaustively), then `dimension` little-endian f32

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use memmap2::{Mmap, MmapOptions};
use thiserror::Error;

use crate::types::{FieldKind, InternalId};
use crate::vector::index::{FieldIndex, FrozenIndex, IndexParams};
use crate::vector::types::{ClusterId, VectorDimension, VectorError};

/// Current artifact format version.
pub const ARTIFACT_VERSION: u32 = 1;

/// Size of the artifact header in bytes.
const HEADER_SIZE: usize = 32;

/// Magic bytes to identify field index artifacts.
const MAGIC_BYTES: &[u8; 4] = b"BFIX";

/// Number of bytes per f32 value.
const BYTES_PER_F32: usize = 4;

/// Bytes of the id + cluster prefix of each entry.
const ENTRY_PREFIX: usize = 8;

/// Errors specific to artifact reads and writes.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid artifact format: {0}")]
    InvalidFormat(String),

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

#[derive(Debug)]
struct Header {
    field: FieldKind,
    dimension: VectorDimension,
    entries: usize,
    centroids: usize,
}

/// Writes a finalized index to `path`, fsyncing before returning.
pub fn write_index(path: &Path, index: &FieldIndex) -> Result<(), ArtifactError> {
    let frozen = index.frozen().ok_or(VectorError::IndexNotFinalized {
        field: index.field(),
    })?;
    let dim = index.dimension().get();

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    writer.write_all(MAGIC_BYTES)?;
    writer.write_all(&ARTIFACT_VERSION.to_le_bytes())?;
    writer.write_all(&[index.field().tag(), 0, 0, 0])?;
    writer.write_all(&(dim as u32).to_le_bytes())?;
    writer.write_all(&(frozen.ids.len() as u32).to_le_bytes())?;
    writer.write_all(&(frozen.centroids.len() as u32).to_le_bytes())?;
    writer.write_all(&[0u8; 8])?;

    for centroid in &frozen.centroids {
        for value in centroid {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    for (row, id) in frozen.ids.iter().enumerate() {
        let cluster = frozen.cluster_of.get(row).map_or(0, ClusterId::get);
        writer.write_all(&id.value().to_le_bytes())?;
        writer.write_all(&cluster.to_le_bytes())?;
        for value in &frozen.vectors[row * dim..(row + 1) * dim] {
            writer.write_all(&value.to_le_bytes())?;
        }
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Reads an artifact back into a finalized index.
///
/// `expected` guards against an artifact written for another field.
pub fn read_index(
    path: &Path,
    expected: FieldKind,
    params: IndexParams,
) -> Result<FieldIndex, ArtifactError> {
    let file = File::open(path)?;
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    let header = read_header(&mmap)?;
    if header.field != expected {
        return Err(ArtifactError::InvalidFormat(format!(
            "artifact holds the {} index, expected {expected}",
            header.field
        )));
    }

    let dim = header.dimension.get();
    let (entry_bytes, expected_len) = artifact_layout(&header)
        .ok_or_else(|| ArtifactError::InvalidFormat("header sizes overflow".to_string()))?;
    if mmap.len() != expected_len {
        return Err(ArtifactError::InvalidFormat(format!(
            "{} bytes on disk, header describes {expected_len}",
            mmap.len()
        )));
    }

    let mut offset = HEADER_SIZE;
    let mut centroids = Vec::with_capacity(header.centroids);
    for _ in 0..header.centroids {
        centroids.push(read_f32s(&mmap, offset, dim));
        offset += dim * BYTES_PER_F32;
    }

    let mut ids = Vec::with_capacity(header.entries);
    let mut cluster_of = Vec::with_capacity(if centroids.is_empty() { 0 } else { header.entries });
    let mut vectors = Vec::with_capacity(header.entries * dim);
    for _ in 0..header.entries {
        ids.push(InternalId(read_u32(&mmap, offset)));
        let cluster = read_u32(&mmap, offset + 4);
        if !centroids.is_empty() {
            let cluster = ClusterId::new(cluster)
                .filter(|c| c.index() < centroids.len())
                .ok_or_else(|| {
                    ArtifactError::InvalidFormat(format!("entry references cluster {cluster}"))
                })?;
            cluster_of.push(cluster);
        }
        vectors.extend(read_f32s(&mmap, offset + ENTRY_PREFIX, dim));
        offset += entry_bytes;
    }

    let frozen = FrozenIndex::from_parts(ids, vectors, cluster_of, centroids);
    Ok(FieldIndex::from_frozen(
        expected,
        header.dimension,
        params,
        frozen,
    ))
}

/// Bytes per entry and total artifact length, `None` on overflow.
fn artifact_layout(header: &Header) -> Option<(usize, usize)> {
    let row_bytes = header.dimension.get().checked_mul(BYTES_PER_F32)?;
    let entry_bytes = row_bytes.checked_add(ENTRY_PREFIX)?;
    let centroid_bytes = header.centroids.checked_mul(row_bytes)?;
    let total = header
        .entries
        .checked_mul(entry_bytes)?
        .checked_add(centroid_bytes)?
        .checked_add(HEADER_SIZE)?;
    Some((entry_bytes, total))
}

fn read_header(mmap: &Mmap) -> Result<Header, ArtifactError> {
    if mmap.len() < HEADER_SIZE {
        return Err(ArtifactError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    if &mmap[0..4] != MAGIC_BYTES {
        return Err(ArtifactError::InvalidFormat(
            "Invalid magic bytes".to_string(),
        ));
    }

    let version = read_u32(mmap, 4);
    if version != ARTIFACT_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: ARTIFACT_VERSION,
            actual: version,
        }
        .into());
    }

    let field = FieldKind::from_tag(mmap[8])
        .ok_or_else(|| ArtifactError::InvalidFormat(format!("unknown field tag {}", mmap[8])))?;
    let dimension = VectorDimension::new(read_u32(mmap, 12) as usize)?;

    Ok(Header {
        field,
        dimension,
        entries: read_u32(mmap, 16) as usize,
        centroids: read_u32(mmap, 20) as usize,
    })
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_f32s(bytes: &[u8], offset: usize, count: usize) -> Vec<f32> {
    bytes[offset..offset + count * BYTES_PER_F32]
        .chunks_exact(BYTES_PER_F32)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
