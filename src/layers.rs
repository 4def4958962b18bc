//! Per-layer archive extraction.
//!
//! Exported layers are tar archives, occasionally gzip-compressed; the format
//! is sniffed from the magic bytes rather than the file name.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::GzDecoder;
use tar::Archive;

use crate::error::{ProbeError, Result};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract a single layer archive into `target_dir`.
///
/// Files already present in `target_dir` are overwritten; callers rely on
/// this when applying layers in order.
pub fn extract_layer(layer_path: &Path, target_dir: &Path) -> Result<()> {
    if !layer_path.exists() {
        return Err(ProbeError::Extraction(format!(
            "Layer file not found: {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| {
        ProbeError::Extraction(format!(
            "Failed to create target directory {}: {}",
            target_dir.display(),
            e
        ))
    })?;

    let mut file = File::open(layer_path).map_err(|e| {
        ProbeError::Extraction(format!(
            "Failed to open layer file {}: {}",
            layer_path.display(),
            e
        ))
    })?;

    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;

    if read == magic.len() && magic == GZIP_MAGIC {
        unpack(GzDecoder::new(file), layer_path, target_dir)?;
    } else {
        unpack(file, layer_path, target_dir)?;
    }

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        "Extracted layer"
    );

    Ok(())
}

fn unpack<R: Read>(reader: R, layer_path: &Path, target_dir: &Path) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.unpack(target_dir).map_err(|e| {
        ProbeError::Extraction(format!(
            "Failed to extract layer {} to {}: {}",
            layer_path.display(),
            target_dir.display(),
            e
        ))
    })
}
