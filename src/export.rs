//! Streaming image export and layered filesystem reconstruction.
//!
//! Streams the engine's full-image export (a tar archive of per-layer
//! sub-archives plus `manifest.json`) straight into an extraction sink, then
//! applies every declared layer in manifest order into a single exploded
//! directory. Later layers legitimately overwrite earlier ones at colliding
//! paths; extracting out of order silently corrupts the reconstructed
//! filesystem, so the layer loop is strictly sequential.
//!
//! ```text
//! <all_layers_dir>/                 raw export tree
//! ├── manifest.json
//! ├── <layer-id>/layer.tar          per-layer sub-archives
//! ├── <layer-id>/json               per-layer config sidecars
//! └── all-layers/                   exploded union of all layers, in order
//! ```

use std::io;
use std::path::{Path, PathBuf};

use bollard::models::ImageInspect;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use serde::Deserialize;
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::discovery::discover_pkg_paths;
use crate::engine::Engine;
use crate::error::{ProbeError, Result};
use crate::layers::extract_layer;
use crate::reference::ImageIdentifier;
use crate::resolve::Resolver;

/// File name of the export manifest inside the raw export tree.
const MANIFEST_FILE: &str = "manifest.json";

/// Subdirectory of the raw export tree holding the exploded layer union.
const EXPLODED_SUBDIR: &str = "all-layers";

/// Per-layer archive file name; the config sidecar replaces this suffix.
const LAYER_ARCHIVE_SUFFIX: &str = "layer.tar";
const LAYER_CONFIG_SUFFIX: &str = "json";

/// One descriptor in the export manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Relative path of the image's top-level config file.
    #[serde(rename = "Config", default)]
    pub config: String,
    /// Tags this descriptor was exported under.
    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Option<Vec<String>>,
    /// Relative per-layer archive paths, bottom to top.
    #[serde(rename = "Layers", default)]
    pub layers: Vec<String>,
}

/// Terminal layer configuration sidecar (the `json` file next to the last
/// `layer.tar`). Only the fields the scan needs are modeled.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayerConfig {
    #[serde(default)]
    pub config: Option<RuntimeConfig>,
    #[serde(default)]
    pub container_config: Option<RuntimeConfig>,
}

/// Runtime configuration block inside a layer config sidecar.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "WorkingDir", default)]
    pub working_dir: Option<String>,
    #[serde(rename = "Env", default)]
    pub env: Option<Vec<String>>,
    #[serde(rename = "Entrypoint", default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    pub cmd: Option<Vec<String>>,
}

impl LayerConfig {
    /// The image's configured working directory, preferring the runtime
    /// config over the build-time container config.
    pub fn working_dir(&self) -> Option<&str> {
        self.config
            .as_ref()
            .and_then(|c| c.working_dir.as_deref())
            .or_else(|| {
                self.container_config
                    .as_ref()
                    .and_then(|c| c.working_dir.as_deref())
            })
            .filter(|dir| !dir.is_empty())
    }
}

/// Everything produced by a completed export.
///
/// The caller owns both directories; nothing here is cleaned up on drop.
#[derive(Debug)]
pub struct ExportResult {
    /// Engine inspect data for the exported image.
    pub inspect: ImageInspect,
    /// The authoritative manifest descriptor (the last one when several are
    /// present).
    pub manifest: ManifestEntry,
    /// Root of the raw export tree.
    pub all_layers_dir: PathBuf,
    /// Union of all layers applied in order.
    pub exploded_dir: PathBuf,
    /// Terminal layer configuration, default when the sidecar is absent.
    pub last_layer_config: LayerConfig,
    /// Candidate package directories, in discovery order.
    pub pkg_paths: Vec<PathBuf>,
}

/// Drives the export pipeline against an engine handle.
pub struct Exporter<'a> {
    engine: &'a Engine,
}

impl<'a> Exporter<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    /// Export an image and reconstruct its layered filesystem on disk.
    ///
    /// Resolves the image first (pulling it if needed); an unresolvable image
    /// aborts before any export traffic. Any I/O or parse failure aborts the
    /// whole export; partially populated temporary directories are left on
    /// disk for the caller to dispose of.
    pub async fn export(&self, full_name: &str) -> Result<ExportResult> {
        let resolution = Resolver::new(self.engine).resolve(full_name).await?;

        // Normalized independently of the resolver; both follow the same
        // default-tag rule.
        let export_reference = ImageIdentifier::normalized_reference(full_name);

        let all_layers_dir = tempfile::Builder::new()
            .prefix("layerprobe-")
            .tempdir()?
            .into_path();
        let exploded_dir = all_layers_dir.join(EXPLODED_SUBDIR);
        std::fs::create_dir_all(&exploded_dir)?;

        tracing::info!(
            reference = %export_reference,
            target = %all_layers_dir.display(),
            "Exporting image"
        );

        let stream = self.engine.export_stream(&export_reference);
        unpack_export_stream(stream, &all_layers_dir).await?;

        let (manifest, last_layer_config, pkg_paths) = {
            let all_layers_dir = all_layers_dir.clone();
            let exploded_dir = exploded_dir.clone();
            tokio::task::spawn_blocking(move || {
                reconstruct_filesystem(&all_layers_dir, &exploded_dir)
            })
            .await
            .map_err(|e| ProbeError::Other(format!("Reconstruction task failed: {}", e)))??
        };

        tracing::info!(
            reference = %export_reference,
            layers = manifest.layers.len(),
            pkg_paths = pkg_paths.len(),
            "Export complete"
        );

        Ok(ExportResult {
            inspect: resolution.inspect,
            manifest,
            all_layers_dir,
            exploded_dir,
            last_layer_config,
            pkg_paths,
        })
    }
}

/// Stream the export archive into `all_layers_dir` without buffering it in
/// memory. The tar sink runs on a blocking thread and pulls bytes through the
/// bridge only as fast as it can write them out.
async fn unpack_export_stream<S>(stream: S, all_layers_dir: &Path) -> Result<()>
where
    S: Stream<Item = std::result::Result<Bytes, bollard::errors::Error>> + Send + 'static,
{
    let reader = StreamReader::new(Box::pin(
        stream.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
    ));
    let target = all_layers_dir.to_path_buf();

    tokio::task::spawn_blocking(move || {
        let mut archive = tar::Archive::new(SyncIoBridge::new(reader));
        archive.unpack(&target).map_err(|e| {
            ProbeError::Extraction(format!(
                "Failed to extract export archive to {}: {}",
                target.display(),
                e
            ))
        })
    })
    .await
    .map_err(|e| ProbeError::Other(format!("Extraction task failed: {}", e)))?
}

/// Steps 4-8 of the pipeline, synchronous: manifest checks, ordered layer
/// extraction, terminal config parse, path discovery.
fn reconstruct_filesystem(
    all_layers_dir: &Path,
    exploded_dir: &Path,
) -> Result<(ManifestEntry, LayerConfig, Vec<PathBuf>)> {
    if !all_layers_dir.exists() {
        return Err(ProbeError::Extraction(format!(
            "Export directory missing after extraction: {}",
            all_layers_dir.display()
        )));
    }

    let manifest = read_manifest(&all_layers_dir.join(MANIFEST_FILE))?;

    // Manifest order is overlay order. Later layers overwrite earlier ones.
    for layer in &manifest.layers {
        extract_layer(&all_layers_dir.join(layer), exploded_dir)?;
    }

    let last_layer_config = match manifest.layers.last().and_then(|l| layer_config_path(l)) {
        Some(config_rel) => read_layer_config(&all_layers_dir.join(config_rel))?,
        None => LayerConfig::default(),
    };

    let pkg_paths = discover_pkg_paths(exploded_dir, last_layer_config.working_dir());

    Ok((manifest, last_layer_config, pkg_paths))
}

/// Parse the export manifest and pick the authoritative descriptor.
///
/// A missing manifest fails the export. Multiple descriptors are legal but
/// only the last is used; that condition is warned about, not fatal.
fn read_manifest(manifest_path: &Path) -> Result<ManifestEntry> {
    if !manifest_path.exists() {
        return Err(ProbeError::Manifest(format!(
            "{} not found under {}",
            MANIFEST_FILE,
            manifest_path
                .parent()
                .unwrap_or(manifest_path)
                .display()
        )));
    }

    let content = std::fs::read_to_string(manifest_path)?;
    let entries: Vec<ManifestEntry> = serde_json::from_str(&content)
        .map_err(|e| ProbeError::Manifest(format!("Failed to parse {}: {}", MANIFEST_FILE, e)))?;

    if entries.len() > 1 {
        tracing::warn!(
            descriptors = entries.len(),
            "Export manifest lists multiple descriptors; using the last"
        );
    }

    entries.into_iter().last().ok_or_else(|| {
        ProbeError::Manifest(format!("{} contains no descriptors", MANIFEST_FILE))
    })
}

/// Derive a layer's config sidecar path by swapping the archive suffix.
/// Returns None for layer paths that do not follow the exported naming.
fn layer_config_path(layer: &str) -> Option<String> {
    layer
        .strip_suffix(LAYER_ARCHIVE_SUFFIX)
        .map(|prefix| format!("{}{}", prefix, LAYER_CONFIG_SUFFIX))
}

/// Parse a layer config sidecar; an absent file yields the empty default.
fn read_layer_config(config_path: &Path) -> Result<LayerConfig> {
    if !config_path.exists() {
        return Ok(LayerConfig::default());
    }

    let content = std::fs::read_to_string(config_path)?;
    serde_json::from_str(&content).map_err(|e| {
        ProbeError::LayerConfig(format!(
            "Failed to parse {}: {}",
            config_path.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::tests::create_tar_layer;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_layer_config_path_replacement() {
        assert_eq!(
            layer_config_path("abc123/layer.tar").as_deref(),
            Some("abc123/json")
        );
        assert_eq!(layer_config_path("blobs/sha256/abc123"), None);
    }

    #[test]
    fn test_read_manifest_single_descriptor() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);
        fs::write(
            &path,
            r#"[{"Config":"abc.json","RepoTags":["debian:latest"],"Layers":["l1/layer.tar","l2/layer.tar"]}]"#,
        )
        .unwrap();

        let manifest = read_manifest(&path).unwrap();

        assert_eq!(manifest.config, "abc.json");
        assert_eq!(manifest.layers, vec!["l1/layer.tar", "l2/layer.tar"]);
    }

    #[test]
    fn test_read_manifest_last_descriptor_wins() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);
        fs::write(
            &path,
            r#"[
                {"Config":"first.json","Layers":["first/layer.tar"]},
                {"Config":"second.json","Layers":["second/layer.tar"]}
            ]"#,
        )
        .unwrap();

        let manifest = read_manifest(&path).unwrap();

        assert_eq!(manifest.config, "second.json");
        assert_eq!(manifest.layers, vec!["second/layer.tar"]);
    }

    #[test]
    fn test_read_manifest_missing_file() {
        let temp_dir = TempDir::new().unwrap();

        let result = read_manifest(&temp_dir.path().join(MANIFEST_FILE));

        assert!(result.is_err());
    }

    #[test]
    fn test_read_manifest_empty_list() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(MANIFEST_FILE);
        fs::write(&path, "[]").unwrap();

        let result = read_manifest(&path);

        assert!(result.is_err());
    }

    #[test]
    fn test_reconstruct_missing_manifest_extracts_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let exploded = temp_dir.path().join(EXPLODED_SUBDIR);
        fs::create_dir_all(&exploded).unwrap();

        let result = reconstruct_filesystem(temp_dir.path(), &exploded);

        assert!(result.is_err());
        assert_eq!(fs::read_dir(&exploded).unwrap().count(), 0);
    }

    #[test]
    fn test_reconstruct_applies_layers_in_manifest_order() {
        let temp_dir = TempDir::new().unwrap();
        let exploded = temp_dir.path().join(EXPLODED_SUBDIR);
        fs::create_dir_all(&exploded).unwrap();

        fs::create_dir_all(temp_dir.path().join("base")).unwrap();
        fs::create_dir_all(temp_dir.path().join("top")).unwrap();
        create_tar_layer(
            &temp_dir.path().join("base/layer.tar"),
            &[("etc/issue", b"base"), ("base-only.txt", b"keep")],
            false,
        );
        create_tar_layer(
            &temp_dir.path().join("top/layer.tar"),
            &[("etc/issue", b"top")],
            false,
        );
        fs::write(
            temp_dir.path().join("top/json"),
            r#"{"config":{"WorkingDir":"/srv/app"}}"#,
        )
        .unwrap();
        fs::write(
            temp_dir.path().join(MANIFEST_FILE),
            r#"[{"Config":"cfg.json","Layers":["base/layer.tar","top/layer.tar"]}]"#,
        )
        .unwrap();

        let (manifest, config, pkg_paths) =
            reconstruct_filesystem(temp_dir.path(), &exploded).unwrap();

        // Later layer wins at the colliding path; earlier files survive.
        assert_eq!(fs::read_to_string(exploded.join("etc/issue")).unwrap(), "top");
        assert_eq!(
            fs::read_to_string(exploded.join("base-only.txt")).unwrap(),
            "keep"
        );
        assert_eq!(manifest.layers.len(), 2);
        assert_eq!(config.working_dir(), Some("/srv/app"));
        assert_eq!(pkg_paths[0], PathBuf::from("/srv/app"));
        assert!(pkg_paths.len() >= 14);
    }

    #[test]
    fn test_reconstruct_missing_config_sidecar_uses_default() {
        let temp_dir = TempDir::new().unwrap();
        let exploded = temp_dir.path().join(EXPLODED_SUBDIR);
        fs::create_dir_all(&exploded).unwrap();

        fs::create_dir_all(temp_dir.path().join("only")).unwrap();
        create_tar_layer(
            &temp_dir.path().join("only/layer.tar"),
            &[("hello.txt", b"hi")],
            false,
        );
        fs::write(
            temp_dir.path().join(MANIFEST_FILE),
            r#"[{"Config":"cfg.json","Layers":["only/layer.tar"]}]"#,
        )
        .unwrap();

        let (_, config, pkg_paths) =
            reconstruct_filesystem(temp_dir.path(), &exploded).unwrap();

        assert!(config.working_dir().is_none());
        // No working dir: discovery falls back to the image root.
        assert_eq!(pkg_paths[0], PathBuf::from("/"));
    }

    #[test]
    fn test_layer_config_working_dir_fallback() {
        let config: LayerConfig = serde_json::from_str(
            r#"{"container_config":{"WorkingDir":"/built"}}"#,
        )
        .unwrap();
        assert_eq!(config.working_dir(), Some("/built"));

        let config: LayerConfig = serde_json::from_str(
            r#"{"config":{"WorkingDir":"/run"},"container_config":{"WorkingDir":"/built"}}"#,
        )
        .unwrap();
        assert_eq!(config.working_dir(), Some("/run"));

        let config: LayerConfig = serde_json::from_str(r#"{"config":{"WorkingDir":""}}"#).unwrap();
        assert_eq!(config.working_dir(), None);
    }

    #[test]
    fn test_read_layer_config_absent_file() {
        let temp_dir = TempDir::new().unwrap();

        let config = read_layer_config(&temp_dir.path().join("json")).unwrap();

        assert!(config.working_dir().is_none());
    }
}
