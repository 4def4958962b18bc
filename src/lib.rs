//! Container image acquisition and package-path discovery.
//!
//! Layerprobe acquires an image from a local or remote Docker-compatible
//! engine, exports it as a tar archive, reconstructs its layered filesystem on
//! disk, and locates directories likely to hold language-level package
//! manifests for downstream software-composition analysis.
//!
//! # Architecture
//!
//! ```text
//! reference string
//!       │
//!       ▼
//! ImageIdentifier::parse ──► Resolver (inspect / pull / re-inspect)
//!       │                        │ uses Engine
//!       ▼                        ▼
//! Exporter ── streams images/{ref}/get ──► all_layers_dir/
//!       │                                  ├── manifest.json
//!       │   layers applied in order        └── all-layers/  (exploded union)
//!       ▼
//! discover_pkg_paths ──► ordered candidate package directories
//! ```
//!
//! Fetching always goes through the engine's own pull capability; this is not
//! a registry client and computes no content digests.

pub mod discovery;
pub mod engine;
pub mod error;
pub mod export;
pub mod layers;
pub mod reference;
pub mod resolve;

pub use discovery::discover_pkg_paths;
pub use engine::{ConnectionOptions, Engine};
pub use error::{ProbeError, Result};
pub use export::{ExportResult, Exporter, LayerConfig, ManifestEntry};
pub use layers::extract_layer;
pub use reference::ImageIdentifier;
pub use resolve::{Resolution, Resolver, ResolveState};
