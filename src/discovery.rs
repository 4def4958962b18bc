//! Package-path discovery over the exploded image filesystem.
//!
//! Walks a fixed, ordered set of well-known roots under the exploded layer
//! union and expands each with a bounded recursive search for package-manager
//! marker directories (site-packages, gems, cargo, composer). Results are
//! in-image absolute paths, ordered by root priority and then marker priority;
//! duplicates across roots are kept.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

/// Depth bound for the per-root recursive search.
const MAX_SEARCH_DEPTH: usize = 10;

/// Well-known install/data locations scanned after the image's working
/// directory. Together with the working directory these form the fixed
/// 14-root priority list.
const WELL_KNOWN_ROOTS: [&str; 13] = [
    "/app",
    "/home",
    "/opt",
    "/root",
    "/srv",
    "/usr/lib",
    "/usr/local/lib",
    "/usr/local/bundle",
    "/usr/share",
    "/var/lib",
    "/var/task",
    "/var/www",
    "/workspace",
];

/// A package-ecosystem marker directory name.
struct Marker {
    name: &'static str,
    /// Whether the dot-prefixed variant (e.g., `.cargo`) also matches.
    matches_hidden: bool,
}

/// Marker priority list. Matching is case-insensitive.
const MARKERS: [Marker; 4] = [
    Marker {
        name: "site-packages",
        matches_hidden: false,
    },
    Marker {
        name: "gems",
        matches_hidden: false,
    },
    Marker {
        name: "cargo",
        matches_hidden: true,
    },
    Marker {
        name: "composer",
        matches_hidden: true,
    },
];

/// Scan the exploded image filesystem for candidate package directories.
///
/// `working_dir` is the terminal layer's configured working directory; when
/// unset or empty it falls back to the image root. Every root contributes
/// itself unconditionally, so the result always holds at least 14 entries.
/// Search failures under a root (missing directory, unreadable entry) yield an
/// empty contribution rather than an error.
pub fn discover_pkg_paths(exploded_dir: &Path, working_dir: Option<&str>) -> Vec<PathBuf> {
    let working_dir = match working_dir {
        Some(dir) if !dir.is_empty() => dir,
        _ => "/",
    };

    let mut roots: Vec<&str> = Vec::with_capacity(WELL_KNOWN_ROOTS.len() + 1);
    roots.push(working_dir);
    roots.extend(WELL_KNOWN_ROOTS);

    let mut paths = Vec::new();
    for root in roots {
        paths.push(PathBuf::from(root));

        let host_root = exploded_dir.join(root.trim_start_matches('/'));
        for marker in &MARKERS {
            for matched in find_marker_dirs(&host_root, marker) {
                if let Some(image_path) = to_image_path(exploded_dir, &matched) {
                    paths.push(image_path);
                }
            }
        }
    }

    tracing::debug!(count = paths.len(), "Package path discovery finished");
    paths
}

/// Recursively collect directories under `root` whose name matches the
/// marker, case-insensitively. Walk errors are skipped, so a missing or
/// unreadable root yields an empty result.
fn find_marker_dirs(root: &Path, marker: &Marker) -> Vec<PathBuf> {
    let hidden = format!(".{}", marker.name);

    WalkDir::new(root)
        .max_depth(MAX_SEARCH_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy().to_lowercase();
            name == marker.name || (marker.matches_hidden && name == hidden)
        })
        .map(|entry| entry.into_path())
        .collect()
}

/// Translate a host path under the exploded directory back to an in-image
/// absolute path.
fn to_image_path(exploded_dir: &Path, host_path: &Path) -> Option<PathBuf> {
    host_path
        .strip_prefix(exploded_dir)
        .ok()
        .map(|relative| Path::new("/").join(relative))
}
