//! Resolve a logical media reference (name, duration hint, path hint) to a file on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::audio::get_media_duration;

/// Directories never descended into.
pub const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".next",
    "dist-electron",
    "dist",
    "bin",
    "obj",
    "ai_workspace",
    "target",
];

/// Extensions considered when matching by duration.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp4", "mp3", "wav", "m4a", "mov", "webm"];

/// Largest duration difference (seconds) accepted by the duration fallback.
pub const DURATION_TOLERANCE: f64 = 2.0;

#[async_trait]
pub trait FileLocator: Send + Sync {
    /// Resolve a media reference. Never fails: an unresolvable reference is `None`.
    async fn locate(&self, name: &str, target_duration: Option<f64>, hint: Option<&Path>) -> Option<PathBuf>;
}

#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration(&self, path: &Path) -> Option<f64>;
}

/// Probes durations with `ffprobe`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfprobeDurationProbe;

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration(&self, path: &Path) -> Option<f64> {
        get_media_duration(path).await.ok()
    }
}

/// Brute-force locator that walks a fixed list of search roots.
///
/// Walk order is deterministic: roots in the order given, then depth-first with
/// entries sorted by file name. The first match wins.
pub struct WalkLocator {
    roots: Vec<PathBuf>,
    probe: Arc<dyn DurationProbe>,
}

impl WalkLocator {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        let mut unique: Vec<PathBuf> = Vec::with_capacity(roots.len());
        for root in roots {
            if !unique.contains(&root) {
                unique.push(root);
            }
        }

        Self {
            roots: unique,
            probe: Arc::new(FfprobeDurationProbe),
        }
    }

    /// Search roots for a workspace: the root, its static asset directories,
    /// then its parent and grandparent.
    pub fn for_workspace(workspace_root: &Path, static_dirs: &[String]) -> Self {
        let mut roots = vec![workspace_root.to_path_buf()];
        roots.extend(static_dirs.iter().map(|d| workspace_root.join(d)));

        if let Some(parent) = workspace_root.parent() {
            roots.push(parent.to_path_buf());
            if let Some(grandparent) = parent.parent() {
                roots.push(grandparent.to_path_buf());
            }
        }

        Self::new(roots)
    }

    pub fn with_probe(mut self, probe: Arc<dyn DurationProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    async fn find_by_duration(&self, target: f64) -> Option<PathBuf> {
        let roots = self.roots.clone();
        let candidates = tokio::task::spawn_blocking(move || media_candidates(&roots))
            .await
            .unwrap_or_default();

        debug!(
            "Probing {} media candidates for a {:.2}s match",
            candidates.len(),
            target
        );

        for candidate in candidates {
            if let Some(d) = self.probe.duration(&candidate).await {
                if (d - target).abs() < DURATION_TOLERANCE {
                    info!("Match found by duration: {} ({:.2}s)", candidate.display(), d);
                    return Some(candidate);
                }
            }
        }

        None
    }
}

#[async_trait]
impl FileLocator for WalkLocator {
    async fn locate(&self, name: &str, target_duration: Option<f64>, hint: Option<&Path>) -> Option<PathBuf> {
        if let Some(hint) = hint {
            if hint.exists() {
                debug!("Using path from project assets: {}", hint.display());
                return Some(hint.to_path_buf());
            }
        }

        let name = name.trim();
        let as_path = Path::new(name);
        if as_path.is_absolute() && as_path.exists() {
            return Some(as_path.to_path_buf());
        }

        if !name.is_empty() {
            let roots = self.roots.clone();
            let target = name.to_string();
            let found = tokio::task::spawn_blocking(move || find_by_name(&roots, &target))
                .await
                .ok()
                .flatten();
            if found.is_some() {
                return found;
            }
        }

        match target_duration {
            Some(target) if target > 0.0 => {
                info!(
                    "No name match for '{}', trying duration match ({:.2}s, tolerance {}s)",
                    name, target, DURATION_TOLERANCE
                );
                self.find_by_duration(target).await
            }
            _ => None,
        }
    }
}

fn is_skipped_dir(entry: &walkdir::DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && SKIP_DIRS
            .iter()
            .any(|skip| entry.file_name().to_str() == Some(*skip))
}

/// Every regular file under `roots`, in walk order.
fn walk_files(roots: &[PathBuf]) -> impl Iterator<Item = PathBuf> + '_ {
    roots.iter().filter(|root| root.is_dir()).flat_map(|root| {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_skipped_dir(e))
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
    })
}

fn lowercase_stem(path: &Path) -> Option<String> {
    path.file_stem().map(|s| s.to_string_lossy().to_lowercase())
}

/// First file whose name equals `name` case-insensitively, or whose name without
/// extension equals `name` without extension.
pub fn find_by_name(roots: &[PathBuf], name: &str) -> Option<PathBuf> {
    let target = name.trim().to_lowercase();
    if target.is_empty() {
        return None;
    }
    let target_stem = lowercase_stem(Path::new(&target));

    walk_files(roots).find(|path| {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        file_name == target || (target_stem.is_some() && lowercase_stem(path) == target_stem)
    })
}

/// Media files under `roots`, in walk order.
pub fn media_candidates(roots: &[PathBuf]) -> Vec<PathBuf> {
    walk_files(roots)
        .filter(|path| {
            path.extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .map(|e| MEDIA_EXTENSIONS.contains(&e.as_str()))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_find_by_name_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("media").join("Interview.MP4"));

        let found = find_by_name(&[dir.path().to_path_buf()], "interview.mp4").unwrap();
        assert!(found.ends_with("media/Interview.MP4"));
    }

    #[test]
    fn test_find_by_name_ignores_extension() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("song.wav"));

        let found = find_by_name(&[dir.path().to_path_buf()], "song.mp3").unwrap();
        assert!(found.ends_with("song.wav"));
    }

    #[test]
    fn test_skip_dirs_are_not_walked() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("node_modules").join("clip.mp4"));
        touch(&dir.path().join(".git").join("clip.mp4"));

        assert!(find_by_name(&[dir.path().to_path_buf()], "clip.mp4").is_none());
    }

    #[test]
    fn test_walk_order_is_sorted_and_root_ordered() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        touch(&first.path().join("b").join("take.mp4"));
        touch(&first.path().join("a").join("take.mp4"));
        touch(&second.path().join("take.mp4"));

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let found = find_by_name(&roots, "take.mp4").unwrap();
        assert!(found.starts_with(first.path().join("a")));
    }

    #[test]
    fn test_media_candidates_filter_extensions() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a.mp3"));
        touch(&dir.path().join("b.txt"));
        touch(&dir.path().join("c.MOV"));

        let candidates = media_candidates(&[dir.path().to_path_buf()]);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_for_workspace_roots() {
        let locator = WalkLocator::for_workspace(
            Path::new("/home/user/work/app"),
            &["public".to_string()],
        );
        assert_eq!(
            locator.roots(),
            &[
                PathBuf::from("/home/user/work/app"),
                PathBuf::from("/home/user/work/app/public"),
                PathBuf::from("/home/user/work"),
                PathBuf::from("/home/user"),
            ]
        );
    }

    #[tokio::test]
    async fn test_hint_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let hint = dir.path().join("registered.mp4");
        touch(&hint);
        touch(&dir.path().join("other.mp4"));

        let locator = WalkLocator::new(vec![dir.path().to_path_buf()]);
        let found = locator
            .locate("other.mp4", Some(12.0), Some(hint.as_path()))
            .await;
        assert_eq!(found, Some(hint));
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let locator = WalkLocator::new(vec![dir.path().to_path_buf()]);

        let found = locator
            .locate("ghost.mp4", None, Some(Path::new("/nonexistent/ghost.mp4")))
            .await;
        assert!(found.is_none());
    }
}
