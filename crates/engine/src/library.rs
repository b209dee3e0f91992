use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::error::LibraryError;
use crate::media::{Collection, Group, MediaAsset};
use crate::probe::MediaProbe;
use crate::scan;

/// Outcome of importing a folder into one collection
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct ImportSummary {
    pub added: usize,
    /// Already present, left as they were
    pub duplicates: usize,
    /// Files whose duration could not be read
    pub rejected: Vec<PathBuf>,
}

/// The operator's main and overlay collections
pub struct MediaLibrary {
    probe: Arc<dyn MediaProbe>,
    main: Collection,
    overlay: Collection,
}

impl MediaLibrary {
    pub fn new(probe: Arc<dyn MediaProbe>) -> Self {
        Self {
            probe,
            main: Collection::new(),
            overlay: Collection::new(),
        }
    }

    pub fn collection(&self, group: Group) -> &Collection {
        match group {
            Group::Main => &self.main,
            Group::Overlay => &self.overlay,
        }
    }

    fn collection_mut(&mut self, group: Group) -> &mut Collection {
        match group {
            Group::Main => &mut self.main,
            Group::Overlay => &mut self.overlay,
        }
    }

    pub fn main(&self) -> &Collection {
        &self.main
    }

    pub fn overlay(&self) -> &Collection {
        &self.overlay
    }

    /// Probe a file and add it to a group.
    ///
    /// Returns `Ok(false)` when the path is already in the group. A file whose
    /// duration cannot be read is rejected and never enters the collection.
    pub async fn add_asset(&mut self, path: &Path, group: Group) -> Result<bool, LibraryError> {
        if self.collection(group).contains(path) {
            debug!("{} already in the {} collection", path.display(), group);
            return Ok(false);
        }

        let duration = self.probe.probe_duration(path).await;
        if duration <= 0.0 {
            error!("Rejected {} video {}: duration unavailable", group, path.display());
            return Err(LibraryError::Probe(path.to_path_buf()));
        }

        let asset = MediaAsset::new(path, duration);
        info!("Added {} video {} ({:.2}s)", group, asset.label(), duration);
        Ok(self.collection_mut(group).insert(asset))
    }

    /// Add every video file below `dir`
    pub async fn import_folder(&mut self, dir: &Path, group: Group) -> Result<ImportSummary, LibraryError> {
        if !dir.is_dir() {
            return Err(LibraryError::NotFound(dir.to_path_buf()));
        }
        let files = scan::find_videos(dir).map_err(|e| LibraryError::Io {
            path: dir.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", e)),
        })?;

        let mut summary = ImportSummary::default();
        for file in files {
            match self.add_asset(&file, group).await {
                Ok(true) => summary.added += 1,
                Ok(false) => summary.duplicates += 1,
                Err(_) => summary.rejected.push(file),
            }
        }

        info!(
            "📁 Imported {} {} video(s) from {} ({} rejected)",
            summary.added,
            group,
            dir.display(),
            summary.rejected.len()
        );
        Ok(summary)
    }

    pub fn remove_asset(&mut self, path: &Path, group: Group) -> Result<MediaAsset, LibraryError> {
        let asset = self
            .collection_mut(group)
            .remove(path)
            .ok_or_else(|| LibraryError::NotFound(path.to_path_buf()))?;
        info!("Removed {} video {}", group, asset.label());
        Ok(asset)
    }

    /// Rename files on disk to a numbered sequence and re-key the collection.
    ///
    /// Files land in the directory of the first path as `Main_001.ext`,
    /// `Main_002.ext`... (overlays use `video_overlay_`). A taken name gets
    /// `_001`, `_002`... appended. Durations are carried over, nothing is
    /// probed again. Returns the new paths in argument order.
    pub async fn rename_assets(&mut self, paths: &[PathBuf], group: Group) -> Result<Vec<PathBuf>, LibraryError> {
        let Some(first) = paths.first() else {
            return Ok(Vec::new());
        };
        for path in paths {
            if !self.collection(group).contains(path) {
                return Err(LibraryError::NotFound(path.clone()));
            }
        }

        let target_dir = first.parent().map(Path::to_path_buf).unwrap_or_default();
        let prefix = rename_prefix(group);
        let mut renamed = Vec::with_capacity(paths.len());

        for (i, old) in paths.iter().enumerate() {
            let ext = old
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let new = free_name(&target_dir, &format!("{}_{:03}", prefix, i + 1), &ext, old).await;

            if new != *old {
                move_file(old, &new).await?;
                info!("Renamed {} -> {}", old.display(), new.display());
            }
            if !self.collection_mut(group).rekey(old, new.clone()) {
                warn!("Could not re-key {} to {}", old.display(), new.display());
            }
            renamed.push(new);
        }

        Ok(renamed)
    }
}

fn rename_prefix(group: Group) -> &'static str {
    match group {
        Group::Main => "Main",
        Group::Overlay => "video_overlay",
    }
}

/// First of `stem.ext`, `stem_001.ext`, `stem_002.ext`... that is free; `current` counts as free
async fn free_name(dir: &Path, stem: &str, ext: &str, current: &Path) -> PathBuf {
    let mut candidate = dir.join(format!("{}{}", stem, ext));
    let mut counter = 1;
    while candidate != current && tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        candidate = dir.join(format!("{}_{:03}{}", stem, counter, ext));
        counter += 1;
    }
    candidate
}

async fn move_file(from: &Path, to: &Path) -> Result<(), LibraryError> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // Different filesystem: copy, then drop the original
    tokio::fs::copy(from, to).await.map_err(|source| LibraryError::Io {
        path: from.to_path_buf(),
        source,
    })?;
    tokio::fs::remove_file(from).await.map_err(|source| LibraryError::Io {
        path: from.to_path_buf(),
        source,
    })
}
