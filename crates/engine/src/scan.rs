use std::path::{Path, PathBuf};
use anyhow::{bail, Result};
use walkdir::WalkDir;
use log::{debug, info, warn};

use crate::probe::is_video_file;

/// Result of scanning a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// Video file that can be imported
    Video(PathBuf),
    /// File that was passed over (path, reason)
    Skipped(PathBuf, String),
}

/// Walk a folder recursively, classifying every regular file.
///
/// Entries come back sorted by file name within each directory so imports
/// are reproducible.
pub fn scan_folder(root: &Path) -> Result<Vec<ScanResult>> {
    if !root.is_dir() {
        bail!("Not a directory: {}", root.display());
    }

    info!("Scanning directory: {}", root.display());

    let mut results = Vec::new();
    let mut entry_count = 0;
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in walker.into_iter() {
        entry_count += 1;

        // Log progress every 1000 entries
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Error reading directory entry: {}", e);
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }

        if is_video_file(path) {
            debug!("Found video file: {}", path.display());
            results.push(ScanResult::Video(path.to_path_buf()));
        } else {
            results.push(ScanResult::Skipped(path.to_path_buf(), "not a video file".to_string()));
        }
    }

    let videos = results.iter().filter(|r| matches!(r, ScanResult::Video(_))).count();
    info!("Scan of {} found {} video file(s)", root.display(), videos);
    Ok(results)
}

/// Only the video files under `root`
pub fn find_videos(root: &Path) -> Result<Vec<PathBuf>> {
    Ok(scan_folder(root)?
        .into_iter()
        .filter_map(|r| match r {
            ScanResult::Video(path) => Some(path),
            ScanResult::Skipped(..) => None,
        })
        .collect())
}
