use std::path::{Path, PathBuf};
use async_trait::async_trait;
use log::{debug, error, warn};

use crate::ffprobe;

/// Video file extensions accepted into either collection
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mkv", "mov", "wmv", "flv"];

/// Check the extension of a path against [`VIDEO_EXTENSIONS`]
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Source of media properties.
///
/// Implementations never fail: an unreadable file reports a duration of 0 and
/// no dimensions so that callers importing many files can skip it and move on.
#[async_trait]
pub trait MediaProbe: Send + Sync {
    /// Duration in seconds, or 0.0 if the file is unusable
    async fn probe_duration(&self, path: &Path) -> f64;

    /// Pixel size of the first video stream
    async fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)>;
}

/// [`MediaProbe`] backed by the ffprobe binary
#[derive(Debug, Clone)]
pub struct FfprobeProbe {
    ffprobe_bin: PathBuf,
}

impl FfprobeProbe {
    pub fn new(ffprobe_bin: impl Into<PathBuf>) -> Self {
        Self { ffprobe_bin: ffprobe_bin.into() }
    }
}

#[async_trait]
impl MediaProbe for FfprobeProbe {
    async fn probe_duration(&self, path: &Path) -> f64 {
        let meta = match ffprobe::probe_file(&self.ffprobe_bin, path).await {
            Ok(m) => m,
            Err(e) => {
                error!("Cannot open video {}: {:#}", path.display(), e);
                return 0.0;
            }
        };

        match meta.duration_from_metadata() {
            Some(seconds) if seconds > 0.0 => {
                debug!("Probed {}: {:.2}s", path.display(), seconds);
                seconds
            }
            _ => {
                let stream = meta.video_stream();
                error!(
                    "Invalid video parameters for {}: fps={:?}, frames={:?}",
                    path.display(),
                    stream.and_then(|s| s.frame_rate()),
                    stream.and_then(|s| s.nb_frames.clone())
                );
                0.0
            }
        }
    }

    async fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        match ffprobe::probe_file(&self.ffprobe_bin, path).await {
            Ok(meta) => {
                if let Some(dims) = meta.dimensions() {
                    debug!("Dimensions of {} from metadata: {}x{}", path.display(), dims.0, dims.1);
                    return Some(dims);
                }
            }
            Err(e) => warn!("Metadata dimension lookup failed for {}: {:#}", path.display(), e),
        }

        // No usable stream header, decode the first frame instead
        match ffprobe::probe_first_frame(&self.ffprobe_bin, path).await {
            Ok(frames) => {
                let dims = frames.dimensions();
                match dims {
                    Some((w, h)) => debug!("Dimensions of {} from first frame: {}x{}", path.display(), w, h),
                    None => warn!("First frame of {} carries no usable size", path.display()),
                }
                dims
            }
            Err(e) => {
                warn!("First frame decode failed for {}: {:#}", path.display(), e);
                None
            }
        }
    }
}
