use std::path::Path;
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use tokio::process::Command;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: Option<FFProbeFormat>,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    #[serde(rename = "format_name")]
    pub format_name: Option<String>,
    pub duration: Option<String>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    #[serde(rename = "codec_type")]
    pub codec_type: Option<String>,
    #[serde(rename = "codec_name")]
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    #[serde(rename = "avg_frame_rate")]
    pub avg_frame_rate: Option<String>,
    #[serde(rename = "r_frame_rate")]
    pub r_frame_rate: Option<String>,
    #[serde(rename = "nb_frames")]
    pub nb_frames: Option<String>,
    pub duration: Option<String>,
}

/// Decoded-frame output of `ffprobe -show_entries frame=width,height`
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFrames {
    #[serde(default)]
    pub frames: Vec<FFProbeFrame>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFrame {
    pub width: Option<i32>,
    pub height: Option<i32>,
}

impl FFProbeData {
    /// First stream whose codec type is video
    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Metadata-level duration estimate: frame count divided by frame rate.
    ///
    /// Containers without `nb_frames` (Matroska, WebM) get their frame count
    /// from the stream or format duration. Returns `None` when either figure
    /// is missing or not positive.
    pub fn duration_from_metadata(&self) -> Option<f64> {
        let stream = self.video_stream()?;
        let fps = stream.frame_rate()?;

        let frame_count = stream
            .nb_frames
            .as_deref()
            .and_then(|n| n.parse::<f64>().ok())
            .filter(|&n| n > 0.0)
            .or_else(|| {
                let seconds = stream
                    .duration
                    .as_deref()
                    .or_else(|| self.format.as_ref().and_then(|f| f.duration.as_deref()))
                    .and_then(|d| d.parse::<f64>().ok())?;
                Some((seconds * fps).round())
            })?;

        if frame_count <= 0.0 {
            return None;
        }

        Some(frame_count / fps)
    }

    /// Pixel dimensions of the first video stream, if both are positive
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let stream = self.video_stream()?;
        positive_dimensions(stream.width, stream.height)
    }
}

impl FFProbeStream {
    /// Frame rate from `avg_frame_rate`, falling back to `r_frame_rate`
    pub fn frame_rate(&self) -> Option<f64> {
        self.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| self.r_frame_rate.as_deref().and_then(parse_frame_rate))
    }
}

impl FFProbeFrames {
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let frame = self.frames.first()?;
        positive_dimensions(frame.width, frame.height)
    }
}

fn positive_dimensions(width: Option<i32>, height: Option<i32>) -> Option<(u32, u32)> {
    match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => Some((w as u32, h as u32)),
        _ => None,
    }
}

/// Parse a frame rate such as "30/1", "30000/1001" or "29.97"
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<f64> {
    if let Some((num_str, den_str)) = frame_rate_str.split_once('/') {
        if let (Ok(num), Ok(den)) = (num_str.parse::<f64>(), den_str.parse::<f64>()) {
            if den != 0.0 && num > 0.0 {
                return Some(num / den);
            }
        }
        return None;
    }

    frame_rate_str
        .parse::<f64>()
        .ok()
        .filter(|&f| f > 0.0 && f < 1000.0)
}

/// Execute ffprobe with the given arguments and return its stdout
pub async fn execute_ffprobe_raw(ffprobe_bin: &Path, args: &[String]) -> Result<String> {
    use log::debug;

    debug!("Executing FFprobe with args: {}", args.join(" "));

    let output = Command::new(ffprobe_bin)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .with_context(|| format!(
            "Failed to execute FFprobe. Ensure FFprobe is installed and accessible at: {}",
            ffprobe_bin.display()
        ))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "FFprobe failed (exit code {}): {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    String::from_utf8(output.stdout).context("FFprobe output is not valid UTF-8")
}

/// Read stream and format metadata for a file
pub async fn probe_file(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeData> {
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        "-show_streams".to_string(),
        "-show_format".to_string(),
        file_path.to_string_lossy().to_string(),
    ];
    let json_str = execute_ffprobe_raw(ffprobe_bin, &args).await?;

    serde_json::from_str(&json_str)
        .with_context(|| format!("Failed to parse ffprobe JSON for: {}", file_path.display()))
}

/// Decode the first video frame and report its size
pub async fn probe_first_frame(ffprobe_bin: &Path, file_path: &Path) -> Result<FFProbeFrames> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-select_streams".to_string(),
        "v:0".to_string(),
        "-read_intervals".to_string(),
        "%+#1".to_string(),
        "-show_entries".to_string(),
        "frame=width,height".to_string(),
        "-print_format".to_string(),
        "json".to_string(),
        file_path.to_string_lossy().to_string(),
    ];
    let json_str = execute_ffprobe_raw(ffprobe_bin, &args).await?;

    serde_json::from_str(&json_str)
        .with_context(|| format!("Failed to parse ffprobe frame JSON for: {}", file_path.display()))
}
