use std::path::Path;

use crate::encoder::EncoderProfile;

/// AAC settings of the passthrough audio track
pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "320k";
pub const AUDIO_SAMPLE_RATE: &str = "48000";

/// Everything the blend command depends on besides file paths
#[derive(Debug, Clone)]
pub struct BlendParams<'a> {
    pub width: u32,
    pub height: u32,
    /// Overlay alpha, 0.0-1.0
    pub alpha: f64,
    pub profile: &'a EncoderProfile,
}

/// Command builder for generating FFmpeg command lines
#[derive(Debug, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        CommandBuilder
    }

    /// Compositing graph: overlay scaled to the main frame, faded to `alpha`
    /// and laid on top; output ends with the shorter input.
    pub fn filter_graph(&self, width: u32, height: u32, alpha: f64) -> String {
        format!(
            "[1:v]scale={w}:{h}[scaled];\
             [scaled]format=rgba,colorchannelmixer=aa={a}[overlay];\
             [0:v]format=rgba[base];\
             [base][overlay]overlay=0:0:shortest=1,format=yuv420p[outv]",
            w = width,
            h = height,
            a = alpha
        )
    }

    /// Build the full blend command (arguments after the ffmpeg binary)
    ///
    /// - input 0 is the main video, input 1 the overlay
    /// - composited video from the filter graph plus the main audio, re-encoded to AAC
    /// - video encoder and tuning table from the negotiated profile
    pub fn build_blend_command(
        &self,
        main: &Path,
        overlay: &Path,
        output: &Path,
        params: &BlendParams<'_>,
    ) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-y".to_string());
        args.push("-hide_banner".to_string());

        args.push("-hwaccel".to_string());
        args.push(params.profile.hwaccel_hint().to_string());

        args.push("-i".to_string());
        args.push(main.to_string_lossy().to_string());
        args.push("-i".to_string());
        args.push(overlay.to_string_lossy().to_string());

        args.push("-filter_complex".to_string());
        args.push(self.filter_graph(params.width, params.height, params.alpha));

        // Audio is optional so silent main videos still encode
        args.push("-map".to_string());
        args.push("[outv]".to_string());
        args.push("-map".to_string());
        args.push("0:a?".to_string());

        args.push("-c:a".to_string());
        args.push(AUDIO_CODEC.to_string());
        args.push("-b:a".to_string());
        args.push(AUDIO_BITRATE.to_string());
        args.push("-ar".to_string());
        args.push(AUDIO_SAMPLE_RATE.to_string());

        args.push("-c:v".to_string());
        args.push(params.profile.encoder_id.clone());
        for (key, value) in &params.profile.params {
            args.push(format!("-{}", key));
            args.push(value.clone());
        }

        args.push("-shortest".to_string());

        // Output file
        args.push(output.to_string_lossy().to_string());

        args
    }
}
