use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Encoder families in negotiation priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// NVIDIA NVENC (family A)
    Nvenc,
    /// AMD AMF (family B)
    Amf,
    /// libx264, always available
    Software,
}

impl EncoderKind {
    /// Hardware families tried before falling back to software
    pub const HARDWARE_PRIORITY: [EncoderKind; 2] = [EncoderKind::Nvenc, EncoderKind::Amf];

    /// Get the FFmpeg encoder name for this family
    pub fn ffmpeg_name(&self) -> &'static str {
        match self {
            EncoderKind::Nvenc => "h264_nvenc",
            EncoderKind::Amf => "h264_amf",
            EncoderKind::Software => "libx264",
        }
    }

    pub fn is_hardware(&self) -> bool {
        !matches!(self, EncoderKind::Software)
    }
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderKind::Nvenc => write!(f, "NVIDIA NVENC"),
            EncoderKind::Amf => write!(f, "AMD AMF"),
            EncoderKind::Software => write!(f, "software x264"),
        }
    }
}

/// Encoder choice plus its fixed tuning table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub kind: EncoderKind,
    pub encoder_id: String,
    /// Ordered `(option, value)` pairs, emitted as `-option value`
    pub params: Vec<(String, String)>,
}

fn table(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

impl EncoderProfile {
    pub fn for_kind(kind: EncoderKind) -> Self {
        let params = match kind {
            EncoderKind::Nvenc => table(&[
                ("preset", "p1"),
                ("rc", "vbr"),
                ("b:v", "8M"),
                ("maxrate", "12M"),
                ("bufsize", "16M"),
                ("profile:v", "high"),
                ("level", "5.2"),
                ("spatial-aq", "1"),
                ("temporal-aq", "1"),
                ("cq", "16"),
                ("qmin", "1"),
                ("qmax", "51"),
                ("rc-lookahead", "32"),
            ]),
            EncoderKind::Amf => table(&[
                ("preset", "quality"),
                ("quality", "quality"),
                ("rc", "vbr_peak"),
                ("b:v", "8M"),
                ("maxrate", "12M"),
                ("bufsize", "16M"),
                ("profile:v", "high"),
                ("qmin", "1"),
                ("qmax", "51"),
            ]),
            EncoderKind::Software => table(&[
                ("preset", "slower"),
                ("b:v", "8M"),
                ("maxrate", "12M"),
                ("bufsize", "16M"),
                ("profile:v", "high"),
                ("level", "5.2"),
                ("movflags", "+faststart"),
                ("tune", "film"),
                (
                    "x264opts",
                    "me=umh:subme=10:ref=5:b-adapt=2:direct=auto:rc-lookahead=60:no-fast-pskip=1:no-dct-decimate=1",
                ),
                ("psy-rd", "1.0:0.15"),
            ]),
        };

        Self {
            kind,
            encoder_id: kind.ffmpeg_name().to_string(),
            params,
        }
    }

    pub fn software() -> Self {
        Self::for_kind(EncoderKind::Software)
    }

    /// Value passed to `-hwaccel`
    pub fn hwaccel_hint(&self) -> &'static str {
        if self.kind.is_hardware() { "auto" } else { "none" }
    }
}

/// The machine's encoder tool as seen by negotiation
#[async_trait]
pub trait EncoderHost: Send + Sync {
    /// Raw encoder listing (`ffmpeg -encoders`)
    async fn list_encoders(&self) -> Result<String>;

    /// Run a short synthetic encode; `Ok(true)` when it exits 0
    async fn test_encode(&self, encoder_id: &str) -> Result<bool>;
}

/// [`EncoderHost`] that shells out to ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegHost {
    ffmpeg_bin: PathBuf,
}

impl FfmpegHost {
    pub fn new(ffmpeg_bin: impl Into<PathBuf>) -> Self {
        Self { ffmpeg_bin: ffmpeg_bin.into() }
    }
}

#[async_trait]
impl EncoderHost for FfmpegHost {
    async fn list_encoders(&self) -> Result<String> {
        let output = Command::new(&self.ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-encoders")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to query FFmpeg encoders at: {}", self.ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg encoder query failed"));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn test_encode(&self, encoder_id: &str) -> Result<bool> {
        let status = Command::new(&self.ffmpeg_bin)
            .args(["-hide_banner", "-f", "lavfi", "-i", "color=black:s=1280x720:r=30", "-t", "1"])
            .arg("-c:v")
            .arg(encoder_id)
            .args(["-f", "null", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to run {} capability test", encoder_id))?;

        debug!("Capability test for {} exited with {:?}", encoder_id, status.code());
        Ok(status.success())
    }
}

/// Choose the encoder for a batch.
///
/// Hardware families must both appear in the encoder listing and pass a live
/// one second encode. Any error while probing counts as "unavailable"; the
/// software profile is always the final answer when nothing else passes.
pub async fn negotiate(host: &dyn EncoderHost, prefer_hardware: bool) -> EncoderProfile {
    if !prefer_hardware {
        info!("🎬 Hardware encoding disabled, using {}", EncoderKind::Software);
        return EncoderProfile::software();
    }

    let listing = match host.list_encoders().await {
        Ok(listing) => listing,
        Err(e) => {
            warn!("Encoder listing failed, hardware encoding unavailable: {:#}", e);
            return EncoderProfile::software();
        }
    };

    for kind in EncoderKind::HARDWARE_PRIORITY {
        let name = kind.ffmpeg_name();
        if !listing.contains(name) {
            debug!("{} not listed by the encoder tool", name);
            continue;
        }

        match host.test_encode(name).await {
            Ok(true) => {
                info!("🎬 Selected encoder: {} ({})", kind, name);
                return EncoderProfile::for_kind(kind);
            }
            Ok(false) => warn!("{} is listed but its capability test failed", name),
            Err(e) => warn!("{} capability test could not run: {:#}", name, e),
        }
    }

    warn!("Hardware acceleration unavailable, using {}", EncoderKind::Software);
    EncoderProfile::software()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Scripted host recording which encoders were test-run
    struct FakeHost {
        listing: Result<String, String>,
        passing: HashSet<&'static str>,
        erroring: HashSet<&'static str>,
        tested: Mutex<Vec<String>>,
    }

    impl FakeHost {
        fn new(listing: &str, passing: &[&'static str]) -> Self {
            Self {
                listing: Ok(listing.to_string()),
                passing: passing.iter().copied().collect(),
                erroring: HashSet::new(),
                tested: Mutex::new(Vec::new()),
            }
        }

        fn tested(&self) -> Vec<String> {
            self.tested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl EncoderHost for FakeHost {
        async fn list_encoders(&self) -> Result<String> {
            self.listing.clone().map_err(|e| anyhow!(e))
        }

        async fn test_encode(&self, encoder_id: &str) -> Result<bool> {
            self.tested.lock().unwrap().push(encoder_id.to_string());
            if self.erroring.contains(encoder_id) {
                return Err(anyhow!("driver crashed"));
            }
            Ok(self.passing.contains(encoder_id))
        }
    }

    const LISTING: &str = " V....D libx264 \n V....D h264_nvenc \n V....D h264_amf \n";

    #[tokio::test]
    async fn test_software_when_hardware_not_preferred() {
        let host = FakeHost::new(LISTING, &["h264_nvenc", "h264_amf"]);
        let profile = negotiate(&host, false).await;
        assert_eq!(profile.kind, EncoderKind::Software);
        assert!(host.tested().is_empty());
    }

    #[tokio::test]
    async fn test_family_a_preferred() {
        let host = FakeHost::new(LISTING, &["h264_nvenc", "h264_amf"]);
        let profile = negotiate(&host, true).await;
        assert_eq!(profile.kind, EncoderKind::Nvenc);
        assert_eq!(profile.encoder_id, "h264_nvenc");
        assert_eq!(host.tested(), vec!["h264_nvenc"]);
    }

    #[tokio::test]
    async fn test_family_b_when_a_fails_capability_test() {
        let host = FakeHost::new(LISTING, &["h264_amf"]);
        let profile = negotiate(&host, true).await;
        assert_eq!(profile.kind, EncoderKind::Amf);
        assert_eq!(host.tested(), vec!["h264_nvenc", "h264_amf"]);
    }

    #[tokio::test]
    async fn test_unlisted_family_never_tested() {
        let host = FakeHost::new(" V....D libx264 \n V....D h264_amf \n", &["h264_nvenc", "h264_amf"]);
        let profile = negotiate(&host, true).await;
        assert_eq!(profile.kind, EncoderKind::Amf);
        assert_eq!(host.tested(), vec!["h264_amf"]);
    }

    #[tokio::test]
    async fn test_falls_back_to_software_when_no_family_passes() {
        let host = FakeHost::new(LISTING, &[]);
        let profile = negotiate(&host, true).await;
        assert_eq!(profile, EncoderProfile::software());
    }

    #[tokio::test]
    async fn test_errors_count_as_unavailable() {
        let mut host = FakeHost::new(LISTING, &["h264_amf"]);
        host.erroring.insert("h264_nvenc");
        assert_eq!(negotiate(&host, true).await.kind, EncoderKind::Amf);

        let mut broken = FakeHost::new("", &[]);
        broken.listing = Err("ffmpeg missing".to_string());
        assert_eq!(negotiate(&broken, true).await.kind, EncoderKind::Software);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_binary_falls_back() {
        let _tools = crate::testutil::fake_tools();
        let host = FfmpegHost::new("/nonexistent/ffmpeg");
        assert_eq!(negotiate(&host, true).await.kind, EncoderKind::Software);
    }

    #[test]
    fn test_parameter_tables() {
        let nvenc = EncoderProfile::for_kind(EncoderKind::Nvenc);
        assert_eq!(nvenc.params.first(), Some(&("preset".to_string(), "p1".to_string())));
        assert_eq!(nvenc.hwaccel_hint(), "auto");

        let amf = EncoderProfile::for_kind(EncoderKind::Amf);
        assert!(amf.params.contains(&("rc".to_string(), "vbr_peak".to_string())));

        let sw = EncoderProfile::software();
        assert_eq!(sw.encoder_id, "libx264");
        assert_eq!(sw.hwaccel_hint(), "none");
        assert!(sw.params.contains(&("tune".to_string(), "film".to_string())));
    }
}
