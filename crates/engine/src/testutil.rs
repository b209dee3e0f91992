//! Test doubles shared by the unit tests: an in-memory probe, an encoder
//! host without hardware, and tiny shell scripts standing in for ffmpeg.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use anyhow::Result;
use async_trait::async_trait;
use tempfile::TempDir;

use crate::encoder::EncoderHost;
use crate::probe::MediaProbe;

/// Probe answering from a fixed table; unknown files are unprobeable
#[derive(Debug, Default)]
pub struct StaticProbe {
    entries: HashMap<PathBuf, (f64, Option<(u32, u32)>)>,
}

impl StaticProbe {
    pub fn with(mut self, path: impl Into<PathBuf>, duration: f64, dimensions: Option<(u32, u32)>) -> Self {
        self.entries.insert(path.into(), (duration, dimensions));
        self
    }
}

#[async_trait]
impl MediaProbe for StaticProbe {
    async fn probe_duration(&self, path: &Path) -> f64 {
        self.entries.get(path).map(|e| e.0).unwrap_or(0.0)
    }

    async fn probe_dimensions(&self, path: &Path) -> Option<(u32, u32)> {
        self.entries.get(path).and_then(|e| e.1)
    }
}

/// Host whose encoder list has no hardware family
pub struct SoftwareOnlyHost;

#[async_trait]
impl EncoderHost for SoftwareOnlyHost {
    async fn list_encoders(&self) -> Result<String> {
        Ok(" V....D libx264 \n".to_string())
    }

    async fn test_encode(&self, _encoder_id: &str) -> Result<bool> {
        Ok(false)
    }
}

/// Fake encoder executables. Each receives the real blend argv; the output
/// path is the last argument.
pub struct FakeTools {
    _dir: TempDir,
    /// Writes 4 bytes to the output, exits 0
    pub ok: PathBuf,
    /// Same as `ok` after a short delay
    pub slow_ok: PathBuf,
    /// Creates an empty output, exits 0
    pub touch_only: PathBuf,
    /// Writes nothing, exits 0
    pub no_output: PathBuf,
    /// Writes a partial output and an error line, exits 3
    pub fail: PathBuf,
    /// Sleeps until signalled
    pub sleeper: PathBuf,
    /// Ignores SIGTERM
    pub stubborn: PathBuf,
}

const LAST_ARG: &str = "for last; do :; done\n";

/// Scripts are written once per test binary. Writing an executable while
/// another thread forks can leave the child holding the write handle, making
/// a later exec fail with "text file busy"; every test that spawns a process
/// calls this first so all writes finish before any spawn.
pub fn fake_tools() -> &'static FakeTools {
    static TOOLS: OnceLock<FakeTools> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = TempDir::new().expect("create fake tool dir");
        let script = |name: &str, body: &str| write_script(dir.path(), name, body);

        let ok = script("ok", &format!("{}printf 'data' > \"$last\"\nexit 0\n", LAST_ARG));
        let slow_ok = script(
            "slow_ok",
            &format!("{}sleep 0.3\nprintf 'data' > \"$last\"\nexit 0\n", LAST_ARG),
        );
        let touch_only = script("touch_only", &format!("{}: > \"$last\"\nexit 0\n", LAST_ARG));
        let no_output = script("no_output", "exit 0\n");
        let fail = script(
            "fail",
            &format!(
                "{}printf 'partial' > \"$last\"\necho 'Input #0, mov,mp4' >&2\necho 'Error: boom' >&2\nexit 3\n",
                LAST_ARG
            ),
        );
        let sleeper = script("sleeper", "exec sleep 30\n");
        let stubborn = script("stubborn", "trap '' TERM\nsleep 30\n");

        FakeTools {
            _dir: dir,
            ok,
            slow_ok,
            touch_only,
            no_output,
            fail,
            sleeper,
            stubborn,
        }
    })
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).expect("write fake tool");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
    }
    path
}
