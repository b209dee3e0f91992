pub mod command;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ffprobe;
pub mod job;
pub mod library;
pub mod media;
pub mod naming;
pub mod pairing;
pub mod probe;
pub mod process;
pub mod progress;
pub mod scan;
pub mod scheduler;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::{BatchSettings, BlendConfig, DispatchPolicy};
pub use encoder::{negotiate, EncoderHost, EncoderKind, EncoderProfile, FfmpegHost};
pub use error::{JobError, LibraryError, SessionError, SubmitError};
pub use ffprobe::{FFProbeData, FFProbeFormat, FFProbeStream};
pub use job::{Job, JobOutcome, JobState, TranscodeJob};
pub use library::{ImportSummary, MediaLibrary};
pub use media::{Collection, Group, MediaAsset};
pub use pairing::{suitable_overlays, OverlayPicker};
pub use probe::{FfprobeProbe, MediaProbe};
pub use progress::{format_eta, Progress, ProgressTracker};
pub use scheduler::{BatchHandle, BatchReport, JobScheduler};
pub use session::{BatchStatus, Phase};
