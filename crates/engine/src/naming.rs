use std::path::{Path, PathBuf};

use crate::media::MediaAsset;

/// Longest file name component most filesystems accept, in bytes
pub const MAX_NAME_BYTES: usize = 255;

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Replace characters that are illegal in file names and clamp the length,
/// keeping the extension. Sanitising an already sanitised name is a no-op.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|c| if ILLEGAL_CHARS.contains(&c) || c.is_control() { '_' } else { c })
        .collect();

    if cleaned.len() <= MAX_NAME_BYTES {
        return cleaned;
    }

    let (base, ext) = match cleaned.rfind('.') {
        Some(dot) if dot > 0 && cleaned.len() - dot <= MAX_NAME_BYTES => cleaned.split_at(dot),
        _ => (cleaned.as_str(), ""),
    };

    let budget = MAX_NAME_BYTES - ext.len();
    let mut end = budget.min(base.len());
    while !base.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}{}", &base[..end], ext)
}

/// `output_<main>_C_<overlay>.mp4`, sanitised
pub fn output_file_name(main: &MediaAsset, overlay: &MediaAsset) -> String {
    sanitize_filename(&format!("output_{}_C_{}.mp4", main.stem(), overlay.stem()))
}

/// Explicit output directory when it exists, otherwise `<main dir>/output`
pub fn resolve_output_dir(explicit: Option<&Path>, main_path: &Path) -> PathBuf {
    if let Some(dir) = explicit {
        if dir.is_dir() {
            return dir.to_path_buf();
        }
    }

    main_path
        .parent()
        .map(|p| p.join("output"))
        .unwrap_or_else(|| PathBuf::from("output"))
}

/// Key identifying a pairing in the session's active-process map
pub fn job_key(main: &Path, overlay: &Path) -> String {
    format!("{}_{}", main.display(), overlay.display())
}
