use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};

/// A probed video file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAsset {
    pub path: PathBuf,
    /// Seconds; 0 means the file could not be probed
    pub duration: f64,
    pub dimensions: Option<(u32, u32)>,
}

impl MediaAsset {
    pub fn new(path: impl Into<PathBuf>, duration: f64) -> Self {
        Self {
            path: path.into(),
            duration,
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.dimensions = Some((width, height));
        self
    }

    pub fn is_probed(&self) -> bool {
        self.duration > 0.0
    }

    /// File name without extension, used in output names
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File name for status and log lines
    pub fn label(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Which side of a pairing a collection feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    /// Group A: videos that each produce one output
    Main,
    /// Group B: videos composited on top at low opacity
    Overlay,
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Main => write!(f, "main"),
            Group::Overlay => write!(f, "overlay"),
        }
    }
}

/// Insertion-ordered set of probed assets keyed by path
#[derive(Debug, Clone, Default)]
pub struct Collection {
    order: Vec<PathBuf>,
    assets: HashMap<PathBuf, MediaAsset>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an asset. Unprobed assets and paths already present are refused.
    pub fn insert(&mut self, asset: MediaAsset) -> bool {
        if !asset.is_probed() || self.assets.contains_key(&asset.path) {
            return false;
        }
        self.order.push(asset.path.clone());
        self.assets.insert(asset.path.clone(), asset);
        true
    }

    pub fn remove(&mut self, path: &Path) -> Option<MediaAsset> {
        let asset = self.assets.remove(path)?;
        self.order.retain(|p| p != path);
        Some(asset)
    }

    /// Move an asset to a new path keeping its position and probed data
    pub fn rekey(&mut self, old: &Path, new: PathBuf) -> bool {
        if old == new.as_path() {
            return self.assets.contains_key(old);
        }
        if self.assets.contains_key(&new) {
            return false;
        }
        let Some(mut asset) = self.assets.remove(old) else {
            return false;
        };
        asset.path = new.clone();
        if let Some(slot) = self.order.iter_mut().find(|p| p.as_path() == old) {
            *slot = new.clone();
        }
        self.assets.insert(new, asset);
        true
    }

    pub fn get(&self, path: &Path) -> Option<&MediaAsset> {
        self.assets.get(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.assets.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Assets in insertion order
    pub fn iter(&self) -> impl Iterator<Item = &MediaAsset> + '_ {
        self.order.iter().filter_map(move |p| self.assets.get(p))
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.order
    }
}

impl FromIterator<MediaAsset> for Collection {
    fn from_iter<I: IntoIterator<Item = MediaAsset>>(iter: I) -> Self {
        let mut collection = Collection::new();
        for asset in iter {
            collection.insert(asset);
        }
        collection
    }
}
