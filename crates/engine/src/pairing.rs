use std::path::PathBuf;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::media::Collection;

/// Overlays may run at most this many times longer than the main video
pub const MAX_DURATION_FACTOR: f64 = 3.0;

/// Overlays whose duration lies in `[main, 3 x main]`, in collection order
pub fn suitable_overlays(main_duration: f64, overlays: &Collection) -> Vec<PathBuf> {
    if main_duration <= 0.0 {
        return Vec::new();
    }

    let min_duration = main_duration;
    let max_duration = main_duration * MAX_DURATION_FACTOR;

    let suitable: Vec<PathBuf> = overlays
        .iter()
        .filter(|overlay| {
            let fits = (min_duration..=max_duration).contains(&overlay.duration);
            debug!(
                "Overlay {} ({:.2}s) against window {:.2}-{:.2}s: {}",
                overlay.label(), overlay.duration, min_duration, max_duration,
                if fits { "fits" } else { "rejected" }
            );
            fits
        })
        .map(|overlay| overlay.path.clone())
        .collect();

    if suitable.is_empty() {
        warn!(
            "No suitable overlay among {} candidates for a {:.2}s main video",
            overlays.len(), main_duration
        );
    } else {
        info!("Found {} suitable overlay(s) for a {:.2}s main video", suitable.len(), main_duration);
    }

    suitable
}

/// Uniform random choice among suitable overlays with an explicit RNG
#[derive(Debug)]
pub struct OverlayPicker {
    rng: StdRng,
}

impl OverlayPicker {
    /// Reproducible picker for tests and repeatable batches
    pub fn seeded(seed: u64) -> Self {
        Self { rng: StdRng::seed_from_u64(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { rng: StdRng::from_entropy() }
    }

    pub fn new(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_else(Self::from_entropy)
    }

    /// Pick an overlay for a main video, `None` when nothing fits
    pub fn select_overlay(&mut self, main_duration: f64, overlays: &Collection) -> Option<PathBuf> {
        let suitable = suitable_overlays(main_duration, overlays);
        suitable.choose(&mut self.rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaAsset;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn overlays(durations: &[f64]) -> Collection {
        durations
            .iter()
            .enumerate()
            .map(|(i, d)| MediaAsset::new(format!("/o/{}.mp4", i), *d))
            .collect()
    }

    #[test]
    fn test_window_is_closed_interval() {
        let c = overlays(&[5.0, 10.0, 30.0, 31.0]);
        let suitable = suitable_overlays(10.0, &c);
        assert_eq!(suitable, vec![PathBuf::from("/o/1.mp4"), PathBuf::from("/o/2.mp4")]);
    }

    #[test]
    fn test_just_below_main_duration_excluded() {
        let c = overlays(&[9.999]);
        assert!(suitable_overlays(10.0, &c).is_empty());
    }

    #[test]
    fn test_empty_window_selects_nothing() {
        let c = overlays(&[1.0, 2.0]);
        let mut picker = OverlayPicker::seeded(7);
        assert_eq!(picker.select_overlay(10.0, &c), None);
    }

    #[test]
    fn test_seeded_picker_is_reproducible() {
        let c = overlays(&[10.0, 12.0, 15.0, 20.0, 25.0]);
        let picks = |seed| {
            let mut picker = OverlayPicker::seeded(seed);
            (0..20).map(|_| picker.select_overlay(10.0, &c).unwrap()).collect::<Vec<_>>()
        };
        assert_eq!(picks(99), picks(99));
    }

    #[test]
    fn test_picker_reaches_every_candidate() {
        let c = overlays(&[10.0, 12.0, 15.0]);
        let mut picker = OverlayPicker::seeded(1);
        let seen: HashSet<_> = (0..200).filter_map(|_| picker.select_overlay(10.0, &c)).collect();
        assert_eq!(seen.len(), 3);
    }

    proptest! {
        /// Every overlay chosen for a main video lies within [m, 3m]
        #[test]
        fn test_selected_overlay_in_window(
            main in 0.5f64..600.0,
            durations in prop::collection::vec(0.1f64..2000.0, 0..20),
            seed in any::<u64>(),
        ) {
            let c = overlays(&durations);
            let mut picker = OverlayPicker::seeded(seed);
            if let Some(path) = picker.select_overlay(main, &c) {
                let d = c.get(&path).unwrap().duration;
                prop_assert!(main <= d && d <= 3.0 * main);
            }

            let suitable = suitable_overlays(main, &c);
            let expected = durations.iter().filter(|d| main <= **d && **d <= 3.0 * main).count();
            prop_assert_eq!(suitable.len(), expected);
        }
    }
}
