use std::time::Duration;
use serde::Serialize;

/// Derived batch progress
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    /// 0.0-100.0
    pub percentage: f64,
    /// Remaining time, unknown until one item has been processed
    pub eta: Option<Duration>,
}

/// Pure progress/ETA computation
pub struct ProgressTracker;

impl ProgressTracker {
    /// Percentage done and estimated time left from the average time per item
    pub fn update(processed: usize, total: usize, elapsed: Duration) -> Progress {
        let percentage = if total == 0 {
            0.0
        } else {
            100.0 * processed as f64 / total as f64
        };

        let eta = if processed == 0 {
            None
        } else {
            let remaining = total.saturating_sub(processed) as f64;
            Some(Duration::from_secs_f64(elapsed.as_secs_f64() / processed as f64 * remaining))
        };

        Progress { percentage, eta }
    }
}

/// `MM:SS`, or `--:--` while unknown
pub fn format_eta(eta: Option<Duration>) -> String {
    match eta {
        Some(d) => {
            let secs = d.as_secs();
            format!("{:02}:{:02}", secs / 60, secs % 60)
        }
        None => "--:--".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_batch() {
        let p = ProgressTracker::update(0, 0, Duration::from_secs(3));
        assert_eq!(p.percentage, 0.0);
        assert_eq!(p.eta, None);
    }

    #[test]
    fn test_eta_unknown_before_first_item() {
        let p = ProgressTracker::update(0, 10, Duration::from_secs(30));
        assert_eq!(p.eta, None);
        assert_eq!(format_eta(p.eta), "--:--");
    }

    #[test]
    fn test_eta_from_average_item_time() {
        let p = ProgressTracker::update(2, 5, Duration::from_secs(60));
        assert_eq!(p.percentage, 40.0);
        assert_eq!(p.eta, Some(Duration::from_secs(90)));
        assert_eq!(format_eta(p.eta), "01:30");
    }

    #[test]
    fn test_finished_batch() {
        let p = ProgressTracker::update(4, 4, Duration::from_secs(100));
        assert_eq!(p.percentage, 100.0);
        assert_eq!(p.eta, Some(Duration::ZERO));
    }

    proptest! {
        #[test]
        fn test_percentage_bounds(total in 1usize..10_000, frac in 0.0f64..=1.0, secs in 0u64..100_000) {
            let processed = ((total as f64) * frac).floor() as usize;
            let p = ProgressTracker::update(processed, total, Duration::from_secs(secs));
            prop_assert!((0.0..=100.0).contains(&p.percentage));
            if processed > 0 {
                let eta = p.eta.unwrap().as_secs_f64();
                let expected = secs as f64 / processed as f64 * (total - processed) as f64;
                prop_assert!((eta - expected).abs() < 1e-3 * expected.max(1.0));
            }
        }
    }
}
