use std::sync::Mutex;
use std::time::Duration;

/// Successes required before the multiplier starts decaying.
const DECAY_AFTER_SUCCESSES: u32 = 10;
const DECAY_FACTOR: f64 = 0.95;

#[derive(Debug)]
struct RateState {
    multiplier: f64,
    consecutive_successes: u32,
}

/// Adaptive inter-request delay driven by flood-wait feedback.
///
/// The delay is `base_delay × multiplier`, with the multiplier kept in
/// `[1.0, max_multiplier]`. Flood-waits bump it up by an amount scaled to the
/// wait; a streak of successes decays it back toward 1.0. Once the streak has
/// reached the threshold every further success decays again; the counter is
/// only reset by a flood-wait.
#[derive(Debug)]
pub struct RateController {
    base_delay: Duration,
    max_multiplier: f64,
    state: Mutex<RateState>,
}

impl RateController {
    pub fn new(base_delay: Duration, max_multiplier: f64) -> Self {
        Self {
            base_delay,
            max_multiplier: max_multiplier.max(1.0),
            state: Mutex::new(RateState {
                multiplier: 1.0,
                consecutive_successes: 0,
            }),
        }
    }

    pub fn current_delay(&self) -> Duration {
        self.base_delay.mul_f64(self.multiplier())
    }

    pub fn multiplier(&self) -> f64 {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).multiplier
    }

    pub fn on_flood_wait(&self, seconds: u32) {
        let bump = match seconds {
            0..=29 => 0.3,
            30..=59 => 0.5,
            _ => 1.0,
        };
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_successes = 0;
        state.multiplier = (state.multiplier + bump).min(self.max_multiplier);
        tracing::debug!(seconds, multiplier = state.multiplier, "Rate multiplier raised");
    }

    pub fn on_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.consecutive_successes = state.consecutive_successes.saturating_add(1);
        if state.consecutive_successes >= DECAY_AFTER_SUCCESSES && state.multiplier > 1.0 {
            state.multiplier = (state.multiplier * DECAY_FACTOR).max(1.0);
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.multiplier = 1.0;
        state.consecutive_successes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RateController {
        RateController::new(Duration::from_millis(1000), 5.0)
    }

    #[test]
    fn test_bumps_by_wait_length() {
        let rc = controller();
        rc.on_flood_wait(10);
        assert!((rc.multiplier() - 1.3).abs() < 1e-9);
        rc.on_flood_wait(45);
        assert!((rc.multiplier() - 1.8).abs() < 1e-9);
        rc.on_flood_wait(120);
        assert!((rc.multiplier() - 2.8).abs() < 1e-9);
        assert!((rc.current_delay().as_secs_f64() - 2.8).abs() < 1e-6);
    }

    #[test]
    fn test_clamped_to_max() {
        let rc = controller();
        for _ in 0..20 {
            rc.on_flood_wait(300);
        }
        assert_eq!(rc.multiplier(), 5.0);
    }

    #[test]
    fn test_decay_after_ten_successes() {
        let rc = controller();
        rc.on_flood_wait(60);
        let bumped = rc.multiplier();

        for _ in 0..9 {
            rc.on_success();
        }
        assert_eq!(rc.multiplier(), bumped);

        rc.on_success();
        assert!(rc.multiplier() <= bumped * 0.95 + 1e-9);

        // Streak is not reset: the next success decays again
        let after_first = rc.multiplier();
        rc.on_success();
        assert!(rc.multiplier() < after_first);
    }

    #[test]
    fn test_never_below_one() {
        let rc = controller();
        rc.on_flood_wait(5);
        for _ in 0..200 {
            rc.on_success();
        }
        assert_eq!(rc.multiplier(), 1.0);
    }

    #[test]
    fn test_reset() {
        let rc = controller();
        rc.on_flood_wait(100);
        rc.reset();
        assert_eq!(rc.multiplier(), 1.0);
        assert_eq!(rc.current_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_concurrent_callers_stay_in_bounds() {
        let rc = std::sync::Arc::new(controller());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let rc = rc.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        if (i + j) % 3 == 0 {
                            rc.on_flood_wait(40);
                        } else {
                            rc.on_success();
                        }
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let m = rc.multiplier();
        assert!((1.0..=5.0).contains(&m));
    }
}
