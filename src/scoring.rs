//! Popularity scoring for search results.
//!
//! `score = W_STARS * ln(1 + stars) + W_FORKS * ln(1 + forks) + W_RECENCY * decay`,
//! where `decay` halves every [`HALF_LIFE_DAYS`] since the last update.

use chrono::{DateTime, Utc};

const W_STARS: f64 = 1.0;
const W_FORKS: f64 = 0.8;
const W_RECENCY: f64 = 3.0;

/// Days for the recency bonus to fall to half.
pub const HALF_LIFE_DAYS: f64 = 14.0;

const SECS_PER_DAY: f64 = 60.0 * 60.0 * 24.0;

/// Freshness in `(0, 1]`: 1 for an update at `now`, 0.5 after `half_life_days`.
///
/// Timestamps in the future count as "now".
pub fn recency_decay(updated_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    let days = ((now - updated_at).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY).max(0.0);
    (-std::f64::consts::LN_2 * days / half_life_days).exp()
}

/// Combined popularity score, rounded to six decimals.
pub fn popularity_score(stars: u64, forks: u64, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let stars_term = W_STARS * (stars as f64).ln_1p();
    let forks_term = W_FORKS * (forks as f64).ln_1p();
    let recency_term = W_RECENCY * recency_decay(updated_at, now, HALF_LIFE_DAYS);
    round6(stars_term + forks_term + recency_term)
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn decay_is_one_for_now() {
        assert!((recency_decay(now(), now(), HALF_LIFE_DAYS) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn decay_halves_after_half_life() {
        let updated = now() - Duration::days(14);
        assert!((recency_decay(updated, now(), HALF_LIFE_DAYS) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn future_timestamps_clamp_to_now() {
        let updated = now() + Duration::days(3);
        assert!((recency_decay(updated, now(), HALF_LIFE_DAYS) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn score_increases_with_stars_and_forks() {
        let base = popularity_score(0, 0, now(), now());
        assert!(popularity_score(100, 0, now(), now()) > base);
        assert!(popularity_score(0, 100, now(), now()) > base);
    }

    #[test]
    fn score_rewards_recency() {
        let stale = Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap();
        assert!(popularity_score(5, 3, now(), now()) > popularity_score(5, 3, stale, now()));
    }

    #[test]
    fn score_is_rounded_to_six_decimals() {
        let score = popularity_score(10, 2, now() - Duration::hours(7), now());
        assert_eq!(score, round6(score));
        // Fresh repo with no stars or forks scores exactly the recency weight.
        assert_eq!(popularity_score(0, 0, now(), now()), 3.0);
    }
}
