use chrono::{DateTime, Utc};

/// Wall clock used for session timing.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Whole minutes from `since` to `until`, truncated, never negative.
pub fn whole_minutes(since: DateTime<Utc>, until: DateTime<Utc>) -> i64 {
    (until - since).num_minutes().max(0)
}

/// Open-ended bounds are unrestricted; both ends are inclusive.
pub fn within_window(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>, at: DateTime<Utc>) -> bool {
    start.map_or(true, |s| s <= at) && end.map_or(true, |e| at <= e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn partial_minutes_are_truncated() {
        let t = now();
        assert_eq!(whole_minutes(t, t + Duration::seconds(119)), 1);
        assert_eq!(whole_minutes(t, t - Duration::minutes(5)), 0);
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let t = now();
        assert!(within_window(None, None, t));
        assert!(within_window(Some(t), Some(t), t));
        assert!(!within_window(None, Some(t - Duration::seconds(1)), t));
    }
}
