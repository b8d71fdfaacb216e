//! Timestamp utilities

use chrono::{DateTime, Utc};

/// Whole minutes between two instants (negative if `end` precedes `start`)
pub fn minutes_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    (end - start).num_minutes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_minutes_between() {
        let start = Utc::now();
        assert_eq!(minutes_between(start, start + Duration::minutes(90)), 90);
        assert_eq!(minutes_between(start + Duration::minutes(30), start), -30);
    }

    #[test]
    fn test_partial_minutes_truncate() {
        let start = Utc::now();
        assert_eq!(minutes_between(start, start + Duration::seconds(119)), 1);
    }
}
