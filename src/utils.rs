//! Utility functions and constants
//!
//! **Why**: Centralized helpers used across multiple modules
//!
//! **Used by**: entities, core

/// Wall-clock helpers for resource timestamps.
pub mod clock {
    use std::time::{SystemTime, UNIX_EPOCH};

    /// Current wall-clock time in milliseconds since the Unix epoch.
    ///
    /// Import/removal timestamps are plain epoch-millisecond integers so
    /// they serialize as numbers without any format negotiation.
    pub fn now_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_ms_is_positive_and_ordered() {
        let a = clock::now_ms();
        let b = clock::now_ms();
        assert!(a > 0);
        assert!(b >= a);
    }
}
