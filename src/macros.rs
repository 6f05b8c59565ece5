/// Similar to `info!` macro in tracing.
/// You can pass in the starting time and it will log how long it took from starting time to now.
/// ```ignore
/// info_time!("str {}, {}", 1, 2);
/// let time = chrono::Local::now();
/// info_time!(time, "str {}, {}", 1, 2);
/// ```
#[macro_export]
macro_rules! info_time {
    ($strfm:literal $(,)? $($arg:expr),*) => {{
        ::tracing::info!("{}", format!($strfm, $($arg),*));
    }};
    ($time:expr, $strfm:literal $(,)? $($arg:expr),*) => {{
        let run_time = $crate::macros::secs_since($time);
        ::tracing::info!(runtime_secs = run_time, "{}", format!($strfm, $($arg),*));
    }};
}

/// Seconds elapsed between `start` and now, with microsecond precision.
pub fn secs_since(start: chrono::DateTime<chrono::Local>) -> f64 {
    (chrono::Local::now() - start)
        .num_microseconds()
        .map(|n| n as f64 / 1_000_000.0)
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Local};

    use super::secs_since;

    #[test]
    fn secs_since_counts_forward() {
        let start = Local::now() - Duration::milliseconds(1500);
        let secs = secs_since(start);
        assert!(secs >= 1.5, "got {secs}");
        assert!(secs < 60.0, "got {secs}");
    }
}
