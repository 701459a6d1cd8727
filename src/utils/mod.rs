//! Errors, logging, metrics and small display helpers

pub mod error;
pub mod logging;
pub mod metrics;

use std::time::Duration;

pub use error::{PipelineError, Result, ResultExt};
pub use logging::init_logging;
pub use metrics::{ConfusionMatrix, Metrics, MetricsConfig};

/// Elapsed time as `12.3s`, `4m 05s` or `2h 07m`
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    match secs {
        0..=59 => format!("{:.1}s", elapsed.as_secs_f64()),
        60..=3599 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, (secs % 3600) / 60),
    }
}

/// Count with comma-separated thousands
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let groups: Vec<&str> = digits
        .as_bytes()
        .rchunks(3)
        .rev()
        .filter_map(|chunk| std::str::from_utf8(chunk).ok())
        .collect();
    groups.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(30_500)), "30.5s");
        assert_eq!(format_duration(Duration::from_secs(65)), "1m 05s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 01m");
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(12_500), "12,500");
        assert_eq!(format_number(1_000_000), "1,000,000");
    }
}
