// crates/retrovue-core/src/helpers/time.rs
//
// Shared time conversions and the timecode formatter used in log lines.
// Canonical source for format_ct(); keep diagnostics from growing their
// own diverging µs formatting.

/// Format a CT value (microseconds) as `HH:MM:SS.mmm`.
///
/// Used in diagnostics where an operator needs to line a log entry up with
/// the channel schedule. Negative values (pre-epoch) are prefixed with `-`.
///
/// ```
/// use retrovue_core::helpers::time::format_ct;
/// assert_eq!(format_ct(0),             "00:00:00.000");
/// assert_eq!(format_ct(33_333),        "00:00:00.033");
/// assert_eq!(format_ct(3_661_500_000), "01:01:01.500");
/// assert_eq!(format_ct(-250_000),      "-00:00:00.250");
/// ```
pub fn format_ct(us: i64) -> String {
    let sign = if us < 0 { "-" } else { "" };
    let us = us.unsigned_abs();
    let ms    = (us / 1_000) % 1_000;
    let secs  = us / 1_000_000;
    let h = secs / 3_600;
    let m = (secs % 3_600) / 60;
    let s = secs % 60;
    format!("{sign}{h:02}:{m:02}:{s:02}.{ms:03}")
}

/// Seconds → whole microseconds, rounding to the nearest.
pub fn secs_to_us(secs: f64) -> i64 {
    (secs * 1_000_000.0).round() as i64
}

/// Microseconds → seconds.
pub fn us_to_secs(us: i64) -> f64 {
    us as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_near_frame_periods() {
        // 30 fps and 29.97 fps periods survive the µs round trip to within 1 µs.
        for period in [1.0 / 30.0, 1001.0 / 30_000.0, 1.0 / 25.0] {
            let us = secs_to_us(period);
            assert!((us_to_secs(us) - period).abs() < 1e-6);
        }
    }

    #[test]
    fn format_ct_rolls_over_units() {
        assert_eq!(format_ct(59_999_999), "00:00:59.999");
        assert_eq!(format_ct(60_000_000), "00:01:00.000");
        assert_eq!(format_ct(3_600_000_000), "01:00:00.000");
    }
}
