//! Human-readable sizes, speeds and time estimates.

const K: f64 = 1024.0;
const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
const SPEED_UNITS: [&str; 3] = ["B/s", "KB/s", "MB/s"];

/// Index of the largest unit not exceeding `value`, clamped to `max`.
fn unit_index(value: f64, max: usize) -> usize {
    let mut i = 0;
    let mut v = value;
    while v >= K && i < max {
        v /= K;
        i += 1;
    }
    i
}

/// Renders `value` with at most `decimals` places, trailing zeros dropped.
fn trim_decimals(value: f64, decimals: usize) -> String {
    let s = format!("{value:.decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

/// Formats a byte count, e.g. `1536` -> `"1.5 KB"`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".into();
    }
    let b = bytes as f64;
    let i = unit_index(b, SIZE_UNITS.len() - 1);
    let value = b / K.powi(i as i32);
    format!("{} {}", trim_decimals(value, 2), SIZE_UNITS[i])
}

/// Formats a transfer rate in bytes/sec, e.g. `2048.0` -> `"2 KB/s"`.
pub fn format_upload_speed(bytes_per_second: f64) -> String {
    if bytes_per_second <= 0.0 || !bytes_per_second.is_finite() {
        return "0 KB/s".into();
    }
    let i = unit_index(bytes_per_second, SPEED_UNITS.len() - 1);
    let value = bytes_per_second / K.powi(i as i32);
    format!("{} {}", trim_decimals(value, 1), SPEED_UNITS[i])
}

/// Estimates the time left for a transfer.
pub fn calculate_eta(uploaded_bytes: u64, total_bytes: u64, bytes_per_second: f64) -> String {
    if bytes_per_second <= 0.0 || uploaded_bytes == 0 {
        return "Calculating...".into();
    }
    let remaining = total_bytes.saturating_sub(uploaded_bytes) as f64;
    let secs = (remaining / bytes_per_second).ceil() as u64;

    if secs < 60 {
        format!("{secs}s remaining")
    } else if secs < 3600 {
        format!("{}m remaining", secs.div_ceil(60))
    } else {
        format!("{}h remaining", secs.div_ceil(3600))
    }
}
