//! Backoff calculator (C1): pure function from attempt count to delay.

const BASE_SECONDS: u64 = 5;
const CAP_SECONDS: u64 = 300;

/// `delay(attempts) = min(base * 2^max(attempts, 0), cap)`, in seconds.
pub fn delay_seconds(attempts: u32) -> u64 {
    let factor = 1u64.checked_shl(attempts).unwrap_or(u64::MAX);
    BASE_SECONDS.saturating_mul(factor).min(CAP_SECONDS)
}

/// Format a delay for display: `Ns` under a minute, else `Mm Ss`.
pub fn format_delay(seconds: u64) -> String {
    if seconds < 60 {
        format!("{seconds}s")
    } else {
        format!("{}m {}s", seconds / 60, seconds % 60)
    }
}
