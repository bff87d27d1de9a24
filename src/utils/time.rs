use chrono::NaiveDate;

/// This is the standard way of converting a date to a ledger day key in prodtime.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Formats seconds as `HH:MM`. Minutes are truncated, never rounded.
pub fn format_hm(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    format!("{hours:02}:{minutes:02}")
}
