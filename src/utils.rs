use std::time::SystemTime;

pub fn get_epoch_time_in_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("SystemTime before UNIX EPOCH")
        .as_millis() as u64
}

pub const MS_PER_DAY: u64 = 24 * 3600 * 1000;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Bytes to decimal gigabytes, the unit the provider price tables quote.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / 1_000_000_000.0
}
