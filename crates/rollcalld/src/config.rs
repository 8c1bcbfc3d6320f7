use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Maximum embedding distance for a positive match.
    pub match_tolerance: f32,
    /// External extractor command: reads a PNG frame on stdin, writes
    /// detected faces as JSON on stdout.
    pub extractor_cmd: String,
    /// Auto-checkout sweep: close open records this many days old or older.
    pub sweep_days: u64,
    /// Auto-checkout sweep: default checkout time (HH:MM).
    pub sweep_checkout_time: String,
    /// D-Bus well-known name to claim.
    pub bus_name: String,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            match_tolerance: env_f32("ROLLCALL_MATCH_TOLERANCE", rollcall_core::DEFAULT_TOLERANCE),
            extractor_cmd: std::env::var("ROLLCALL_EXTRACTOR_CMD")
                .unwrap_or_else(|_| "rollcall-extract".to_string()),
            sweep_days: env_u64("ROLLCALL_SWEEP_DAYS", 1),
            sweep_checkout_time: std::env::var("ROLLCALL_SWEEP_CHECKOUT_TIME")
                .unwrap_or_else(|_| "23:59".to_string()),
            bus_name: std::env::var("ROLLCALL_BUS_NAME")
                .unwrap_or_else(|_| "org.rollcall.Attendance1".to_string()),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
