//! Fixed names used to locate configuration and log files

pub const APP_DIR: &str = "strand";

pub const CONFIG_FILE: &str = "config.toml";

pub const LOGS_DIR: &str = "logs";

/// Pool key used when none is given
pub const DEFAULT_POOL_KEY: &str = "default";
