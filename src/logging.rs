use log::LevelFilter;
use std::sync::OnceLock;

static LOGGER_INIT: OnceLock<()> = OnceLock::new();

#[cfg(target_os = "macos")]
pub fn init() {
    use oslog::OsLogger;

    LOGGER_INIT.get_or_init(|| {
        OsLogger::new("com.ytorganizer.cli")
            .level_filter(LevelFilter::Info)
            .init()
            .expect("failed to initialize unified logging");
    });
}

/// Falls back to stderr logging; `RUST_LOG` overrides the default `info` level.
#[cfg(not(target_os = "macos"))]
pub fn init() {
    LOGGER_INIT.get_or_init(|| {
        env_logger::Builder::new()
            .filter_level(LevelFilter::Info)
            .parse_default_env()
            .format_timestamp(None)
            .init();
    });
}
