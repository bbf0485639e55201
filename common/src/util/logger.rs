use log::LevelFilter;

/// Installs the global logger. `RUST_LOG` overrides the default level.
pub fn init() {
    let _ = env_logger::builder()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}
