use crate::config::toml_config::{LogFormat, LoggingConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_compact_logger(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("course_registry={},warn", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

pub fn init_json_logger(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("course_registry={},warn", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json(), // 結構化輸出，方便集中收集
        )
        .init();
}

/// 依設定檔選擇輸出格式；`verbose` 會把等級提高到 debug
pub fn init_from_config(config: &LoggingConfig, verbose: bool) {
    let level = if verbose { "debug" } else { config.level() };
    match config.format {
        LogFormat::Json => init_json_logger(level),
        LogFormat::Compact => init_compact_logger(level),
    }
}
