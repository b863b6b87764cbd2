// tests/logging.rs

use streamsheets::cli::LogLevel;
use streamsheets::logging::resolve_level;
use tracing::Level;

#[test]
fn cli_level_wins_over_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Trace), Some("error")), Level::TRACE);
    assert_eq!(resolve_level(Some(LogLevel::Warn), None), Level::WARN);
}

#[test]
fn environment_is_used_without_cli_level() {
    assert_eq!(resolve_level(None, Some("debug")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("  Warning ")), Level::WARN);
}

#[test]
fn unknown_or_missing_values_default_to_info() {
    assert_eq!(resolve_level(None, None), Level::INFO);
    assert_eq!(resolve_level(None, Some("chatty")), Level::INFO);
}
