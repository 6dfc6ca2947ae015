//! File output of the logging setup.
//!
//! Installing a global subscriber is one-shot per process, so this file
//! holds a single test.

use std::fs;
use std::process;

use mortem_utils::{init_logging_to_file, LogFormat, LogLevel};

#[test]
fn test_file_logging_writes_json_lines()
{
    let dir = std::env::temp_dir().join(format!("mortem-utils-log-{}", process::id()));
    let path = dir.join("nested").join("session.log");

    let guard = init_logging_to_file(&path, LogLevel::Debug, LogFormat::Json).unwrap();
    assert!(guard.has_file_output());

    tracing::warn!(thread = 7, reason = "signal SIGSEGV", "session stopped");
    // Dropping the guard flushes the background writer.
    drop(guard);

    let contents = fs::read_to_string(&path).unwrap();
    let line = contents
        .lines()
        .find(|line| line.contains("\"message\":\"session stopped\""))
        .unwrap_or_else(|| panic!("no stop event in {contents}"));
    assert!(line.contains("\"reason\":\"signal SIGSEGV\""));
    assert!(line.contains("\"level\":\"WARN\""));

    // A second global subscriber is refused.
    assert!(init_logging_to_file(&path, LogLevel::Info, LogFormat::Pretty).is_err());

    let _ = fs::remove_dir_all(&dir);
}
