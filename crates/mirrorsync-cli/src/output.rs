//! Output formatting for human and JSON modes

use std::io::Write;

/// Output format selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }

    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }

    pub fn formatter(self) -> Box<dyn OutputFormatter> {
        match self {
            OutputFormat::Human => Box::new(HumanFormatter),
            OutputFormat::Json => Box::new(JsonFormatter),
        }
    }
}

/// Trait for formatting CLI output
pub trait OutputFormatter: Send + Sync {
    fn success(&self, message: &str);
    fn error(&self, message: &str);
    fn warn(&self, message: &str);
    fn info(&self, message: &str);
    /// Rewrites the current terminal line; ends with `done`
    fn progress(&self, line: &str, done: bool);
    fn print_json(&self, value: &serde_json::Value);
}

/// Human-readable output formatter with checkmarks and indentation
pub struct HumanFormatter;

impl OutputFormatter for HumanFormatter {
    fn success(&self, message: &str) {
        println!("\u{2713} {message}");
    }
    fn error(&self, message: &str) {
        eprintln!("\u{2717} Error: {message}");
    }
    fn warn(&self, message: &str) {
        eprintln!("\u{26a0} Warning: {message}");
    }
    fn info(&self, message: &str) {
        println!("  {message}");
    }
    fn progress(&self, line: &str, done: bool) {
        let mut stderr = std::io::stderr().lock();
        // \x1b[2K clears whatever a longer previous line left behind
        let _ = write!(stderr, "\r\x1b[2K  {line}");
        if done {
            let _ = writeln!(stderr);
        }
        let _ = stderr.flush();
    }
    fn print_json(&self, _value: &serde_json::Value) {}
}

/// JSON output formatter
pub struct JsonFormatter;

impl OutputFormatter for JsonFormatter {
    fn success(&self, message: &str) {
        println!("{}", serde_json::json!({"success": true, "message": message}));
    }
    fn error(&self, message: &str) {
        eprintln!("{}", serde_json::json!({"success": false, "error": message}));
    }
    fn warn(&self, message: &str) {
        eprintln!("{}", serde_json::json!({"level": "warning", "message": message}));
    }
    fn info(&self, _message: &str) {}
    fn progress(&self, _line: &str, _done: bool) {}
    fn print_json(&self, value: &serde_json::Value) {
        println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
    }
}

/// Formats a byte count with a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

/// `"1 file"` / `"3 files"`
pub fn plural(count: u64, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

/// Formats a duration as milliseconds below one second, else seconds
pub fn format_duration(duration: chrono::Duration) -> String {
    let ms = duration.num_milliseconds().max(0);
    if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "file"), "1 file");
        assert_eq!(plural(0, "file"), "0 files");
        assert_eq!(plural(2, "conflict"), "2 conflicts");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::milliseconds(250)), "250ms");
        assert_eq!(format_duration(chrono::Duration::milliseconds(2500)), "2.5s");
    }

    #[test]
    fn test_format_from_flag() {
        assert!(OutputFormat::from_json_flag(true).is_json());
        assert!(!OutputFormat::from_json_flag(false).is_json());
    }
}
