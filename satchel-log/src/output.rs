//! Record rendering for each output format.

use crate::config::{LogConfig, config, enabled};
use crate::level::{Format, Level};
use std::fmt::{Display, Write as _};
use std::io::Write;

/// A structured key/value pair attached to a record.
pub type Field<'a> = (&'a str, &'a dyn Display);

/// Log a message with the given level.
#[doc(hidden)]
pub fn log(level: Level, target: &str, message: &str) {
    log_with_fields(level, target, message, &[]);
}

/// Log a message with structured fields.
#[doc(hidden)]
pub fn log_with_fields(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if !enabled(level) {
        return;
    }

    let config = config();

    match config.format {
        Format::Pretty => log_pretty(level, target, message, fields, config),
        Format::Compact => log_compact(level, target, message, fields, config),
        Format::Json => log_json(level, target, message, fields),
        Format::Facade => log_facade(level, target, message, fields),
    }
}

/// Render fields as ` key=value` pairs.
pub(crate) fn render_fields(fields: &[Field<'_>]) -> String {
    let mut out = String::new();
    for (key, value) in fields {
        let _ = write!(out, " {}={}", key, value);
    }
    out
}

fn log_pretty(level: Level, target: &str, message: &str, fields: &[Field<'_>], config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
    }

    #[cfg(feature = "color")]
    if config.color {
        let _ = write!(stderr, "{:5} ", level.colored());
    } else {
        let _ = write!(stderr, "{:5} ", level.as_str());
    }

    #[cfg(not(feature = "color"))]
    let _ = write!(stderr, "{:5} ", level.as_str());

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "[{}] ", target);
    }

    let _ = writeln!(stderr, "{}{}", message, render_fields(fields));
}

fn log_compact(level: Level, target: &str, message: &str, fields: &[Field<'_>], config: &LogConfig) {
    let mut stderr = std::io::stderr().lock();

    if config.timestamps {
        let now = chrono::Local::now();
        let _ = write!(stderr, "{} ", now.format("%H:%M:%S"));
    }

    let _ = write!(stderr, "{} ", level.as_str().chars().next().unwrap_or('?'));

    if config.module_path && !target.is_empty() {
        let _ = write!(stderr, "{}: ", target);
    }

    let _ = writeln!(stderr, "{}{}", message, render_fields(fields));
}

fn log_facade(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if let Some(level) = level.to_log() {
        log::log!(target: target, level, "{}{}", message, render_fields(fields));
    }
}

#[cfg(feature = "json")]
pub(crate) fn json_line(level: Level, target: &str, message: &str, fields: &[Field<'_>]) -> Option<String> {
    use serde::Serialize;
    use std::collections::BTreeMap;

    #[derive(Serialize)]
    struct LogEntry<'a> {
        timestamp: String,
        level: &'a str,
        target: &'a str,
        message: &'a str,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        fields: BTreeMap<&'a str, String>,
    }

    let entry = LogEntry {
        timestamp: chrono::Utc::now().to_rfc3339(),
        level: level.as_str(),
        target,
        message,
        fields: fields.iter().map(|(k, v)| (*k, v.to_string())).collect(),
    };

    serde_json::to_string(&entry).ok()
}

#[cfg(not(feature = "json"))]
pub(crate) fn json_line(level: Level, target: &str, message: &str, fields: &[Field<'_>]) -> Option<String> {
    let mut line = format!(
        r#"{{"timestamp":"{}","level":"{}","target":"{}","message":"{}""#,
        chrono::Utc::now().to_rfc3339(),
        level.as_str(),
        escape_json(target),
        escape_json(message)
    );
    if !fields.is_empty() {
        let rendered: Vec<String> = fields
            .iter()
            .map(|(k, v)| format!(r#""{}":"{}""#, escape_json(k), escape_json(&v.to_string())))
            .collect();
        let _ = write!(line, r#","fields":{{{}}}"#, rendered.join(","));
    }
    line.push('}');
    Some(line)
}

fn log_json(level: Level, target: &str, message: &str, fields: &[Field<'_>]) {
    if let Some(line) = json_line(level, target, message, fields) {
        eprintln!("{}", line);
    }
}

#[cfg(not(feature = "json"))]
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(result, "\\u{:04x}", c as u32);
            }
            c => result.push(c),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fields() {
        let id = "abc";
        let count = 3;
        let fields: [Field<'_>; 2] = [("session_id", &id), ("keys", &count)];
        assert_eq!(render_fields(&fields), " session_id=abc keys=3");
        assert_eq!(render_fields(&[]), "");
    }

    #[test]
    fn test_json_line_includes_fields() {
        let id = "abc";
        let fields: [Field<'_>; 1] = [("session_id", &id)];
        let line = json_line(Level::Info, "satchel::test", "regenerated \"id\"", &fields).unwrap();
        assert!(line.contains(r#""level":"INFO""#));
        assert!(line.contains(r#""session_id":"abc""#));
        assert!(line.contains(r#"regenerated \"id\""#));
    }

    #[test]
    fn test_json_line_omits_empty_fields() {
        let line = json_line(Level::Warn, "t", "plain", &[]).unwrap();
        assert!(!line.contains("fields"));
    }
}
