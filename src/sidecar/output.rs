//! Classification and delivery of sidecar output lines.
//!
//! Standard output lines carry a `level=<token>` marker in the sidecar's
//! logfmt output; the token picks the presentation level. Standard error is
//! always error-level. Lines are otherwise passed through unmodified.

use std::sync::Mutex;

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Presentation level of a sidecar line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLevel {
    Information,
    Warning,
    Error,
}

impl OutputLevel {
    /// Map a sidecar log-level token.
    pub fn from_token(token: &str) -> Self {
        match token {
            "warning" => OutputLevel::Warning,
            "error" | "critical" | "fatal" => OutputLevel::Error,
            _ => OutputLevel::Information,
        }
    }
}

/// A classified output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub level: OutputLevel,
    pub text: String,
}

/// Extract the token following `level=`, up to the next space.
///
/// Returns `None` when there is no marker or the token is empty.
pub fn parse_level_token(line: &str) -> Option<&str> {
    let start = line.find("level=")? + "level=".len();
    let rest = &line[start..];
    let token = rest.split(' ').next().unwrap_or_default();
    if token.is_empty() { None } else { Some(token) }
}

/// Classify a standard output line. Absent or empty lines produce nothing.
pub fn classify_stdout(line: Option<&str>) -> Option<OutputLine> {
    let line = line.filter(|l| !l.is_empty())?;
    let level = parse_level_token(line)
        .map(OutputLevel::from_token)
        .unwrap_or(OutputLevel::Information);
    Some(OutputLine {
        stream: OutputStream::Stdout,
        level,
        text: line.to_string(),
    })
}

/// Classify a standard error line. Absent or empty lines produce nothing.
pub fn classify_stderr(line: Option<&str>) -> Option<OutputLine> {
    let line = line.filter(|l| !l.is_empty())?;
    Some(OutputLine {
        stream: OutputStream::Stderr,
        level: OutputLevel::Error,
        text: line.to_string(),
    })
}

/// Receives classified sidecar output, in arrival order.
pub trait OutputSink: Send + Sync {
    fn emit(&self, line: &OutputLine);
}

/// Forwards sidecar output to `tracing` under the `sidecar_output` target.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&self, line: &OutputLine) {
        match line.level {
            OutputLevel::Information => tracing::info!(target: "sidecar_output", "{}", line.text),
            OutputLevel::Warning => tracing::warn!(target: "sidecar_output", "{}", line.text),
            OutputLevel::Error => tracing::error!(target: "sidecar_output", "{}", line.text),
        }
    }
}

/// Writes sidecar output to the terminal, coloured by level.
#[derive(Debug, Default)]
pub struct ConsoleSink {
    // Serializes writes so stdout and stderr lines never interleave mid-line.
    lock: Mutex<()>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputSink for ConsoleSink {
    fn emit(&self, line: &OutputLine) {
        use crossterm::style::Stylize;

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match line.level {
            OutputLevel::Information => println!("{}", line.text),
            OutputLevel::Warning => println!("{}", line.text.as_str().yellow()),
            OutputLevel::Error => eprintln!("{}", line.text.as_str().red()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_marker() {
        let line = classify_stdout(Some("level=warning something happened")).unwrap();
        assert_eq!(line.level, OutputLevel::Warning);
        assert_eq!(line.text, "level=warning something happened");
    }

    #[test]
    fn test_error_family() {
        for token in ["error", "critical", "fatal"] {
            let raw = format!("time=\"now\" level={token} msg=\"boom\"");
            assert_eq!(
                classify_stdout(Some(&raw)).unwrap().level,
                OutputLevel::Error,
                "level={token} should be error"
            );
        }
    }

    #[test]
    fn test_missing_or_malformed_marker_defaults_to_information() {
        assert_eq!(
            classify_stdout(Some("no marker here")).unwrap().level,
            OutputLevel::Information
        );
        assert_eq!(
            classify_stdout(Some("level= empty token")).unwrap().level,
            OutputLevel::Information
        );
        assert_eq!(
            classify_stdout(Some("level=debug chatter")).unwrap().level,
            OutputLevel::Information
        );
    }

    #[test]
    fn test_marker_key_is_case_sensitive() {
        assert_eq!(parse_level_token("LEVEL=error x"), None);
        assert_eq!(parse_level_token("a level=error"), Some("error"));
        assert_eq!(parse_level_token("level=warning"), Some("warning"));
    }

    #[test]
    fn test_empty_lines_produce_nothing() {
        assert_eq!(classify_stdout(None), None);
        assert_eq!(classify_stdout(Some("")), None);
        assert_eq!(classify_stderr(None), None);
        assert_eq!(classify_stderr(Some("")), None);
    }

    #[test]
    fn test_stderr_is_always_error() {
        let line = classify_stderr(Some("level=info but on stderr")).unwrap();
        assert_eq!(line.level, OutputLevel::Error);
        assert_eq!(line.stream, OutputStream::Stderr);
    }
}
