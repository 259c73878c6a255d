//! Procfile parsing.
//!
//! A Procfile lists one process per line as `name: command`. Blank lines and
//! `#` comments are ignored. Each entry is given a port derived from its
//! position in the file, so ports stay the same whichever subset is run.

use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ConfigError, ParseError};
use crate::process::ProcessDefinition;

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Za-z0-9_-]+):\s+(.+)$").expect("static regex"))
}

/// Reads the Procfile at `path`, or standard input when `path` is `-`.
pub fn read_source(path: &Path) -> Result<String, ConfigError> {
    let read = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer).map(|_| buffer)
    } else {
        std::fs::read_to_string(path)
    };
    read.map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses Procfile contents into definitions, in file order.
///
/// The entry at position `i` gets port `base_port + i * port_step`, or no port
/// at all when that does not fit in a `u16`.
pub fn parse(
    source: &str,
    base_port: u16,
    port_step: u16,
) -> Result<Vec<ProcessDefinition>, ParseError> {
    let mut definitions = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let captures = entry_pattern()
            .captures(line)
            .ok_or_else(|| ParseError::MalformedLine {
                line: idx + 1,
                content: line.to_string(),
            })?;
        let name = captures[1].to_string();
        let command = captures[2].trim().to_string();
        if !seen.insert(name.clone()) {
            return Err(ParseError::DuplicateName {
                line: idx + 1,
                name,
            });
        }
        let port = assign_port(base_port, port_step, definitions.len());
        definitions.push(ProcessDefinition {
            name,
            command,
            port,
        });
    }

    if definitions.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(definitions)
}

fn assign_port(base: u16, step: u16, index: usize) -> Option<u16> {
    let offset = u32::try_from(index).ok()?.checked_mul(u32::from(step))?;
    u16::try_from(u32::from(base).checked_add(offset)?).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_entries_in_order_with_ports() {
        let source = "web: bundle exec puma -p $PORT\nworker: sidekiq\n\nclock-1: ./clock\n";
        let defs = parse(source, 5000, 100).unwrap();
        let summary: Vec<_> = defs
            .iter()
            .map(|d| (d.name.as_str(), d.command.as_str(), d.port))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("web", "bundle exec puma -p $PORT", Some(5000)),
                ("worker", "sidekiq", Some(5100)),
                ("clock-1", "./clock", Some(5200)),
            ]
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let source = "# services\n\n   \napi: cargo run\n  # trailing comment\n";
        let defs = parse(source, 3000, 1).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "api");
        assert_eq!(defs[0].port, Some(3000));
    }

    #[test]
    fn command_keeps_inner_colons() {
        let defs = parse("redis: redis-server --bind 127.0.0.1:6379", 5000, 100).unwrap();
        assert_eq!(defs[0].command, "redis-server --bind 127.0.0.1:6379");
    }

    #[test]
    fn rejects_malformed_line_with_its_number() {
        let err = parse("web: ok\nthis is not an entry\n", 5000, 100).unwrap_err();
        match err {
            ParseError::MalformedLine { line, content } => {
                assert_eq!(line, 2);
                assert_eq!(content, "this is not an entry");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_missing_space_after_colon() {
        assert!(matches!(
            parse("web:run", 5000, 100),
            Err(ParseError::MalformedLine { line: 1, .. })
        ));
    }

    #[test]
    fn rejects_non_ascii_names() {
        assert!(matches!(
            parse("web: ok\ncafé: serve\n", 5000, 100),
            Err(ParseError::MalformedLine { line: 2, .. })
        ));
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = parse("web: a\nweb: b\n", 5000, 100).unwrap_err();
        assert!(matches!(err, ParseError::DuplicateName { line: 2, ref name } if name == "web"));
    }

    #[test]
    fn empty_source_is_an_error() {
        assert!(matches!(parse("# nothing\n", 5000, 100), Err(ParseError::Empty)));
    }

    #[test]
    fn ports_past_u16_are_dropped() {
        let defs = parse("a: x\nb: y\n", 65_000, 1_000).unwrap();
        assert_eq!(defs[0].port, Some(65_000));
        assert_eq!(defs[1].port, None);
    }

    #[test]
    fn reads_source_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Procfile");
        std::fs::write(&path, "web: echo hi\n").unwrap();
        assert_eq!(read_source(&path).unwrap(), "web: echo hi\n");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_source(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
