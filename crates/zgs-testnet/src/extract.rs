//! Recovering a single value from noisy terminal output.
//!
//! Extraction is kept separate from process invocation so it can be tested
//! against captured output directly.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{HarnessError, Result};

/// CSI/VT100 sequences (colours, cursor and erase controls) and OSC titles.
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("static regex")
});

static CONTENT_ROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-f]{64}$").expect("static regex"));

/// Remove ANSI/VT100 escape sequences.
pub fn strip_ansi(text: &str) -> Cow<'_, str> {
    ANSI_ESCAPE.replace_all(text, "")
}

/// What to look for in captured output: a literal prefix followed by a
/// fixed-width token.
#[derive(Debug, Clone)]
pub struct Marker {
    /// Human-readable description used in parse errors.
    pub what: &'static str,
    pub prefix: &'static str,
    pub width: usize,
    /// Optional full-match validation of the token.
    pub pattern: Option<&'static LazyLock<Regex>>,
}

impl Marker {
    /// `root=0x<64 hex digits>`, printed by a successful `upload`.
    pub fn content_root() -> Self {
        Self {
            what: "content root (root=0x...)",
            prefix: "root=",
            width: 66,
            pattern: Some(&CONTENT_ROOT),
        }
    }
}

/// Find the token following `marker.prefix` in `raw`.
///
/// Lines are scanned in order after stripping escape sequences and the first
/// line containing the prefix decides the outcome: its token is returned, or
/// a parse error is raised if the token is truncated or does not validate.
/// Returns `Ok(None)` when no line contains the prefix.
pub fn find_marker(raw: &[u8], marker: &Marker) -> Result<Option<String>> {
    let text = String::from_utf8_lossy(raw);
    let clean = strip_ansi(&text);

    let Some(line) = clean.lines().find(|line| line.contains(marker.prefix)) else {
        return Ok(None);
    };
    let start = line.find(marker.prefix).unwrap_or_default() + marker.prefix.len();
    let token: String = line[start..].chars().take(marker.width).collect();

    let parse_error = || HarnessError::Parse {
        what: marker.what.to_string(),
        output: clean.to_string(),
    };

    if token.chars().count() != marker.width {
        return Err(parse_error());
    }
    if let Some(pattern) = marker.pattern {
        if !pattern.is_match(&token) {
            return Err(parse_error());
        }
    }
    Ok(Some(token))
}

/// Like [`find_marker`], failing with a parse error when the marker is absent.
pub fn extract(raw: &[u8], marker: &Marker) -> Result<String> {
    find_marker(raw, marker)?.ok_or_else(|| HarnessError::Parse {
        what: marker.what.to_string(),
        output: strip_ansi(&String::from_utf8_lossy(raw)).into_owned(),
    })
}

/// Parse the first line of output that is a JSON object.
///
/// String values are taken as-is; any other value (a `null` for a missing
/// key, a number) is kept as its JSON text.
pub fn extract_json_map(raw: &[u8]) -> Result<BTreeMap<String, String>> {
    let text = String::from_utf8_lossy(raw);
    let clean = strip_ansi(&text);

    let object = clean
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('{'))
        .find_map(|line| serde_json::from_str::<serde_json::Map<String, Value>>(line).ok())
        .ok_or_else(|| HarnessError::Parse {
            what: "JSON key/value result".to_string(),
            output: clean.to_string(),
        })?;

    Ok(object
        .into_iter()
        .map(|(key, value)| match value {
            Value::String(s) => (key, s),
            other => (key, other.to_string()),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "0x8c4b8a1f2e6d3c5b7a9f0e1d2c3b4a5968778695a4b3c2d1e0f1a2b3c4d5e6f7";

    #[test]
    fn test_strip_ansi() {
        let coloured = "\x1b[36mINFO\x1b[0m[2024-01-01T00:00:00Z] done \x1b[1;32mok\x1b[K";
        assert_eq!(strip_ansi(coloured), "INFO[2024-01-01T00:00:00Z] done ok");
        assert!(matches!(strip_ansi("plain"), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_extract_root_through_colours() {
        let output = format!(
            "\x1b[36mINFO\x1b[0m[0000] Data prepared to upload  \x1b[36msize\x1b[0m=10240\n\
             \x1b[36mINFO\x1b[0m[0001] File uploaded \x1b[36mroot\x1b[0m={ROOT} \x1b[36mtx\x1b[0m=0xabc\n"
        );

        let root = extract(output.as_bytes(), &Marker::content_root()).unwrap();
        assert_eq!(root, ROOT);
        assert_eq!(root.len(), 66);
    }

    #[test]
    fn test_first_matching_line_wins() {
        let other = "0x0000000000000000000000000000000000000000000000000000000000000001";
        let output = format!("root={ROOT}\nroot={other}\n");
        assert_eq!(extract(output.as_bytes(), &Marker::content_root()).unwrap(), ROOT);
    }

    #[test]
    fn test_missing_marker_keeps_output() {
        let output = b"\x1b[31mERRO\x1b[0m upload failed: connection refused\n";

        assert_eq!(find_marker(output, &Marker::content_root()).unwrap(), None);
        match extract(output, &Marker::content_root()).unwrap_err() {
            HarnessError::Parse { output, .. } => {
                assert_eq!(output, "ERRO upload failed: connection refused\n")
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_truncated_or_malformed_token() {
        let truncated = b"root=0x8c4b8a1f\n";
        assert!(matches!(
            extract(truncated, &Marker::content_root()),
            Err(HarnessError::Parse { .. })
        ));

        let uppercase = format!("root={}\n", ROOT.to_uppercase().replacen("0X", "0x", 1));
        assert!(matches!(
            extract(uppercase.as_bytes(), &Marker::content_root()),
            Err(HarnessError::Parse { .. })
        ));
    }

    #[test]
    fn test_extract_json_map_skips_log_lines() {
        let output = b"\x1b[36mDEBU\x1b[0m querying kv node\n{\"a\":\"1\",\"b\":\"2\"}\n";
        let map = extract_json_map(output).unwrap();
        assert_eq!(
            map,
            BTreeMap::from([("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())])
        );

        assert!(extract_json_map(b"nothing here\n").is_err());
    }

    #[test]
    fn test_extract_json_map_keeps_non_string_values() {
        let output = b"{\"a\":\"1\",\"missing\":null,\"n\":7}\n";
        let map = extract_json_map(output).unwrap();
        assert_eq!(map["a"], "1");
        assert_eq!(map["missing"], "null");
        assert_eq!(map["n"], "7");
    }
}
