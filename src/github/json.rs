//! Response decoding with error locations.
//!
//! A bare serde error on a large search payload says little. These helpers
//! add the JSON path of the failing field and a caret snippet of the source.

use anyhow::Result;

/// Decode `body`, reporting the serde path, a cleaned-up type mismatch, and a
/// snippet around the failure.
pub fn parse_json_with_context<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let raw = inner.to_string();
        let loc = format!(" at line {line} column {column}");
        let message = describe_mismatch(raw.strip_suffix(&loc).unwrap_or(&raw));
        let snippet = snippet_at(body, line, column, 24);

        if path.is_empty() || path == "." {
            anyhow::anyhow!("{message} (line {line} col {column})\n{snippet}")
        } else {
            anyhow::anyhow!("at path '{path}': {message} (line {line} col {column})\n{snippet}")
        }
    })
}

/// Turn `invalid type: X, expected Y` into `expected Y, got X`.
fn describe_mismatch(message: &str) -> String {
    if let Some(rest) = message.strip_prefix("invalid type: ")
        && let Some((actual, expected)) = rest.split_once(", expected ")
    {
        return format!("expected {}, got {}", expected.trim(), actual);
    }
    message.to_string()
}

fn snippet_at(body: &str, line: usize, column: usize, width: usize) -> String {
    let target = body.lines().nth(line.saturating_sub(1)).unwrap_or("");
    if target.is_empty() {
        return "(empty line)".to_string();
    }

    let at = column.saturating_sub(1).min(target.len());
    let start = floor_char_boundary(target, at.saturating_sub(width / 2));
    let end = floor_char_boundary(target, (at + width / 2).min(target.len()));
    let caret = " ".repeat(at - start) + "^";

    format!("...{}...\n   {caret}", &target[start..end])
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
