//! Concrete yarn.lock v1 syntax.
//!
//! The decoded form lives in lockstep-core; this module handles the
//! indentation-based text: a comment header, one block per record, keys
//! merged with ", " when several ranges share an identical record, and
//! tokens quoted only when the bare form would be ambiguous.

use lockstep_core::{YarnEntry, YarnLock};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

const HEADER: &str =
    "# THIS IS AN AUTOGENERATED FILE. DO NOT EDIT THIS FILE DIRECTLY.\n# yarn lockfile v1\n";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: unterminated quoted token")]
    UnterminatedQuote { line: usize },

    #[error("line {line}: unexpected indentation")]
    BadIndent { line: usize },

    #[error("line {line}: expected `key:` or `key value`")]
    MalformedLine { line: usize },

    #[error("line {line}: field outside of any record")]
    OrphanField { line: usize },
}

/// A token must be quoted when the bare spelling could be misread: it
/// looks like a boolean, starts with anything but a letter, or contains
/// syntax characters.
fn needs_quotes(token: &str) -> bool {
    token.is_empty()
        || token.starts_with("true")
        || token.starts_with("false")
        || !token.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        || token.chars().any(|c| {
            c.is_whitespace() || matches!(c, ':' | ',' | '[' | ']' | '\\' | '"')
        })
}

fn wrap(token: &str) -> String {
    if needs_quotes(token) {
        format!("\"{}\"", token.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        token.to_string()
    }
}

fn push_field(out: &mut String, indent: &str, name: &str, value: &str) {
    out.push_str(indent);
    out.push_str(name);
    out.push(' ');
    out.push_str(&wrap(value));
    out.push('\n');
}

fn push_block(out: &mut String, name: &str, deps: &BTreeMap<String, String>) {
    if deps.is_empty() {
        return;
    }
    out.push_str("  ");
    out.push_str(name);
    out.push_str(":\n");
    for (dep, range) in deps {
        out.push_str("    ");
        out.push_str(&wrap(dep));
        out.push(' ');
        // Ranges are always quoted, matching the reference serializer.
        out.push_str(&format!("\"{range}\""));
        out.push('\n');
    }
}

/// Render a decoded lock as yarn.lock v1 text. Keys come out in sorted
/// order, and keys whose records are identical share one merged block.
pub fn stringify(lock: &YarnLock) -> String {
    let mut out = String::from(HEADER);
    let mut emitted: HashSet<&str> = HashSet::new();

    for (key, entry) in &lock.entries {
        if emitted.contains(key.as_str()) {
            continue;
        }
        let group: Vec<&str> = lock
            .entries
            .iter()
            .filter(|(_, e)| *e == entry)
            .map(|(k, _)| k.as_str())
            .collect();
        for k in &group {
            emitted.insert(k);
        }

        out.push('\n');
        let keys: Vec<String> = group.iter().map(|k| wrap(k)).collect();
        out.push_str(&keys.join(", "));
        out.push_str(":\n");

        push_field(&mut out, "  ", "version", &entry.version);
        if let Some(resolved) = &entry.resolved {
            push_field(&mut out, "  ", "resolved", resolved);
        }
        if let Some(integrity) = &entry.integrity {
            push_field(&mut out, "  ", "integrity", integrity);
        }
        push_block(&mut out, "dependencies", &entry.dependencies);
        push_block(&mut out, "optionalDependencies", &entry.optional_dependencies);
    }

    out
}

/// One bare-or-quoted token starting at the front of `rest`. Returns the
/// token and the remainder after it.
fn take_token<'a>(rest: &'a str, line: usize) -> Result<(String, &'a str), ParseError> {
    if let Some(inner) = rest.strip_prefix('"') {
        let mut token = String::new();
        let mut chars = inner.char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => token.push(escaped),
                    None => return Err(ParseError::UnterminatedQuote { line }),
                },
                '"' => return Ok((token, &inner[i + 1..])),
                _ => token.push(c),
            }
        }
        Err(ParseError::UnterminatedQuote { line })
    } else {
        let end = rest
            .find(|c: char| c.is_whitespace() || c == ':' || c == ',')
            .unwrap_or(rest.len());
        Ok((rest[..end].to_string(), &rest[end..]))
    }
}

/// All comma-separated keys on an entry's header line.
fn parse_key_line(text: &str, line: usize) -> Result<Vec<String>, ParseError> {
    let mut keys = Vec::new();
    let mut rest = text.trim_end().trim_end_matches(':');
    loop {
        let (key, after) = take_token(rest, line)?;
        if key.is_empty() {
            return Err(ParseError::MalformedLine { line });
        }
        keys.push(key);
        match after.trim_start().strip_prefix(',') {
            Some(next) => rest = next.trim_start(),
            None => return Ok(keys),
        }
    }
}

enum Section {
    Fields,
    Dependencies,
    OptionalDependencies,
}

/// Parse yarn.lock v1 text into the decoded form. Line endings are
/// normalized first, so CRLF input parses identically to LF input.
pub fn parse(text: &str) -> Result<YarnLock, ParseError> {
    let text = text.replace("\r\n", "\n");
    let mut entries: BTreeMap<String, YarnEntry> = BTreeMap::new();

    let mut current_keys: Vec<String> = Vec::new();
    let mut current = YarnEntry::default();
    let mut section = Section::Fields;

    let mut flush = |keys: &mut Vec<String>, entry: &mut YarnEntry| {
        for key in keys.drain(..) {
            entries.insert(key, entry.clone());
        }
        *entry = YarnEntry::default();
    };

    for (number, raw) in text.lines().enumerate() {
        let line = number + 1;
        let trimmed = raw.trim_end();
        if trimmed.is_empty() || trimmed.trim_start().starts_with('#') {
            continue;
        }

        let indent = trimmed.len() - trimmed.trim_start().len();
        let body = trimmed.trim_start();

        match indent {
            0 => {
                if !trimmed.ends_with(':') {
                    return Err(ParseError::MalformedLine { line });
                }
                flush(&mut current_keys, &mut current);
                current_keys = parse_key_line(trimmed, line)?;
                section = Section::Fields;
            }
            2 => {
                if current_keys.is_empty() {
                    return Err(ParseError::OrphanField { line });
                }
                if let Some(header) = body.strip_suffix(':') {
                    section = match header {
                        "dependencies" => Section::Dependencies,
                        "optionalDependencies" => Section::OptionalDependencies,
                        _ => return Err(ParseError::MalformedLine { line }),
                    };
                    continue;
                }
                section = Section::Fields;
                let (name, rest) = take_token(body, line)?;
                let (value, _) = take_token(rest.trim_start(), line)?;
                match name.as_str() {
                    "version" => current.version = value,
                    "resolved" => current.resolved = Some(value),
                    "integrity" => current.integrity = Some(value),
                    _ => return Err(ParseError::MalformedLine { line }),
                }
            }
            4 => {
                if current_keys.is_empty() {
                    return Err(ParseError::OrphanField { line });
                }
                let (name, rest) = take_token(body, line)?;
                let (range, _) = take_token(rest.trim_start(), line)?;
                match section {
                    Section::Dependencies => {
                        current.dependencies.insert(name, range);
                    }
                    Section::OptionalDependencies => {
                        current.optional_dependencies.insert(name, range);
                    }
                    Section::Fields => return Err(ParseError::BadIndent { line }),
                }
            }
            _ => return Err(ParseError::BadIndent { line }),
        }
    }
    flush(&mut current_keys, &mut current);

    Ok(YarnLock { entries })
}
