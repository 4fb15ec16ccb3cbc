//! Comment-preserving YAML updates
//!
//! Rewrites a single list value in a hand-maintained configuration file
//! without re-serializing the whole document, so comments, key order and
//! formatting elsewhere survive. Every edit is verified by parsing the result
//! and comparing it with the intended document.

use serde_yaml::{Mapping, Value};
use std::path::Path;

use crate::core::project::PatchRef;
use crate::error::ConfigError;

/// Write `patches` as the complete patch list of `block` into `config_file`
pub fn persist_patches(config_file: &Path, block: &str, patches: &[PatchRef]) -> Result<(), ConfigError> {
    let write_back = |error: String| ConfigError::WriteBack {
        path: config_file.to_path_buf(),
        error,
    };

    let text = std::fs::read_to_string(config_file).map_err(|e| ConfigError::IoError {
        path: config_file.to_path_buf(),
        error: e.to_string(),
    })?;
    let items: Vec<Value> = patches
        .iter()
        .map(serde_yaml::to_value)
        .collect::<Result<_, _>>()
        .map_err(|e| write_back(e.to_string()))?;

    let updated = set_list(&text, &["blocks", block, "project", "patches"], &items).map_err(write_back)?;
    std::fs::write(config_file, updated).map_err(|e| write_back(e.to_string()))?;

    tracing::debug!(
        "Recorded {} patch(es) for block '{}' in {}",
        patches.len(),
        block,
        config_file.display()
    );
    Ok(())
}

/// Set the value at `path` to the block sequence `items`
///
/// Missing intermediate keys are created. Fails if a mapping on the path is
/// written in flow style or if the result does not parse to the intended
/// document.
pub fn set_list(text: &str, path: &[&str], items: &[Value]) -> Result<String, String> {
    let original: Value = if text.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(text).map_err(|e| e.to_string())?
    };
    let mut expected = original;
    set_value(&mut expected, path, Value::Sequence(items.to_vec()))?;

    let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
    edit_lines(&mut lines, path, items)?;

    let mut updated = lines.join("\n");
    updated.push('\n');

    let reparsed: Value = serde_yaml::from_str(&updated).map_err(|e| e.to_string())?;
    if reparsed != expected {
        return Err(format!(
            "rewriting '{}' would change other values; update the file manually",
            path.join(".")
        ));
    }
    Ok(updated)
}

fn set_value(doc: &mut Value, path: &[&str], value: Value) -> Result<(), String> {
    let Some((key, rest)) = path.split_first() else {
        *doc = value;
        return Ok(());
    };
    if doc.is_null() {
        *doc = Value::Mapping(Mapping::new());
    }
    let Value::Mapping(mapping) = doc else {
        return Err(format!("'{key}' cannot be set inside a non-mapping value"));
    };
    let key = Value::from(*key);
    if !mapping.contains_key(&key) {
        mapping.insert(key.clone(), Value::Null);
    }
    match mapping.get_mut(&key) {
        Some(child) => set_value(child, rest, value),
        None => Err("key vanished during update".to_string()),
    }
}

fn edit_lines(lines: &mut Vec<String>, path: &[&str], items: &[Value]) -> Result<(), String> {
    let mut start = 0;
    let mut end = lines.len();
    let mut parent_indent: Option<usize> = None;

    for (depth, key) in path.iter().enumerate() {
        let Some(idx) = find_key(lines, start, end, key) else {
            let at = last_content(lines, start, end).map_or(start, |i| i + 1);
            let indent = child_indent(lines, start, end).unwrap_or_else(|| parent_indent.map_or(0, |p| p + 2));
            let mut insert = Vec::new();
            for (offset, missing) in path[depth..path.len() - 1].iter().enumerate() {
                insert.push(format!("{}{}:", " ".repeat(indent + 2 * offset), missing));
            }
            let last_indent = indent + 2 * (path.len() - 1 - depth);
            insert.extend(render_list(last_indent, path[path.len() - 1], items));
            lines.splice(at..at, insert);
            return Ok(());
        };

        let indent = indent_of(&lines[idx]);
        let block_end = value_end(lines, idx, end);

        if depth == path.len() - 1 {
            lines.splice(idx..block_end, render_list(indent, key, items));
            return Ok(());
        }

        let inline = inline_value(&lines[idx], key);
        match inline {
            "" => {}
            "{}" | "~" | "null" => lines[idx] = format!("{}{}:", " ".repeat(indent), key),
            other => return Err(format!("'{key}' is written in flow style ({other}); update the file manually")),
        }
        parent_indent = Some(indent);
        start = idx + 1;
        end = block_end;
    }
    Ok(())
}

fn render_list(indent: usize, key: &str, items: &[Value]) -> Vec<String> {
    let pad = " ".repeat(indent);
    if items.is_empty() {
        return vec![format!("{pad}{key}: []")];
    }
    let mut out = vec![format!("{pad}{key}:")];
    out.extend(items.iter().map(|item| format!("{pad}  - {}", render_flow(item))));
    out
}

/// Render a value on a single line
fn render_flow(value: &Value) -> String {
    match value {
        Value::Sequence(seq) => {
            let items: Vec<String> = seq.iter().map(render_flow).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Mapping(map) => {
            let entries: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", render_flow(k), render_flow(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
        Value::Null => "null".to_string(),
        scalar => serde_yaml::to_string(scalar)
            .map(|s| s.trim_end().to_string())
            .unwrap_or_default(),
    }
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_content(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && !trimmed.starts_with('#') && trimmed != "---"
}

fn child_indent(lines: &[String], start: usize, end: usize) -> Option<usize> {
    lines[start..end]
        .iter()
        .filter(|l| is_content(l))
        .map(|l| indent_of(l))
        .min()
}

fn last_content(lines: &[String], start: usize, end: usize) -> Option<usize> {
    (start..end).rev().find(|&i| is_content(&lines[i]))
}

fn key_prefix_len(trimmed: &str, key: &str) -> Option<usize> {
    for candidate in [key.to_string(), format!("\"{key}\""), format!("'{key}'")] {
        if let Some(rest) = trimmed.strip_prefix(&candidate) {
            if let Some(after) = rest.strip_prefix(':') {
                if after.is_empty() || after.starts_with(' ') {
                    return Some(candidate.len() + 1);
                }
            }
        }
    }
    None
}

fn find_key(lines: &[String], start: usize, end: usize, key: &str) -> Option<usize> {
    let indent = child_indent(lines, start, end)?;
    (start..end).find(|&i| {
        let line = &lines[i];
        is_content(line) && indent_of(line) == indent && key_prefix_len(line.trim_start(), key).is_some()
    })
}

/// Text after `key:` with any trailing comment removed
fn inline_value<'a>(line: &'a str, key: &str) -> &'a str {
    let trimmed = line.trim_start();
    let rest = key_prefix_len(trimmed, key).map_or("", |n| &trimmed[n..]);
    let rest = rest.trim();
    if rest.starts_with('#') {
        ""
    } else {
        rest.split(" #").next().unwrap_or("").trim()
    }
}

/// Exclusive end of the lines belonging to the value of the key at `idx`
fn value_end(lines: &[String], idx: usize, end: usize) -> usize {
    let indent = indent_of(&lines[idx]);
    let mut last = idx + 1;
    for (i, line) in lines.iter().enumerate().take(end).skip(idx + 1) {
        if !is_content(line) {
            continue;
        }
        let trimmed = line.trim_start();
        let nested = indent_of(line) > indent;
        let same_level_item = indent_of(line) == indent && (trimmed.starts_with("- ") || trimmed == "-");
        if nested || same_level_item {
            last = i + 1;
        } else {
            break;
        }
    }
    last
}
