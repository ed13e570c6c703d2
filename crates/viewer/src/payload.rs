//! Operator payload helpers: read, validate, pretty-print.

use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

/// Inline payload, or the contents of `file` (`~` expanded).
pub fn read_payload(inline: Option<String>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(p), None) => Ok(p),
        (None, Some(path)) => {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).to_string();
            std::fs::read_to_string(&expanded).with_context(|| format!("read {}", expanded))
        }
        (Some(_), Some(_)) => anyhow::bail!("give either a payload or --file, not both"),
        (None, None) => anyhow::bail!("a payload or --file is required"),
    }
}

/// How a payload will be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadShape {
    /// Number of publish items: array length, or 1.
    pub items: usize,
    pub is_array: bool,
}

pub fn validate(raw: &str) -> Result<PayloadShape> {
    if raw.trim().is_empty() {
        anyhow::bail!("payload is empty");
    }
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(match value {
        Value::Array(items) => PayloadShape {
            items: items.len(),
            is_array: true,
        },
        _ => PayloadShape {
            items: 1,
            is_array: false,
        },
    })
}

pub fn format(raw: &str) -> Result<String> {
    let value: Value = serde_json::from_str(raw).context("payload is not valid JSON")?;
    Ok(serde_json::to_string_pretty(&value)?)
}
