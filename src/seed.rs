//! Seed input: keys read from a CSV column.

use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

pub const DEFAULT_KEY_COLUMN: &str = "zip_code";

/// Read the `column` values of a headed CSV file as seed keys.
pub fn read_keys(path: impl AsRef<Path>, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    read_from(&mut reader, column)
}

fn read_from<R: std::io::Read>(reader: &mut csv::Reader<R>, column: &str) -> Result<Vec<String>> {
    let index = reader
        .headers()?
        .iter()
        .position(|h| h.trim() == column)
        .ok_or_else(|| Error::Config(format!("seed file has no '{column}' column")))?;

    let mut keys = Vec::new();
    for record in reader.records() {
        let record = record?;
        if let Some(value) = record.get(index) {
            keys.push(value.to_string());
        }
    }
    Ok(dedup_keys(keys))
}

/// Trim, drop blanks and duplicates. First occurrence wins.
pub fn dedup_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    keys.into_iter()
        .filter_map(|k| {
            let k = k.as_ref().trim();
            (!k.is_empty() && seen.insert(k.to_string())).then(|| k.to_string())
        })
        .collect()
}
