//! Book catalog loading and schema normalization.
//!
//! The catalog is a line-delimited JSON file, one book per line. Loading is
//! strict about the line structure (a missing file or a non-JSON line fails
//! the whole load) but lenient about numeric fields: a year, rating, or
//! ratings count that arrives as a number, a numeric string, or null is
//! coerced, and anything unparsable degrades to `None` instead of failing
//! the record.

use serde::{Deserialize, Deserializer};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// One normalized book entry from the catalog file.
#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    #[serde(deserialize_with = "id_as_text")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_authors")]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub publication_year: Option<i64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub average_rating: Option<f64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub ratings_count: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Record {
    /// Publication decade, floored (1997 → 1990). `None` without a year.
    pub fn decade(&self) -> Option<i64> {
        self.publication_year.map(|year| year.div_euclid(10) * 10)
    }
}

/// Load and normalize the catalog at `path`.
///
/// When `chunk_size` is set, lines are parsed and appended in batches of
/// that size, bounding the intermediate line buffer for large files. Output
/// order always matches file order; blank lines are skipped; no
/// deduplication is performed.
pub fn load_catalog(path: &Path, chunk_size: Option<usize>) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| Error::load(path, e))?;
    let reader = BufReader::new(file);

    let mut records = Vec::new();
    let mut batch: Vec<(usize, String)> = Vec::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| Error::load(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        batch.push((idx + 1, line));

        if let Some(size) = chunk_size {
            if batch.len() >= size {
                parse_batch(path, &mut batch, &mut records)?;
            }
        }
    }
    parse_batch(path, &mut batch, &mut records)?;

    Ok(records)
}

fn parse_batch(
    path: &Path,
    batch: &mut Vec<(usize, String)>,
    records: &mut Vec<Record>,
) -> Result<()> {
    for (line_no, line) in batch.drain(..) {
        let record: Record = serde_json::from_str(&line)
            .map_err(|e| Error::load(path, format!("line {}: {}", line_no, e)))?;
        records.push(record);
    }
    Ok(())
}

// ============ Field coercion ============

fn id_as_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "id must be a string or number, got {}",
            other
        ))),
    }
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Authors are normally an array of names; a single string is treated as a
/// one-author list, and anything else as no authors.
fn lenient_authors<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Array(entries) => entries
            .into_iter()
            .filter_map(|entry| match entry {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        serde_json::Value::String(s) => vec![s],
        _ => Vec::new(),
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_i64(&value))
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_f64(&value))
}

/// Integer coercion: integers pass through, floats floor, numeric strings
/// parse. Everything else is missing.
fn coerce_i64(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64)),
        serde_json::Value::String(s) => {
            let trimmed = s.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.floor() as i64))
        }
        _ => None,
    }
}

fn coerce_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}
