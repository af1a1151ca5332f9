//! CSV checkpoint export.
//!
//! Each checkpoint is a new file; an existing file is never overwritten.

use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, SecondsFormat};
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::config::ExportSettings;
use crate::error::{Error, Result};
use crate::model::{ScrapeResult, State};

const MAX_SUFFIX: u32 = 1000;

/// One processed item, flattened for export. Response fields are echoed
/// from the payload's `data` object.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CheckpointRow {
    pub key: String,
    pub state: String,
    pub price: Option<f64>,
    pub observed_at: Option<String>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date: Option<String>,
    pub ldate: Option<String>,
    pub rooms: Option<String>,
    pub sixteens: Option<String>,
    pub twelves: Option<String>,
    pub months: Option<String>,
    pub promocode: Option<String>,
    #[serde(rename = "clientIP")]
    pub client_ip: Option<String>,
    #[serde(rename = "CityFrom")]
    pub city_from: Option<String>,
    #[serde(rename = "StateFrom")]
    pub state_from: Option<String>,
    #[serde(rename = "ID")]
    pub id: Option<String>,
}

impl CheckpointRow {
    pub fn done(result: &ScrapeResult) -> Self {
        let data = result.raw_payload.get("data");
        let echo = |field: &str| data.and_then(|d| d.get(field)).and_then(render);

        Self {
            key: result.item_key.clone(),
            state: State::Done.to_string(),
            price: result.extracted_value,
            observed_at: Some(result.observed_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            name: Some(result.identity.name.clone()),
            email: Some(result.identity.email.clone()),
            phone: Some(result.identity.phone.clone()),
            date: echo("date"),
            ldate: echo("ldate"),
            rooms: echo("rooms"),
            sixteens: echo("sixteens"),
            twelves: echo("twelves"),
            months: echo("months"),
            promocode: echo("promocode"),
            client_ip: echo("clientIP"),
            city_from: echo("CityFrom"),
            state_from: echo("StateFrom"),
            id: echo("ID"),
        }
    }

    pub fn failed(key: &str) -> Self {
        Self {
            key: key.to_string(),
            state: State::Failed.to_string(),
            ..Self::default()
        }
    }
}

fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Writes timestamped checkpoint files into one directory.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    prefix: String,
}

impl CheckpointWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_settings(settings: &ExportSettings) -> Self {
        Self::new(settings.dir.clone(), settings.prefix.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `rows` to a new file. Returns `None` without touching the
    /// filesystem when there is nothing to write.
    pub fn write(&self, rows: &[CheckpointRow]) -> Result<Option<PathBuf>> {
        if rows.is_empty() {
            return Ok(None);
        }
        std::fs::create_dir_all(&self.dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f").to_string();
        let (path, file) = self.create_unique(&stamp)?;

        let mut writer = csv::Writer::from_writer(file);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = rows.len(), "checkpoint written");
        Ok(Some(path))
    }

    fn create_unique(&self, stamp: &str) -> Result<(PathBuf, std::fs::File)> {
        for n in 0..MAX_SUFFIX {
            let name = if n == 0 {
                format!("{}_{stamp}.csv", self.prefix)
            } else {
                format!("{}_{stamp}_{n}.csv", self.prefix)
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(Error::Other(format!(
            "no free checkpoint name for {}_{stamp} in {}",
            self.prefix,
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Identity;
    use chrono::Utc;
    use serde_json::json;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("pricequeue-ckpt-{}", uuid::Uuid::new_v4()))
    }

    fn result() -> ScrapeResult {
        ScrapeResult {
            item_key: "78240".to_string(),
            extracted_value: Some(142.5),
            raw_payload: json!({
                "success": true,
                "data": {
                    "pricing": {"total": 142.5},
                    "rooms": 3,
                    "CityFrom": "San Antonio",
                    "StateFrom": "TX",
                    "ID": null
                }
            }),
            observed_at: Utc::now(),
            identity: Identity {
                name: "Mary Lopez".to_string(),
                email: "mary.lopez913@gmail.com".to_string(),
                phone: "(210) 555-1234".to_string(),
            },
        }
    }

    #[test]
    fn done_row_echoes_response_fields() {
        let row = CheckpointRow::done(&result());
        assert_eq!(row.state, "done");
        assert_eq!(row.price, Some(142.5));
        assert_eq!(row.rooms.as_deref(), Some("3"));
        assert_eq!(row.city_from.as_deref(), Some("San Antonio"));
        assert_eq!(row.id, None);
        assert_eq!(row.months, None);
    }

    #[test]
    fn empty_rows_write_nothing() {
        let dir = scratch_dir();
        let writer = CheckpointWriter::new(&dir, "storage_prices");
        assert_eq!(writer.write(&[]).unwrap(), None);
        assert!(!dir.exists());
    }

    #[test]
    fn checkpoints_never_overwrite() {
        let dir = scratch_dir();
        let writer = CheckpointWriter::new(&dir, "storage_prices");
        let rows = vec![CheckpointRow::done(&result()), CheckpointRow::failed("78241")];

        let first = writer.write(&rows).unwrap().unwrap();
        let second = writer.write(&rows).unwrap().unwrap();
        assert_ne!(first, second);

        let text = std::fs::read_to_string(&first).unwrap();
        let mut lines = text.lines();
        let header = lines.next().unwrap();
        assert!(header.starts_with("key,state,price,observed_at,name,email,phone,date,ldate"));
        assert!(header.ends_with("clientIP,CityFrom,StateFrom,ID"));
        assert!(lines.next().unwrap().starts_with("78240,done,142.5,"));
        assert!(lines.next().unwrap().starts_with("78241,failed,,"));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
