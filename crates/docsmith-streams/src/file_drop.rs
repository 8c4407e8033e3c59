//! File-drop adapter: CSV files dropped into a watched directory.
//!
//! Each run scans the drop directory, imports every CSV found, then moves
//! the file to `processed/` beside a JSON report (or to `error/` when the
//! file cannot be read). Dedup happens at the database layer, so dropping
//! the same file twice imports nothing the second time and the report says
//! so.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docsmith_core::types::AdapterType;
use docsmith_store::types::NewMessage;

use crate::adapter::{AdapterContext, StreamAdapter};
use crate::error::{Result, StreamError};

#[derive(Debug, Clone, Deserialize)]
pub struct FileDropConfig {
    /// Directory scanned for `*.csv` drops.
    pub drop_dir: String,
    /// Defaults to `<drop_dir>/processed`.
    #[serde(default)]
    pub processed_dir: Option<String>,
    /// Defaults to `<drop_dir>/error`.
    #[serde(default)]
    pub error_dir: Option<String>,
}

/// Import report written next to each processed file.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub file: String,
    pub processed_records: u64,
    pub skipped_records: u64,
    pub error_records: u64,
    pub completed_at: DateTime<Utc>,
}

pub struct FileDropAdapter {
    config: FileDropConfig,
    run_lock: tokio::sync::Mutex<()>,
}

impl FileDropAdapter {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: FileDropConfig = serde_json::from_value(config.clone())
            .map_err(|e| StreamError::Config(format!("file-drop: {e}")))?;
        if config.drop_dir.trim().is_empty() {
            return Err(StreamError::Config(
                "file-drop: drop_dir must not be empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn processed_dir(&self) -> PathBuf {
        self.config
            .processed_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&self.config.drop_dir).join("processed"))
    }

    fn error_dir(&self) -> PathBuf {
        self.config
            .error_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Path::new(&self.config.drop_dir).join("error"))
    }

    fn import_file(&self, ctx: &AdapterContext, path: &Path) -> Result<ImportReport> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut reader = csv::Reader::from_path(path)?;
        let headers = reader.headers()?.clone();
        let col = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

        let timestamp_col = col("timestamp")
            .ok_or_else(|| StreamError::Parse(format!("{filename}: missing 'timestamp' column")))?;
        let author_col = col("author")
            .ok_or_else(|| StreamError::Parse(format!("{filename}: missing 'author' column")))?;
        let content_col = col("content")
            .ok_or_else(|| StreamError::Parse(format!("{filename}: missing 'content' column")))?;
        let message_id_col = col("message_id");
        let channel_col = col("channel");
        let topic_col = col("topic");
        let reply_col = col("reply_to_message_id");

        let file_stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| filename.clone());

        let mut processed = 0u64;
        let mut skipped = 0u64;
        let mut errors = 0u64;
        let mut max_time: Option<DateTime<Utc>> = None;
        let mut last_row = 0u64;

        for (row_index, record) in reader.records().enumerate() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(file = %filename, row = row_index, error = %e, "bad CSV row");
                    errors += 1;
                    continue;
                }
            };
            last_row = row_index as u64;

            let timestamp = match record.get(timestamp_col).map(parse_timestamp) {
                Some(Ok(ts)) => ts,
                _ => {
                    warn!(file = %filename, row = row_index, "unparsable timestamp");
                    errors += 1;
                    continue;
                }
            };

            let message_id = message_id_col
                .and_then(|c| record.get(c))
                .filter(|s| !s.is_empty())
                .map(String::from)
                .unwrap_or_else(|| format!("{file_stem}:{row_index}"));

            let mut metadata = serde_json::Map::new();
            if let Some(topic) = topic_col.and_then(|c| record.get(c)).filter(|s| !s.is_empty()) {
                metadata.insert("topic".to_string(), topic.into());
            }
            if let Some(reply) = reply_col.and_then(|c| record.get(c)).filter(|s| !s.is_empty()) {
                metadata.insert("reply_to_message_id".to_string(), reply.into());
            }

            let raw_data = serde_json::to_string(
                &record.iter().collect::<Vec<_>>(),
            )
            .unwrap_or_default();

            let inserted = ctx.store.insert_message(&NewMessage {
                tenant_id: ctx.tenant_id.clone(),
                stream_id: ctx.stream_id.clone(),
                message_id,
                timestamp,
                author: record.get(author_col).unwrap_or("unknown").to_string(),
                content: record.get(content_col).unwrap_or_default().to_string(),
                channel: channel_col
                    .and_then(|c| record.get(c))
                    .filter(|s| !s.is_empty())
                    .map(String::from),
                raw_data,
                metadata: serde_json::Value::Object(metadata),
            })?;

            if inserted {
                processed += 1;
            } else {
                skipped += 1;
            }
            max_time = Some(max_time.map_or(timestamp, |t: DateTime<Utc>| t.max(timestamp)));
        }

        if let Some(max_time) = max_time {
            ctx.store.advance_import_watermark(
                &ctx.stream_id,
                &filename,
                &max_time,
                Some(&last_row.to_string()),
                true,
            )?;
        }

        Ok(ImportReport {
            file: filename,
            processed_records: processed,
            skipped_records: skipped,
            error_records: errors,
            completed_at: Utc::now(),
        })
    }
}

#[async_trait]
impl StreamAdapter for FileDropAdapter {
    fn adapter_type(&self) -> AdapterType {
        AdapterType::FileDrop
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<u64> {
        let _guard = self.run_lock.lock().await;

        let mut drops: Vec<PathBuf> = std::fs::read_dir(&self.config.drop_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .map(|ext| ext.eq_ignore_ascii_case("csv"))
                        .unwrap_or(false)
            })
            .collect();
        drops.sort();

        let processed_dir = self.processed_dir();
        let error_dir = self.error_dir();

        let mut imported = 0u64;
        for path in drops {
            if ctx.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            match self.import_file(ctx, &path) {
                Ok(report) => {
                    imported += report.processed_records;
                    info!(
                        stream_id = %ctx.stream_id,
                        file = %report.file,
                        processed = report.processed_records,
                        skipped = report.skipped_records,
                        "csv file imported"
                    );
                    move_with_report(&path, &processed_dir, Some(&report))?;
                }
                Err(e) => {
                    warn!(stream_id = %ctx.stream_id, file = %path.display(), error = %e, "csv import failed");
                    move_with_report(&path, &error_dir, None)?;
                }
            }
        }
        Ok(imported)
    }

    async fn shutdown(&self) {}
}

/// Accept RFC-3339 or unix epoch seconds.
fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(secs) = s.trim().parse::<i64>() {
        if let Some(dt) = Utc.timestamp_opt(secs, 0).single() {
            return Ok(dt);
        }
    }
    Err(format!("unparsable timestamp: {s}"))
}

fn move_with_report(path: &Path, target_dir: &Path, report: Option<&ImportReport>) -> Result<()> {
    std::fs::create_dir_all(target_dir)?;
    let filename = path.file_name().unwrap_or_default();
    let target = target_dir.join(filename);
    std::fs::rename(path, &target)?;
    if let Some(report) = report {
        let report_path = target.with_extension("report.json");
        std::fs::write(report_path, serde_json::to_vec_pretty(report).unwrap_or_default())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_store::Store;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const CSV: &str = "message_id,timestamp,author,content,channel,topic\n\
        m1,2025-10-02T10:00:00Z,alice,how do I configure rpc timeout?,support,rpc\n\
        m2,2025-10-02T10:01:00Z,bob,set rpc_timeout in the client block,support,rpc\n";

    fn ctx(store: Arc<Store>) -> AdapterContext {
        AdapterContext {
            store,
            tenant_id: "t1".into(),
            stream_id: "csv-drops".into(),
            client: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn adapter_for(dir: &Path) -> FileDropAdapter {
        FileDropAdapter::from_config(&serde_json::json!({
            "drop_dir": dir.to_string_lossy(),
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn imports_moves_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("batch1.csv"), CSV).unwrap();

        let store = Arc::new(Store::open_in_memory().unwrap());
        let adapter = adapter_for(dir.path());
        let imported = adapter.run(&ctx(store.clone())).await.unwrap();
        assert_eq!(imported, 2);

        // File moved to processed/ with a JSON report.
        assert!(!dir.path().join("batch1.csv").exists());
        let report_path = dir.path().join("processed/batch1.report.json");
        let report: ImportReport =
            serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
        assert_eq!(report.processed_records, 2);
        assert_eq!(report.skipped_records, 0);

        // Metadata and watermark landed.
        let wm = store
            .get_import_watermark("csv-drops", "batch1.csv")
            .unwrap()
            .unwrap();
        assert_eq!(wm.last_imported_id.as_deref(), Some("1"));
        assert!(wm.import_complete);
    }

    #[tokio::test]
    async fn reimport_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let adapter = adapter_for(dir.path());

        std::fs::write(dir.path().join("batch1.csv"), CSV).unwrap();
        adapter.run(&ctx(store.clone())).await.unwrap();

        // Drop the identical file again.
        std::fs::write(dir.path().join("batch1.csv"), CSV).unwrap();
        let imported = adapter.run(&ctx(store.clone())).await.unwrap();
        assert_eq!(imported, 0);

        let report: ImportReport = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("processed/batch1.report.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(report.processed_records, 0);
        assert_eq!(report.skipped_records, 2);
        assert_eq!(store.pending_count("csv-drops").unwrap(), 2);
    }

    #[tokio::test]
    async fn broken_file_goes_to_error_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.csv"), "no,useful,columns\n1,2,3\n").unwrap();

        let store = Arc::new(Store::open_in_memory().unwrap());
        let adapter = adapter_for(dir.path());
        let imported = adapter.run(&ctx(store)).await.unwrap();
        assert_eq!(imported, 0);
        assert!(dir.path().join("error/bad.csv").exists());
    }

    #[test]
    fn timestamp_accepts_epoch_and_rfc3339() {
        assert!(parse_timestamp("2025-10-02T10:00:00Z").is_ok());
        assert!(parse_timestamp("1759399200").is_ok());
        assert!(parse_timestamp("next tuesday").is_err());
    }
}
