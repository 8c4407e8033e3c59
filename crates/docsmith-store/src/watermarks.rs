//! Import and processing watermarks.
//!
//! Import watermarks record what an adapter has fetched per
//! `(stream, resource)`. The processing watermark is strictly per stream —
//! it advances only inside the batch-commit transaction (see `commit`).

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::{ImportWatermark, ProcessingWatermark};
use crate::{now_rfc3339, parse_ts, ts_to_sql, Store};

impl Store {
    pub fn get_import_watermark(
        &self,
        stream_id: &str,
        resource_id: &str,
    ) -> Result<Option<ImportWatermark>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT stream_id, resource_id, last_imported_time, last_imported_id,
                    import_complete, updated_at
             FROM import_watermarks WHERE stream_id = ?1 AND resource_id = ?2",
            rusqlite::params![stream_id, resource_id],
            row_to_import_watermark,
        ) {
            Ok(w) => Ok(Some(w?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn import_watermarks_for_stream(&self, stream_id: &str) -> Result<Vec<ImportWatermark>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT stream_id, resource_id, last_imported_time, last_imported_id,
                    import_complete, updated_at
             FROM import_watermarks WHERE stream_id = ?1 ORDER BY resource_id",
        )?;
        let rows = stmt.query_map([stream_id], row_to_import_watermark)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Advance an import watermark after a fetch.
    ///
    /// Out-of-order deliveries are tolerated: `last_imported_id` only moves
    /// when the new id is strictly greater than the stored one, and
    /// `last_imported_time` never decreases. Returns the stored watermark.
    pub fn advance_import_watermark(
        &self,
        stream_id: &str,
        resource_id: &str,
        seen_time: &DateTime<Utc>,
        seen_id: Option<&str>,
        import_complete: bool,
    ) -> Result<ImportWatermark> {
        let db = self.db.lock().unwrap();
        let existing = match db.query_row(
            "SELECT stream_id, resource_id, last_imported_time, last_imported_id,
                    import_complete, updated_at
             FROM import_watermarks WHERE stream_id = ?1 AND resource_id = ?2",
            rusqlite::params![stream_id, resource_id],
            row_to_import_watermark,
        ) {
            Ok(w) => Some(w?),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(StoreError::Database(e)),
        };

        let (new_time, new_id) = match &existing {
            None => (*seen_time, seen_id.map(String::from)),
            Some(w) => {
                let time = (*seen_time).max(w.last_imported_time);
                let id = match (seen_id, w.last_imported_id.as_deref()) {
                    (Some(new), Some(old)) if id_greater(new, old) => Some(new.to_string()),
                    (Some(new), None) => Some(new.to_string()),
                    (_, old) => old.map(String::from),
                };
                (time, id)
            }
        };

        db.execute(
            "INSERT INTO import_watermarks
             (stream_id, resource_id, last_imported_time, last_imported_id,
              import_complete, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(stream_id, resource_id) DO UPDATE SET
               last_imported_time = excluded.last_imported_time,
               last_imported_id   = excluded.last_imported_id,
               import_complete    = excluded.import_complete,
               updated_at         = excluded.updated_at",
            rusqlite::params![
                stream_id,
                resource_id,
                ts_to_sql(&new_time),
                new_id,
                import_complete,
                now_rfc3339(),
            ],
        )?;

        Ok(ImportWatermark {
            stream_id: stream_id.to_string(),
            resource_id: resource_id.to_string(),
            last_imported_time: new_time,
            last_imported_id: new_id,
            import_complete,
            updated_at: Utc::now(),
        })
    }

    pub fn get_processing_watermark(&self, stream_id: &str) -> Result<Option<ProcessingWatermark>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT stream_id, watermark_time, last_processed_batch, updated_at
             FROM processing_watermarks WHERE stream_id = ?1",
            [stream_id],
            row_to_processing_watermark,
        ) {
            Ok(w) => Ok(Some(w?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn all_processing_watermarks(&self) -> Result<Vec<ProcessingWatermark>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT stream_id, watermark_time, last_processed_batch, updated_at
             FROM processing_watermarks ORDER BY stream_id",
        )?;
        let rows = stmt.query_map([], row_to_processing_watermark)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Create the per-stream watermark if absent. Used at the start of a
    /// stream's first batch tick; never moves an existing watermark.
    pub fn init_processing_watermark(
        &self,
        stream_id: &str,
        watermark_time: &DateTime<Utc>,
    ) -> Result<ProcessingWatermark> {
        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT OR IGNORE INTO processing_watermarks
                 (stream_id, watermark_time, updated_at)
                 VALUES (?1,?2,?3)",
                rusqlite::params![stream_id, ts_to_sql(watermark_time), now_rfc3339()],
            )?;
            debug!(stream_id, watermark = %watermark_time, "processing watermark initialised");
        }
        self.get_processing_watermark(stream_id)?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("processing watermark for {stream_id}"),
            })
    }
}

/// Compare two source message ids: numerically when both parse as integers
/// (chat-API update ids), lexicographically otherwise (row hashes).
pub(crate) fn id_greater(new: &str, old: &str) -> bool {
    match (new.parse::<i64>(), old.parse::<i64>()) {
        (Ok(n), Ok(o)) => n > o,
        _ => new > old,
    }
}

/// Watermark advance inside the batch-commit transaction. Monotonicity is
/// enforced here: a regression rolls the whole batch back.
pub(crate) fn advance_processing_watermark_tx(
    conn: &Connection,
    stream_id: &str,
    new_time: &DateTime<Utc>,
    batch_id: Option<&str>,
) -> Result<()> {
    let current: Option<String> = match conn.query_row(
        "SELECT watermark_time FROM processing_watermarks WHERE stream_id = ?1",
        [stream_id],
        |row| row.get(0),
    ) {
        Ok(t) => Some(t),
        Err(rusqlite::Error::QueryReturnedNoRows) => None,
        Err(e) => return Err(StoreError::Database(e)),
    };

    if let Some(cur) = &current {
        let cur_time = parse_ts(cur)?;
        if *new_time < cur_time {
            return Err(StoreError::WatermarkRegression {
                stream_id: stream_id.to_string(),
                from: cur.clone(),
                to: ts_to_sql(new_time),
            });
        }
    }

    conn.execute(
        "INSERT INTO processing_watermarks
         (stream_id, watermark_time, last_processed_batch, updated_at)
         VALUES (?1,?2,?3,?4)
         ON CONFLICT(stream_id) DO UPDATE SET
           watermark_time       = excluded.watermark_time,
           last_processed_batch = COALESCE(excluded.last_processed_batch,
                                           processing_watermarks.last_processed_batch),
           updated_at           = excluded.updated_at",
        rusqlite::params![stream_id, ts_to_sql(new_time), batch_id, now_rfc3339()],
    )?;
    Ok(())
}

fn row_to_import_watermark(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ImportWatermark>> {
    let time: String = row.get(2)?;
    let updated: String = row.get(5)?;
    Ok((|| {
        Ok(ImportWatermark {
            stream_id: row.get(0).map_err(StoreError::Database)?,
            resource_id: row.get(1).map_err(StoreError::Database)?,
            last_imported_time: parse_ts(&time)?,
            last_imported_id: row.get(3).map_err(StoreError::Database)?,
            import_complete: row.get(4).map_err(StoreError::Database)?,
            updated_at: parse_ts(&updated)?,
        })
    })())
}

fn row_to_processing_watermark(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<ProcessingWatermark>> {
    let time: String = row.get(1)?;
    let updated: String = row.get(3)?;
    Ok((|| {
        Ok(ProcessingWatermark {
            stream_id: row.get(0).map_err(StoreError::Database)?,
            watermark_time: parse_ts(&time)?,
            last_processed_batch: row.get(2).map_err(StoreError::Database)?,
            updated_at: parse_ts(&updated)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 2, h, 0, 0).unwrap()
    }

    #[test]
    fn import_watermark_ignores_stale_ids() {
        let store = Store::open_in_memory().unwrap();
        store
            .advance_import_watermark("s1", "general", &at(10), Some("100"), false)
            .unwrap();
        // An out-of-order delivery with a smaller id must not move the id back.
        let w = store
            .advance_import_watermark("s1", "general", &at(9), Some("90"), false)
            .unwrap();
        assert_eq!(w.last_imported_id.as_deref(), Some("100"));
        assert_eq!(w.last_imported_time, at(10));
    }

    #[test]
    fn import_watermark_numeric_compare() {
        // "9" < "100" numerically even though "9" > "100" lexicographically.
        assert!(id_greater("100", "9"));
        assert!(!id_greater("9", "100"));
        assert!(id_greater("b", "a"));
    }

    #[test]
    fn init_processing_watermark_is_first_writer_wins() {
        let store = Store::open_in_memory().unwrap();
        let w1 = store.init_processing_watermark("s1", &at(8)).unwrap();
        let w2 = store.init_processing_watermark("s1", &at(12)).unwrap();
        assert_eq!(w1.watermark_time, at(8));
        assert_eq!(w2.watermark_time, at(8));
    }

    #[test]
    fn per_stream_watermarks_are_independent() {
        let store = Store::open_in_memory().unwrap();
        store.init_processing_watermark("a", &at(1)).unwrap();
        store.init_processing_watermark("b", &at(20)).unwrap();

        let a = store.get_processing_watermark("a").unwrap().unwrap();
        let b = store.get_processing_watermark("b").unwrap().unwrap();
        assert_eq!(a.watermark_time, at(1));
        assert_eq!(b.watermark_time, at(20));
    }
}
