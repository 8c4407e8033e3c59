//! Pipeline run log — one row per executed step per batch.

use crate::error::{Result, StoreError};
use crate::types::{PipelineRun, RunStatus};
use crate::{now_rfc3339, parse_ts, Store};

impl Store {
    /// Open a run-log row as a step starts. Returns the row id to finish.
    pub fn run_log_start(
        &self,
        tenant_id: &str,
        batch_id: &str,
        step_name: &str,
        input_summary: Option<&serde_json::Value>,
    ) -> Result<i64> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO pipeline_runs
             (tenant_id, batch_id, step_name, status, started_at, input_summary_json)
             VALUES (?1,?2,?3,'running',?4,?5)",
            rusqlite::params![
                tenant_id,
                batch_id,
                step_name,
                now_rfc3339(),
                input_summary.map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Close a run-log row with its terminal status.
    pub fn run_log_finish(
        &self,
        id: i64,
        status: RunStatus,
        output_summary: Option<&serde_json::Value>,
        error: Option<&str>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE pipeline_runs
             SET status = ?2, finished_at = ?3, output_summary_json = ?4, error = ?5
             WHERE id = ?1",
            rusqlite::params![
                id,
                status.to_string(),
                now_rfc3339(),
                output_summary.map(serde_json::to_string).transpose()?,
                error,
            ],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("pipeline run {id}"),
            });
        }
        Ok(())
    }

    /// All step rows for one processing batch, in execution order.
    pub fn runs_for_batch(&self, batch_id: &str) -> Result<Vec<PipelineRun>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, tenant_id, batch_id, step_name, status, started_at, finished_at,
                    input_summary_json, output_summary_json, error
             FROM pipeline_runs WHERE batch_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([batch_id], row_to_run)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<PipelineRun>> {
    let status: String = row.get(4)?;
    let started_at: String = row.get(5)?;
    let finished_at: Option<String> = row.get(6)?;
    let input_json: Option<String> = row.get(7)?;
    let output_json: Option<String> = row.get(8)?;
    Ok((|| {
        let status = match status.as_str() {
            "running" => RunStatus::Running,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "skipped" => RunStatus::Skipped,
            other => return Err(StoreError::Corrupt(format!("unknown run status: {other}"))),
        };
        Ok(PipelineRun {
            id: row.get(0).map_err(StoreError::Database)?,
            tenant_id: row.get(1).map_err(StoreError::Database)?,
            batch_id: row.get(2).map_err(StoreError::Database)?,
            step_name: row.get(3).map_err(StoreError::Database)?,
            status,
            started_at: parse_ts(&started_at)?,
            finished_at: finished_at.map(|s| parse_ts(&s)).transpose()?,
            input_summary: input_json.map(|s| serde_json::from_str(&s)).transpose()?,
            output_summary: output_json.map(|s| serde_json::from_str(&s)).transpose()?,
            error: row.get(9).map_err(StoreError::Database)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_finish_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let id = store
            .run_log_start(
                "t1",
                "batch-1",
                "classify",
                Some(&serde_json::json!({"messages": 12})),
            )
            .unwrap();
        store
            .run_log_finish(
                id,
                RunStatus::Completed,
                Some(&serde_json::json!({"valuable": 3})),
                None,
            )
            .unwrap();

        let runs = store.runs_for_batch("batch-1").unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].step_name, "classify");
        assert_eq!(runs[0].status, RunStatus::Completed);
        assert!(runs[0].finished_at.is_some());
    }

    #[test]
    fn failed_step_records_error() {
        let store = Store::open_in_memory().unwrap();
        let id = store.run_log_start("t1", "batch-1", "generate", None).unwrap();
        store
            .run_log_finish(id, RunStatus::Failed, None, Some("llm exhausted"))
            .unwrap();

        let runs = store.runs_for_batch("batch-1").unwrap();
        assert_eq!(runs[0].status, RunStatus::Failed);
        assert_eq!(runs[0].error.as_deref(), Some("llm exhausted"));
    }
}
