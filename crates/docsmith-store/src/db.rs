use rusqlite::{Connection, Result};

/// Initialise all pipeline tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_stream_tables(conn)?;
    create_message_tables(conn)?;
    create_proposal_tables(conn)?;
    create_cache_tables(conn)?;
    create_run_log_table(conn)?;
    Ok(())
}

fn create_stream_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS stream_configs (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id       TEXT NOT NULL,
            stream_id       TEXT NOT NULL,
            adapter_type    TEXT NOT NULL,
            config_json     TEXT NOT NULL,
            enabled         INTEGER NOT NULL DEFAULT 1,
            schedule        TEXT,
            disabled_reason TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            UNIQUE(tenant_id, stream_id)
        );

        CREATE TABLE IF NOT EXISTS import_watermarks (
            stream_id          TEXT NOT NULL,
            resource_id        TEXT NOT NULL DEFAULT '',
            last_imported_time TEXT NOT NULL,
            last_imported_id   TEXT,
            import_complete    INTEGER NOT NULL DEFAULT 0,
            updated_at         TEXT NOT NULL,
            PRIMARY KEY (stream_id, resource_id)
        );

        CREATE TABLE IF NOT EXISTS processing_watermarks (
            stream_id            TEXT PRIMARY KEY,
            watermark_time       TEXT NOT NULL,
            last_processed_batch TEXT,
            updated_at           TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tenant_rulesets (
            tenant_id        TEXT PRIMARY KEY,
            content_markdown TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );",
    )
}

fn create_message_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS unified_messages (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id         TEXT NOT NULL,
            stream_id         TEXT NOT NULL,
            message_id        TEXT NOT NULL,
            timestamp         TEXT NOT NULL,
            author            TEXT NOT NULL,
            content           TEXT NOT NULL,
            channel           TEXT,
            raw_data          TEXT NOT NULL,
            metadata_json     TEXT NOT NULL DEFAULT '{}',
            embedding_json    TEXT,
            conversation_id   TEXT,
            processing_status TEXT NOT NULL DEFAULT 'PENDING',
            failure_count     INTEGER NOT NULL DEFAULT 0,
            last_error        TEXT,
            created_at        TEXT NOT NULL,
            UNIQUE(stream_id, message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_stream_time
            ON unified_messages(stream_id, timestamp);
        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON unified_messages(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_messages_status
            ON unified_messages(processing_status, stream_id);

        CREATE TABLE IF NOT EXISTS message_classifications (
            id                       INTEGER PRIMARY KEY AUTOINCREMENT,
            message_id               INTEGER NOT NULL REFERENCES unified_messages(id),
            batch_id                 TEXT NOT NULL,
            category                 TEXT NOT NULL,
            doc_value_reason         TEXT NOT NULL,
            suggested_doc_page       TEXT,
            rag_search_criteria_json TEXT NOT NULL DEFAULT '[]',
            model_used               TEXT NOT NULL,
            created_at               TEXT NOT NULL,
            UNIQUE(message_id)
        );
        CREATE INDEX IF NOT EXISTS idx_classifications_batch
            ON message_classifications(batch_id);

        CREATE TABLE IF NOT EXISTS rag_contexts (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            conversation_id     TEXT NOT NULL,
            retrieved_docs_json TEXT NOT NULL,
            total_tokens        INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_rag_conversation
            ON rag_contexts(conversation_id);",
    )
}

fn create_proposal_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS changeset_batches (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            batch_id            TEXT NOT NULL UNIQUE,
            tenant_id           TEXT NOT NULL,
            status              TEXT NOT NULL DEFAULT 'draft',
            pr_title            TEXT,
            pr_body             TEXT,
            pr_url              TEXT,
            pr_number           INTEGER,
            branch_name         TEXT,
            total_proposals     INTEGER NOT NULL DEFAULT 0,
            affected_files_json TEXT NOT NULL DEFAULT '[]',
            created_at          TEXT NOT NULL,
            submitted_at        TEXT,
            submitted_by        TEXT
        );

        CREATE TABLE IF NOT EXISTS doc_proposals (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id             TEXT NOT NULL,
            conversation_id       TEXT NOT NULL,
            message_ids_json      TEXT NOT NULL DEFAULT '[]',
            page                  TEXT NOT NULL,
            update_type           TEXT NOT NULL,
            section               TEXT,
            location_json         TEXT,
            suggested_text        TEXT NOT NULL,
            edited_text           TEXT,
            reasoning             TEXT NOT NULL,
            confidence            REAL NOT NULL,
            status                TEXT NOT NULL DEFAULT 'pending',
            discard_reason        TEXT,
            enrichment_json       TEXT,
            quality_flags_json    TEXT,
            batch_id              TEXT REFERENCES changeset_batches(batch_id),
            pr_application_status TEXT,
            pr_application_error  TEXT,
            created_at            TEXT NOT NULL,
            reviewed_at           TEXT,
            reviewed_by           TEXT,
            edited_at             TEXT,
            edited_by             TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_proposals_status
            ON doc_proposals(status, tenant_id);
        CREATE INDEX IF NOT EXISTS idx_proposals_conversation
            ON doc_proposals(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_proposals_page
            ON doc_proposals(page);",
    )
}

fn create_cache_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS llm_cache (
            hash        TEXT PRIMARY KEY,
            purpose     TEXT NOT NULL,
            prompt      TEXT NOT NULL,
            response    TEXT NOT NULL,
            model       TEXT NOT NULL,
            tokens_used INTEGER NOT NULL DEFAULT 0,
            timestamp   TEXT NOT NULL,
            message_id  INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_llm_cache_message
            ON llm_cache(message_id);

        CREATE TABLE IF NOT EXISTS doc_index_cache (
            commit_hash        TEXT NOT NULL,
            config_hash        TEXT NOT NULL,
            index_data_json    TEXT NOT NULL,
            compact_index_text TEXT NOT NULL,
            generated_at       TEXT NOT NULL,
            PRIMARY KEY (commit_hash, config_hash)
        );",
    )
}

fn create_run_log_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id           TEXT NOT NULL,
            batch_id            TEXT NOT NULL,
            step_name           TEXT NOT NULL,
            status              TEXT NOT NULL,
            started_at          TEXT NOT NULL,
            finished_at         TEXT,
            input_summary_json  TEXT,
            output_summary_json TEXT,
            error               TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_batch
            ON pipeline_runs(batch_id);",
    )
}
