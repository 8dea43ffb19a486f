//! Session/stage store
//!
//! Each session's stages form a linear version log indexed by `ordinal`.
//! Appending writes the stage and the session summary in one transaction;
//! reverting truncates the log tail and rewrites the summary in one
//! transaction. Callers serialise mutations of a single session (see
//! `pipeline::SessionLocks`); different sessions proceed in parallel.

use chrono::{DateTime, Utc};
use nomen_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{
    NewStage, NormalizationSession, NormalizationStage, SessionStatus, StatusTransition,
};
use crate::utils::{begin_monitored, retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

const SESSION_COLUMNS: &str = "id, catalog_item_id, original_name, current_name, stages_count, status, created_at, updated_at";

const STAGE_COLUMNS: &str = r#"id, session_id, ordinal, stage_type, stage_name, input_name, output_name,
    applied_patterns, ai_context, category_original, category_folded, classification_strategy,
    classification_code, classification_name, confidence, status, error_message, created_at"#;

/// Insert a new `in_progress` session with no stages
pub async fn create_session(pool: &SqlitePool, catalog_item_id: i64, original_name: &str) -> Result<i64> {
    let now = Utc::now().to_rfc3339();

    let result = sqlx::query(
        r#"
        INSERT INTO normalization_sessions
            (catalog_item_id, original_name, current_name, stages_count, status, created_at, updated_at)
        VALUES (?, ?, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(catalog_item_id)
    .bind(original_name)
    .bind(original_name)
    .bind(SessionStatus::InProgress.as_str())
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    let session_id = result.last_insert_rowid();
    tracing::debug!(session_id, catalog_item_id, "Normalization session created");

    Ok(session_id)
}

pub async fn get_session(pool: &SqlitePool, session_id: i64) -> Result<Option<NormalizationSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM normalization_sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Like `get_session`, but a missing session is `NotFound`
pub async fn require_session(pool: &SqlitePool, session_id: i64) -> Result<NormalizationSession> {
    get_session(pool, session_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("normalization session {}", session_id)))
}

/// Most recent session opened for a catalog item
pub async fn find_latest_session_for_item(
    pool: &SqlitePool,
    catalog_item_id: i64,
) -> Result<Option<NormalizationSession>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM normalization_sessions WHERE catalog_item_id = ? ORDER BY id DESC LIMIT 1",
        SESSION_COLUMNS
    ))
    .bind(catalog_item_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_session).transpose()
}

/// Append a stage to its session's log
///
/// Fails with `NotFound` for an unknown session, and with `Conflict` when
/// the session is not `in_progress` or when `input_name` does not continue
/// the chain from the session's `current_name`.
pub async fn append_stage(pool: &SqlitePool, stage: &NewStage) -> Result<NormalizationStage> {
    retry_on_lock("append_stage", DEFAULT_MAX_LOCK_WAIT_MS, || append_stage_once(pool, stage)).await
}

async fn append_stage_once(pool: &SqlitePool, stage: &NewStage) -> Result<NormalizationStage> {
    let applied_patterns = serde_json::to_string(&stage.applied_patterns)?;
    let ai_context = stage.ai_context.as_ref().map(|v| v.to_string());
    let category_original = stage.category_original.as_ref().map(serde_json::to_string).transpose()?;
    let category_folded = stage.category_folded.as_ref().map(serde_json::to_string).transpose()?;
    let now = Utc::now().to_rfc3339();

    let mut tx = begin_monitored(pool, "sessions::append_stage").await?;

    let row = sqlx::query("SELECT current_name, stages_count, status FROM normalization_sessions WHERE id = ?")
        .bind(stage.session_id)
        .fetch_optional(tx.conn()?)
        .await?
        .ok_or_else(|| Error::NotFound(format!("normalization session {}", stage.session_id)))?;

    let current_name: String = row.get("current_name");
    let stages_count: i64 = row.get("stages_count");
    let status: SessionStatus = row.get::<String, _>("status").parse()?;

    if !status.accepts_stages() {
        return Err(Error::Conflict(format!(
            "session {} is {}; re-open it before appending stages",
            stage.session_id, status
        )));
    }
    if current_name != stage.input_name {
        return Err(Error::Conflict(format!(
            "stage input '{}' does not continue session {} at '{}'",
            stage.input_name, stage.session_id, current_name
        )));
    }

    let ordinal = stages_count + 1;

    let result = sqlx::query(
        r#"
        INSERT INTO normalization_stages (
            session_id, ordinal, stage_type, stage_name, input_name, output_name,
            applied_patterns, ai_context, category_original, category_folded,
            classification_strategy, classification_code, classification_name,
            confidence, status, error_message, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(stage.session_id)
    .bind(ordinal)
    .bind(stage.stage_type.as_str())
    .bind(&stage.stage_name)
    .bind(&stage.input_name)
    .bind(&stage.output_name)
    .bind(&applied_patterns)
    .bind(&ai_context)
    .bind(&category_original)
    .bind(&category_folded)
    .bind(&stage.classification_strategy)
    .bind(&stage.classification_code)
    .bind(&stage.classification_name)
    .bind(stage.confidence)
    .bind(stage.status.as_str())
    .bind(&stage.error_message)
    .bind(&now)
    .execute(tx.conn()?)
    .await?;

    let stage_id = result.last_insert_rowid();

    sqlx::query(
        r#"
        UPDATE normalization_sessions
        SET stages_count = ?, current_name = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(ordinal)
    .bind(&stage.output_name)
    .bind(&now)
    .bind(stage.session_id)
    .execute(tx.conn()?)
    .await?;

    let stored = sqlx::query(&format!("SELECT {} FROM normalization_stages WHERE id = ?", STAGE_COLUMNS))
        .bind(stage_id)
        .fetch_one(tx.conn()?)
        .await?;
    let stored = row_to_stage(&stored)?;

    tx.commit().await?;

    tracing::debug!(
        session_id = stage.session_id,
        stage_id,
        ordinal,
        stage_type = %stage.stage_type,
        "Stage appended"
    );

    Ok(stored)
}

/// All stages of a session in log order; empty when there are none
pub async fn get_history(pool: &SqlitePool, session_id: i64) -> Result<Vec<NormalizationStage>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM normalization_stages WHERE session_id = ? ORDER BY ordinal ASC, id ASC",
        STAGE_COLUMNS
    ))
    .bind(session_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_stage).collect()
}

/// Truncate the session's log after `target_stage_id`
///
/// The target stage is kept. The session becomes `reverted` with
/// `current_name` equal to the target's output. A target that does not
/// exist is `NotFound`; one that belongs to another session is `Conflict`.
/// Either failure leaves the session untouched.
pub async fn revert_to_stage(
    pool: &SqlitePool,
    session_id: i64,
    target_stage_id: i64,
) -> Result<NormalizationSession> {
    retry_on_lock("revert_to_stage", DEFAULT_MAX_LOCK_WAIT_MS, || {
        revert_to_stage_once(pool, session_id, target_stage_id)
    })
    .await
}

async fn revert_to_stage_once(
    pool: &SqlitePool,
    session_id: i64,
    target_stage_id: i64,
) -> Result<NormalizationSession> {
    let now = Utc::now().to_rfc3339();
    let mut tx = begin_monitored(pool, "sessions::revert_to_stage").await?;

    let session_exists: Option<i64> = sqlx::query_scalar("SELECT id FROM normalization_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(tx.conn()?)
        .await?;
    if session_exists.is_none() {
        return Err(Error::NotFound(format!("normalization session {}", session_id)));
    }

    let target = sqlx::query("SELECT session_id, ordinal, output_name FROM normalization_stages WHERE id = ?")
        .bind(target_stage_id)
        .fetch_optional(tx.conn()?)
        .await?
        .ok_or_else(|| Error::NotFound(format!("normalization stage {}", target_stage_id)))?;

    let owner: i64 = target.get("session_id");
    if owner != session_id {
        return Err(Error::Conflict(format!(
            "stage {} belongs to session {}, not {}",
            target_stage_id, owner, session_id
        )));
    }
    let ordinal: i64 = target.get("ordinal");
    let output_name: String = target.get("output_name");

    let deleted = sqlx::query("DELETE FROM normalization_stages WHERE session_id = ? AND ordinal > ?")
        .bind(session_id)
        .bind(ordinal)
        .execute(tx.conn()?)
        .await?
        .rows_affected();

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM normalization_stages WHERE session_id = ?")
        .bind(session_id)
        .fetch_one(tx.conn()?)
        .await?;

    sqlx::query(
        r#"
        UPDATE normalization_sessions
        SET current_name = ?, stages_count = ?, status = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&output_name)
    .bind(remaining)
    .bind(SessionStatus::Reverted.as_str())
    .bind(&now)
    .bind(session_id)
    .execute(tx.conn()?)
    .await?;

    let row = sqlx::query(&format!(
        "SELECT {} FROM normalization_sessions WHERE id = ?",
        SESSION_COLUMNS
    ))
    .bind(session_id)
    .fetch_one(tx.conn()?)
    .await?;
    let session = row_to_session(&row)?;

    tx.commit().await?;

    tracing::info!(
        session_id,
        target_stage_id,
        deleted_stages = deleted,
        stages_count = remaining,
        "Session reverted"
    );

    Ok(session)
}

/// Set session status; transition legality is the caller's concern
pub async fn update_status(
    pool: &SqlitePool,
    session_id: i64,
    status: SessionStatus,
) -> Result<StatusTransition> {
    retry_on_lock("update_status", DEFAULT_MAX_LOCK_WAIT_MS, || {
        update_status_once(pool, session_id, status)
    })
    .await
}

async fn update_status_once(
    pool: &SqlitePool,
    session_id: i64,
    status: SessionStatus,
) -> Result<StatusTransition> {
    let now = Utc::now();
    let mut tx = begin_monitored(pool, "sessions::update_status").await?;

    let old: String = sqlx::query_scalar("SELECT status FROM normalization_sessions WHERE id = ?")
        .bind(session_id)
        .fetch_optional(tx.conn()?)
        .await?
        .ok_or_else(|| Error::NotFound(format!("normalization session {}", session_id)))?;

    sqlx::query("UPDATE normalization_sessions SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(now.to_rfc3339())
        .bind(session_id)
        .execute(tx.conn()?)
        .await?;

    tx.commit().await?;

    Ok(StatusTransition {
        session_id,
        old_status: old.parse()?,
        new_status: status,
        transitioned_at: now,
    })
}

fn row_to_session(row: &SqliteRow) -> Result<NormalizationSession> {
    Ok(NormalizationSession {
        id: row.get("id"),
        catalog_item_id: row.get("catalog_item_id"),
        original_name: row.get("original_name"),
        current_name: row.get("current_name"),
        stages_count: row.get("stages_count"),
        status: row.get::<String, _>("status").parse()?,
        created_at: parse_timestamp(row.get("created_at"))?,
        updated_at: parse_timestamp(row.get("updated_at"))?,
    })
}

fn row_to_stage(row: &SqliteRow) -> Result<NormalizationStage> {
    let applied_patterns: String = row.get("applied_patterns");
    let ai_context: Option<String> = row.get("ai_context");
    let category_original: Option<String> = row.get("category_original");
    let category_folded: Option<String> = row.get("category_folded");

    Ok(NormalizationStage {
        id: row.get("id"),
        session_id: row.get("session_id"),
        ordinal: row.get("ordinal"),
        stage_type: row.get::<String, _>("stage_type").parse()?,
        stage_name: row.get("stage_name"),
        input_name: row.get("input_name"),
        output_name: row.get("output_name"),
        applied_patterns: serde_json::from_str(&applied_patterns)?,
        ai_context: ai_context.as_deref().map(serde_json::from_str).transpose()?,
        category_original: category_original.as_deref().map(serde_json::from_str).transpose()?,
        category_folded: category_folded.as_deref().map(serde_json::from_str).transpose()?,
        classification_strategy: row.get("classification_strategy"),
        classification_code: row.get("classification_code"),
        classification_name: row.get("classification_name"),
        confidence: row.get("confidence"),
        status: row.get::<String, _>("status").parse()?,
        error_message: row.get("error_message"),
        created_at: parse_timestamp(row.get("created_at"))?,
    })
}

pub(crate) fn parse_timestamp(value: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse timestamp '{}': {}", value, e)))
}
