//! Conversation registry — one open conversation per owning speaker.
//!
//! The invariant lives in the database (`uq_conversations_open_owner`, a
//! partial unique index), not in process memory, because competing requests
//! may run on separate connections or processes. Creation is
//! compare-and-retry: look up, insert inside a savepoint, and on a uniqueness
//! conflict roll back the savepoint and look up again.

use libsql::params;
use tracing::{debug, info};

use crate::conversation::model::{Conversation, ConversationStatus, new_id};
use crate::error::DatabaseError;
use crate::store::UnitOfWork;
use crate::store::libsql_backend::{
    format_datetime, metadata_to_text, now, parse_datetime, text_to_metadata, write_error,
};

const CONVERSATION_COLUMNS: &str =
    "id, owner_speaker_id, status, last_activity_at, metadata, created_at";

fn row_to_conversation(row: &libsql::Row) -> Result<Conversation, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("conversation row parse: {e}"));
    let status: String = row.get(2).map_err(parse)?;
    let last_activity: String = row.get(3).map_err(parse)?;
    let metadata: String = row.get(4).map_err(parse)?;
    let created: String = row.get(5).map_err(parse)?;
    Ok(Conversation {
        id: row.get(0).map_err(parse)?,
        owner_speaker_id: row.get(1).map_err(parse)?,
        status: status.parse()?,
        last_activity_at: parse_datetime(&last_activity),
        metadata: text_to_metadata(&metadata),
        created_at: parse_datetime(&created),
    })
}

async fn query_one(
    uow: &UnitOfWork,
    op: &str,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Option<Conversation>, DatabaseError> {
    let mut rows = uow
        .query(sql, params)
        .await
        .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => row_to_conversation(&row).map(Some),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
    }
}

/// The owner's open conversation, if any.
pub async fn find_open(
    uow: &UnitOfWork,
    owner_speaker_id: &str,
) -> Result<Option<Conversation>, DatabaseError> {
    query_one(
        uow,
        "find_open_conversation",
        &format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE owner_speaker_id = ?1 AND status = ?2"
        ),
        params![owner_speaker_id, ConversationStatus::Open.as_str()],
    )
    .await
}

/// Point lookup by id.
pub async fn fetch_conversation(uow: &UnitOfWork, id: &str) -> Result<Conversation, DatabaseError> {
    query_one(
        uow,
        "fetch_conversation",
        &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
        params![id],
    )
    .await?
    .ok_or_else(|| DatabaseError::not_found("conversation", id))
}

/// Return the owner's open conversation, creating it if there is none.
pub async fn get_or_create_open(
    uow: &UnitOfWork,
    owner_speaker_id: &str,
    metadata: serde_json::Value,
) -> Result<Conversation, DatabaseError> {
    if let Some(existing) = find_open(uow, owner_speaker_id).await? {
        return Ok(existing);
    }
    create_open_or_reuse(uow, owner_speaker_id, metadata).await
}

/// Insert a new open conversation, deferring to a concurrent winner.
///
/// Only a uniqueness conflict is absorbed; any other write error propagates.
/// If the conflict was reported but no open row is visible afterwards, the
/// store is inconsistent and the error is fatal.
pub async fn create_open_or_reuse(
    uow: &UnitOfWork,
    owner_speaker_id: &str,
    metadata: serde_json::Value,
) -> Result<Conversation, DatabaseError> {
    let id = new_id();
    let ts = format_datetime(&now());
    let metadata_text = metadata_to_text(&metadata)?;

    let savepoint = uow.savepoint("create_open_conversation").await?;
    let insert = uow
        .execute(
            "INSERT INTO conversations
                (id, owner_speaker_id, status, last_activity_at, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?4)",
            params![
                id.clone(),
                owner_speaker_id,
                ConversationStatus::Open.as_str(),
                ts,
                metadata_text
            ],
        )
        .await
        .map_err(|e| write_error("insert_conversation", e));

    match insert {
        Ok(_) => {
            savepoint.release().await?;
            info!(conversation_id = %id, owner = owner_speaker_id, "Conversation opened");
            fetch_conversation(uow, &id).await
        }
        Err(DatabaseError::Conflict(reason)) => {
            savepoint.rollback().await?;
            debug!(owner = owner_speaker_id, %reason, "Lost open-conversation race, re-reading");
            find_open(uow, owner_speaker_id).await?.ok_or_else(|| {
                DatabaseError::Consistency(format!(
                    "open conversation for {owner_speaker_id} conflicted but is not visible"
                ))
            })
        }
        Err(e) => {
            savepoint.rollback().await?;
            Err(e)
        }
    }
}

/// Count conversations, optionally restricted to one status.
pub async fn count_conversations(
    uow: &UnitOfWork,
    status: Option<ConversationStatus>,
) -> Result<i64, DatabaseError> {
    let mut rows = match status {
        Some(status) => {
            uow.query(
                "SELECT COUNT(*) FROM conversations WHERE status = ?1",
                params![status.as_str()],
            )
            .await
        }
        None => uow.query("SELECT COUNT(*) FROM conversations", ()).await,
    }
    .map_err(|e| DatabaseError::Query(format!("count_conversations: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("count_conversations: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count_conversations: {e}"))),
    }
}
