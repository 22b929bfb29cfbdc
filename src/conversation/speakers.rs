//! Identity resolution — user and bot speakers.

use libsql::params;
use tracing::debug;

use crate::conversation::model::Speaker;
use crate::error::DatabaseError;
use crate::store::UnitOfWork;
use crate::store::libsql_backend::{
    format_datetime, metadata_to_text, now, parse_datetime, text_to_metadata, write_error,
};

const SPEAKER_COLUMNS: &str = "id, metadata, created_at";

/// Id of the automated counterpart that answers `user_id`.
pub fn bot_id_for(user_id: &str) -> String {
    format!("bot:{user_id}")
}

fn row_to_speaker(row: &libsql::Row) -> Result<Speaker, libsql::Error> {
    let metadata: String = row.get(1)?;
    let created: String = row.get(2)?;
    Ok(Speaker {
        id: row.get(0)?,
        metadata: text_to_metadata(&metadata),
        created_at: parse_datetime(&created),
    })
}

/// Look up a speaker by id.
pub async fn find_speaker(uow: &UnitOfWork, id: &str) -> Result<Option<Speaker>, DatabaseError> {
    let mut rows = uow
        .query(
            &format!("SELECT {SPEAKER_COLUMNS} FROM speakers WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("find_speaker: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row_to_speaker(&row)
            .map(Some)
            .map_err(|e| DatabaseError::Query(format!("find_speaker row parse: {e}"))),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("find_speaker: {e}"))),
    }
}

/// Return the speaker with `speaker_id`, inserting it with `metadata` if absent.
///
/// A concurrent insert of the same id is absorbed by `ON CONFLICT DO NOTHING`;
/// the re-read then returns whichever row won.
pub async fn resolve_or_create(
    uow: &UnitOfWork,
    speaker_id: &str,
    metadata: serde_json::Value,
) -> Result<Speaker, DatabaseError> {
    if let Some(existing) = find_speaker(uow, speaker_id).await? {
        return Ok(existing);
    }

    let inserted = uow
        .execute(
            "INSERT INTO speakers (id, metadata, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (id) DO NOTHING",
            params![
                speaker_id,
                metadata_to_text(&metadata)?,
                format_datetime(&now())
            ],
        )
        .await
        .map_err(|e| write_error("insert_speaker", e))?;

    if inserted > 0 {
        debug!(speaker_id, "Speaker created");
    }

    find_speaker(uow, speaker_id).await?.ok_or_else(|| {
        DatabaseError::Consistency(format!("speaker {speaker_id} missing after insert"))
    })
}

/// Resolve the human speaker for `user_id`.
pub async fn resolve_user(uow: &UnitOfWork, user_id: &str) -> Result<Speaker, DatabaseError> {
    resolve_or_create(uow, user_id, serde_json::json!({ "type": "user" })).await
}

/// Resolve the bot speaker paired with `user_id`.
pub async fn resolve_bot(uow: &UnitOfWork, user_id: &str) -> Result<Speaker, DatabaseError> {
    resolve_or_create(uow, &bot_id_for(user_id), serde_json::json!({ "type": "bot" })).await
}

/// Total number of speakers.
pub async fn count_speakers(uow: &UnitOfWork) -> Result<i64, DatabaseError> {
    let mut rows = uow
        .query("SELECT COUNT(*) FROM speakers", ())
        .await
        .map_err(|e| DatabaseError::Query(format!("count_speakers: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("count_speakers: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count_speakers: {e}"))),
    }
}
