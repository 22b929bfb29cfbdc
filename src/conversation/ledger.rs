//! Utterance ledger — append-only message turns and the reply state machine.
//!
//! Every function runs inside the caller's `UnitOfWork`; the ledger never
//! commits on its own.
//!
//! ```text
//! queued --(pipeline success)--> queued  [text populated, error cleared]
//! queued --(delivery success)--> sent    [terminal]
//! queued --(any failure)-------> failed  [terminal; error populated]
//! ```

use libsql::params;
use tracing::debug;

use crate::conversation::model::{Utterance, UtteranceStatus, new_id};
use crate::error::{DatabaseError, Error, TransitionError, ValidationError};
use crate::store::UnitOfWork;
use crate::store::libsql_backend::{format_datetime, now, opt_text, parse_datetime, write_error};

/// Longest diagnostic stored in `utterances.error`, in characters.
pub const MAX_ERROR_LENGTH: usize = 500;

const UTTERANCE_COLUMNS: &str =
    "id, conversation_id, speaker_id, text, reply_to_id, status, error, timestamp, created_at";

fn row_to_utterance(row: &libsql::Row) -> Result<Utterance, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("utterance row parse: {e}"));
    let status: String = row.get(5).map_err(parse)?;
    let timestamp: String = row.get(7).map_err(parse)?;
    let created: String = row.get(8).map_err(parse)?;
    Ok(Utterance {
        id: row.get(0).map_err(parse)?,
        conversation_id: row.get(1).map_err(parse)?,
        speaker_id: row.get(2).map_err(parse)?,
        text: row.get::<Option<String>>(3).map_err(parse)?,
        reply_to_id: row.get::<Option<String>>(4).map_err(parse)?,
        status: status.parse()?,
        error: row.get::<Option<String>>(6).map_err(parse)?,
        timestamp: parse_datetime(&timestamp),
        created_at: parse_datetime(&created),
    })
}

/// Truncate `s` to at most `max` characters.
pub fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Insert a row and advance the owning conversation's activity clock.
async fn append(
    uow: &UnitOfWork,
    conversation_id: &str,
    speaker_id: &str,
    text: Option<&str>,
    reply_to: Option<&str>,
    status: UtteranceStatus,
) -> Result<Utterance, Error> {
    let ts = format_datetime(&now());

    let touched = uow
        .execute(
            "UPDATE conversations SET last_activity_at = ?2 WHERE id = ?1",
            params![conversation_id, ts.clone()],
        )
        .await
        .map_err(|e| write_error("touch_conversation", e))?;
    if touched == 0 {
        return Err(DatabaseError::not_found("conversation", conversation_id).into());
    }

    let id = new_id();
    uow.execute(
        "INSERT INTO utterances
            (id, conversation_id, speaker_id, text, reply_to_id, status, error, timestamp, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7, ?7)",
        params![
            id.clone(),
            conversation_id,
            speaker_id,
            opt_text(text),
            opt_text(reply_to),
            status.as_str(),
            ts
        ],
    )
    .await
    .map_err(|e| write_error("insert_utterance", e))?;

    debug!(utterance_id = %id, conversation_id, status = %status, "Utterance appended");
    Ok(fetch(uow, &id).await?)
}

/// Record an inbound message.
///
/// Fails with `ValidationError` if `text` is empty and `NotFound` if the
/// conversation does not exist.
pub async fn append_received(
    uow: &UnitOfWork,
    conversation_id: &str,
    speaker_id: &str,
    text: &str,
    reply_to: Option<&str>,
) -> Result<Utterance, Error> {
    if text.is_empty() {
        return Err(ValidationError::Missing { field: "text" }.into());
    }
    append(
        uow,
        conversation_id,
        speaker_id,
        Some(text),
        reply_to,
        UtteranceStatus::Received,
    )
    .await
}

/// Reserve a reply's identity before its text exists.
pub async fn append_pending(
    uow: &UnitOfWork,
    conversation_id: &str,
    speaker_id: &str,
    reply_to: Option<&str>,
) -> Result<Utterance, Error> {
    append(
        uow,
        conversation_id,
        speaker_id,
        None,
        reply_to,
        UtteranceStatus::Queued,
    )
    .await
}

pub async fn find(uow: &UnitOfWork, id: &str) -> Result<Option<Utterance>, DatabaseError> {
    let mut rows = uow
        .query(
            &format!("SELECT {UTTERANCE_COLUMNS} FROM utterances WHERE id = ?1"),
            params![id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("find_utterance: {e}")))?;

    match rows.next().await {
        Ok(Some(row)) => row_to_utterance(&row).map(Some),
        Ok(None) => Ok(None),
        Err(e) => Err(DatabaseError::Query(format!("find_utterance: {e}"))),
    }
}

pub async fn fetch(uow: &UnitOfWork, id: &str) -> Result<Utterance, DatabaseError> {
    find(uow, id)
        .await?
        .ok_or_else(|| DatabaseError::not_found("utterance", id))
}

/// Apply an update guarded on `status = 'queued'`.
///
/// Zero affected rows means the row is missing or already terminal; the
/// follow-up read tells the two apart.
async fn transition(
    uow: &UnitOfWork,
    id: &str,
    target: UtteranceStatus,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<(), Error> {
    let updated = uow
        .execute(sql, params)
        .await
        .map_err(|e| write_error("update_utterance", e))?;

    if updated == 0 {
        let current = fetch(uow, id).await?;
        return Err(TransitionError {
            id: id.to_string(),
            state: current.status.to_string(),
            target: target.to_string(),
        }
        .into());
    }

    debug!(utterance_id = id, status = %target, "Utterance updated");
    Ok(())
}

/// Store generated reply text. Status stays `queued`, error is cleared.
pub async fn record_reply_text(uow: &UnitOfWork, id: &str, text: &str) -> Result<(), Error> {
    transition(
        uow,
        id,
        UtteranceStatus::Queued,
        "UPDATE utterances SET text = ?2, status = 'queued', error = NULL
         WHERE id = ?1 AND status = 'queued'",
        params![id, text],
    )
    .await
}

/// Confirm delivery.
pub async fn mark_sent(uow: &UnitOfWork, id: &str) -> Result<(), Error> {
    transition(
        uow,
        id,
        UtteranceStatus::Sent,
        "UPDATE utterances SET status = 'sent', error = NULL
         WHERE id = ?1 AND status = 'queued'",
        params![id],
    )
    .await
}

/// Record a terminal failure. Existing text is left untouched.
///
/// `error` is cut to `MAX_ERROR_LENGTH` characters.
pub async fn mark_failed(uow: &UnitOfWork, id: &str, error: &str) -> Result<(), Error> {
    let bounded = truncate_chars(error, MAX_ERROR_LENGTH);
    transition(
        uow,
        id,
        UtteranceStatus::Failed,
        "UPDATE utterances SET status = 'failed', error = ?2
         WHERE id = ?1 AND status = 'queued'",
        params![id, bounded],
    )
    .await
}

/// All utterances of a conversation in creation order.
pub async fn list_for_conversation(
    uow: &UnitOfWork,
    conversation_id: &str,
) -> Result<Vec<Utterance>, DatabaseError> {
    let mut rows = uow
        .query(
            &format!(
                "SELECT {UTTERANCE_COLUMNS} FROM utterances
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ),
            params![conversation_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("list_utterances: {e}")))?;

    let mut utterances = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => utterances.push(row_to_utterance(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("list_utterances: {e}"))),
        }
    }
    Ok(utterances)
}

pub async fn count_for_conversation(
    uow: &UnitOfWork,
    conversation_id: &str,
) -> Result<i64, DatabaseError> {
    let mut rows = uow
        .query(
            "SELECT COUNT(*) FROM utterances WHERE conversation_id = ?1",
            params![conversation_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("count_utterances: {e}")))?;
    match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("count_utterances: {e}"))),
        Ok(None) => Ok(0),
        Err(e) => Err(DatabaseError::Query(format!("count_utterances: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::registry::{fetch_conversation, get_or_create_open};
    use crate::conversation::speakers::{resolve_bot, resolve_user};
    use crate::store::Store;

    struct Fixture {
        _tmp: tempfile::TempDir,
        store: Store,
        conversation_id: String,
    }

    async fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let store = Store::open(&tmp.path().join("test.db")).await.unwrap();
        let uow = store.begin().await.unwrap();
        resolve_user(&uow, "u1").await.unwrap();
        resolve_bot(&uow, "u1").await.unwrap();
        let conversation = get_or_create_open(&uow, "u1", serde_json::json!({}))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        Fixture {
            _tmp: tmp,
            store,
            conversation_id: conversation.id,
        }
    }

    #[tokio::test]
    async fn append_received_and_pending() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let before = fetch_conversation(&uow, &fx.conversation_id).await.unwrap();

        let inbound = append_received(&uow, &fx.conversation_id, "u1", "hello", None)
            .await
            .unwrap();
        assert_eq!(inbound.status, UtteranceStatus::Received);
        assert_eq!(inbound.text.as_deref(), Some("hello"));
        assert!(inbound.error.is_none());

        let reply = append_pending(&uow, &fx.conversation_id, "bot:u1", Some(&inbound.id))
            .await
            .unwrap();
        assert_eq!(reply.status, UtteranceStatus::Queued);
        assert!(reply.text.is_none());
        assert_eq!(reply.reply_to_id.as_deref(), Some(inbound.id.as_str()));

        let after = fetch_conversation(&uow, &fx.conversation_id).await.unwrap();
        assert!(after.last_activity_at >= before.last_activity_at);
        assert_eq!(after.last_activity_at, reply.created_at);

        let listed = list_for_conversation(&uow, &fx.conversation_id).await.unwrap();
        assert_eq!(
            listed.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(),
            vec![inbound.id.as_str(), reply.id.as_str()]
        );
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn empty_text_is_rejected() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let err = append_received(&uow, &fx.conversation_id, "u1", "", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::Missing { .. })));
        assert_eq!(count_for_conversation(&uow, &fx.conversation_id).await.unwrap(), 0);
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_conversation_is_not_found() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let err = append_pending(&uow, "missing", "bot:u1", None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn reply_happy_path() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let reply = append_pending(&uow, &fx.conversation_id, "bot:u1", None)
            .await
            .unwrap();

        record_reply_text(&uow, &reply.id, "echo:hello").await.unwrap();
        let ready = fetch(&uow, &reply.id).await.unwrap();
        assert_eq!(ready.status, UtteranceStatus::Queued);
        assert_eq!(ready.text.as_deref(), Some("echo:hello"));

        mark_sent(&uow, &reply.id).await.unwrap();
        let sent = fetch(&uow, &reply.id).await.unwrap();
        assert_eq!(sent.status, UtteranceStatus::Sent);
        assert!(sent.error.is_none());
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn failure_preserves_text_and_bounds_error() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let reply = append_pending(&uow, &fx.conversation_id, "bot:u1", None)
            .await
            .unwrap();
        record_reply_text(&uow, &reply.id, "echo:hi").await.unwrap();

        let huge = "é".repeat(MAX_ERROR_LENGTH * 2);
        mark_failed(&uow, &reply.id, &huge).await.unwrap();

        let failed = fetch(&uow, &reply.id).await.unwrap();
        assert_eq!(failed.status, UtteranceStatus::Failed);
        assert_eq!(failed.text.as_deref(), Some("echo:hi"));
        assert_eq!(failed.error.unwrap().chars().count(), MAX_ERROR_LENGTH);
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn terminal_states_reject_transitions() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let reply = append_pending(&uow, &fx.conversation_id, "bot:u1", None)
            .await
            .unwrap();
        mark_sent(&uow, &reply.id).await.unwrap();

        let err = mark_failed(&uow, &reply.id, "late").await.unwrap_err();
        match err {
            Error::Transition(t) => {
                assert_eq!(t.state, "sent");
                assert_eq!(t.target, "failed");
            }
            other => panic!("expected transition error, got {other:?}"),
        }
        assert_eq!(
            fetch(&uow, &reply.id).await.unwrap().status,
            UtteranceStatus::Sent
        );

        let inbound = append_received(&uow, &fx.conversation_id, "u1", "hi", None)
            .await
            .unwrap();
        assert!(mark_sent(&uow, &inbound.id).await.is_err());
        uow.commit().await.unwrap();
    }

    #[tokio::test]
    async fn unreadable_text_column_is_an_error() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let reply = append_pending(&uow, &fx.conversation_id, "bot:u1", None)
            .await
            .unwrap();
        uow.execute(
            "UPDATE utterances SET text = X'00FF' WHERE id = ?1",
            params![reply.id.clone()],
        )
        .await
        .unwrap();

        let err = fetch(&uow, &reply.id).await.unwrap_err();
        assert!(
            matches!(&err, DatabaseError::Query(msg) if msg.starts_with("utterance row parse")),
            "got {err:?}"
        );
        uow.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn transition_on_missing_row_is_not_found() {
        let fx = fixture().await;
        let uow = fx.store.begin().await.unwrap();
        let err = mark_sent(&uow, "missing").await.unwrap_err();
        assert!(err.is_not_found());
        uow.rollback().await.unwrap();
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
        assert_eq!(truncate_chars("", 3), "");
    }
}
