//! Component H — Reconciliation Core.
//!
//! Owns the parts of §4.H that sit above a single collection parser: atomic
//! commit against the `Store`, the sync-key protocol including the two
//! protocol-fault recoveries (Status=3 bad-key reset, Status=8 stale
//! folder-id), the two-pass dirty/secondary-dirty upsync ordering for
//! recurring events, and dispatch of meeting-invite side-effects to
//! `MailOut`. Attendee redaction itself lives in `calendar` next to the
//! parser that produces the redacted record.

use crate::calendar::{self, Event, MeetingInviteEffect};
use crate::cancel::CancelToken;
use crate::contacts::Contact;
use crate::email::Message;
use crate::error::SyncCoreError;
use crate::external::{MailOut, MailOutFlag, PersistedCollectionState, Store};
use crate::models::{ChangeBatch, LocalId, SyncInterval, SyncKey};

fn check_cancel(cancel: &CancelToken) -> Result<(), SyncCoreError> {
    if cancel.is_cancelled() {
        return Err(SyncCoreError::Cancelled);
    }
    Ok(())
}

/// "A ChangeBatch is executed as one atomic block against the external
/// store. On failure, nothing is committed and the sync-key is not
/// advanced" (§4.H). Cancellation is checked just before the one blocking
/// call this module makes (§5).
pub async fn commit_email<S: Store>(
    store: &S,
    batch: ChangeBatch<Message>,
    cancel: &CancelToken,
) -> Result<Vec<LocalId>, SyncCoreError> {
    check_cancel(cancel)?;
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    store.apply_email_batch(batch).await
}

pub async fn commit_contacts<S: Store>(
    store: &S,
    batch: ChangeBatch<Contact>,
    cancel: &CancelToken,
) -> Result<Vec<LocalId>, SyncCoreError> {
    check_cancel(cancel)?;
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    store.apply_contacts_batch(batch).await
}

pub async fn commit_calendar<S: Store>(
    store: &S,
    batch: ChangeBatch<Event>,
    cancel: &CancelToken,
) -> Result<Vec<LocalId>, SyncCoreError> {
    check_cancel(cancel)?;
    if batch.is_empty() {
        return Ok(Vec::new());
    }
    store.apply_calendar_batch(batch).await
}

/// What the Driver should do with the persisted sync-key after seeing the
/// server's `<Status>` for a collection (§4.H "Sync-key protocol").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncKeyDisposition {
    /// Status=3: collection wiped, key reset to "0"; caller should restart
    /// the sync from scratch on its next cycle.
    WipeAndReset,
    /// Status=8: "folder list stale" signalled to the caller; key
    /// untouched, no commit attempted.
    FolderStale,
    /// Status=1 and the batch committed: advance to the server's new key.
    Advance(SyncKey),
    /// Commit failed, was cancelled, or status was anything the spec
    /// doesn't distinguish (§9 open question (b)): key untouched.
    NoChange,
}

/// Applies the sync-key protocol for one collection's response. `new_key`
/// is the `<SyncKey>` the server sent in this response, when present.
/// `commit_result` is the outcome of committing this response's batch.
pub async fn reconcile_status<S: Store>(
    store: &S,
    collection_id: &str,
    status: u32,
    new_key: Option<SyncKey>,
    commit_result: &Result<Vec<LocalId>, SyncCoreError>,
) -> Result<SyncKeyDisposition, SyncCoreError> {
    match status {
        3 => {
            tracing::info!(collection = %collection_id, "Status=3: wiping collection and resetting sync-key to 0");
            store
                .wipe_collection(collection_id)
                .await
                .map_err(|e| SyncCoreError::Store(e.to_string()))?;
            store
                .set_sync_key(
                    collection_id,
                    PersistedCollectionState {
                        sync_key: SyncKey::initial(),
                        sync_interval: SyncInterval::Push,
                    },
                )
                .await
                .map_err(|e| SyncCoreError::Store(e.to_string()))?;
            Ok(SyncKeyDisposition::WipeAndReset)
        }
        8 => {
            tracing::info!(collection = %collection_id, "Status=8: folder-id stale, sync-key untouched");
            Ok(SyncKeyDisposition::FolderStale)
        }
        1 => match (commit_result, new_key) {
            (Ok(_), Some(key)) => {
                tracing::info!(collection = %collection_id, new_key = %key.as_str(), "advancing sync-key after commit");
                Ok(SyncKeyDisposition::Advance(key))
            }
            _ => Ok(SyncKeyDisposition::NoChange),
        },
        _ => Ok(SyncKeyDisposition::NoChange),
    }
}

/// A locally-tracked top-level event, as seen by the dirty/secondary-dirty
/// scan. The Reconciliation Core doesn't own local storage (out of scope),
/// so it works off whatever summary the Store hands it.
#[derive(Debug, Clone)]
pub struct DirtyEventSummary {
    pub id: LocalId,
    pub dirty: bool,
    pub is_organizer: bool,
}

#[derive(Debug, Clone)]
pub struct DirtyExceptionSummary {
    pub id: LocalId,
    pub parent: Option<LocalId>,
    pub dirty: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CalendarUpsyncPlan {
    /// Top-level events to emit this cycle: directly dirty, or carrying a
    /// dirty exception (secondary-dirty).
    pub events_to_upsync: Vec<LocalId>,
    /// Exceptions whose parent no longer exists; deleted rather than
    /// upsynced (§4.G "Orphaned exceptions").
    pub orphaned_exceptions_to_delete: Vec<LocalId>,
}

/// "Two-pass scan: (1) for each dirty exception, mark its parent with a
/// secondary dirty bit; orphaned exceptions (parent not found) are
/// deleted; (2) iterate dirty OR secondary-dirty top-level events" (§4.G
/// "Upsync ordering for recurring events").
pub fn plan_calendar_upsync(events: &[DirtyEventSummary], exceptions: &[DirtyExceptionSummary]) -> CalendarUpsyncPlan {
    use std::collections::HashSet;

    let known_event_ids: HashSet<LocalId> = events.iter().map(|e| e.id).collect();
    let mut secondary_dirty: HashSet<LocalId> = HashSet::new();
    let mut orphaned = Vec::new();

    for exc in exceptions.iter().filter(|e| e.dirty) {
        match exc.parent {
            Some(parent_id) if known_event_ids.contains(&parent_id) => {
                secondary_dirty.insert(parent_id);
            }
            _ => orphaned.push(exc.id),
        }
    }

    let events_to_upsync = events
        .iter()
        .filter(|e| e.dirty || secondary_dirty.contains(&e.id))
        .map(|e| e.id)
        .collect();

    CalendarUpsyncPlan {
        events_to_upsync,
        orphaned_exceptions_to_delete: orphaned,
    }
}

/// Dispatches the meeting-invite side-effect for one dirtied event, per
/// §4.G "Meeting-invite side-effects". `account` is passed through to
/// `MailOut` verbatim; this module never inspects it.
pub async fn dispatch_dirty_event_mail<M: MailOut>(
    mail_out: &M,
    event_id: LocalId,
    event: &Event,
    is_organizer: bool,
    client_id: Option<String>,
    account: &str,
) -> Result<(), SyncCoreError> {
    if let Some(effect) = calendar::meeting_invite_effect_for_dirty(event, is_organizer) {
        let flag = to_mail_out_flag(effect);
        mail_out
            .enqueue(event_id, flag, client_id, account)
            .await
            .map_err(|e| SyncCoreError::Store(e.to_string()))?;
    }
    Ok(())
}

pub async fn dispatch_deleted_event_mail<M: MailOut>(
    mail_out: &M,
    event_id: LocalId,
    is_organizer: bool,
    account: &str,
) -> Result<(), SyncCoreError> {
    if let Some(effect) = calendar::meeting_invite_effect_for_delete(is_organizer) {
        let flag = to_mail_out_flag(effect);
        mail_out
            .enqueue(event_id, flag, None, account)
            .await
            .map_err(|e| SyncCoreError::Store(e.to_string()))?;
    }
    Ok(())
}

pub async fn dispatch_removed_attendee_mail<M: MailOut>(
    mail_out: &M,
    event_id: LocalId,
    is_organizer: bool,
    removed_email: &str,
    account: &str,
) -> Result<(), SyncCoreError> {
    if let Some(effect) = calendar::meeting_invite_effect_for_removed_attendee(is_organizer, removed_email) {
        let flag = to_mail_out_flag(effect);
        mail_out
            .enqueue(event_id, flag, None, account)
            .await
            .map_err(|e| SyncCoreError::Store(e.to_string()))?;
    }
    Ok(())
}

fn to_mail_out_flag(effect: MeetingInviteEffect) -> MailOutFlag {
    match effect {
        MeetingInviteEffect::SendInvite => MailOutFlag::Invite,
        MeetingInviteEffect::SendReply(status) => MailOutFlag::Reply(status),
        MeetingInviteEffect::CancelAttendee { email } => MailOutFlag::CancelAttendee { email },
        MeetingInviteEffect::CancelAll => MailOutFlag::CancelAll,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_support::{MemoryStore, RecordingMailOut};

    #[tokio::test]
    async fn status_3_wipes_and_resets_key() {
        crate::init_test_tracing();
        let store = MemoryStore::default();
        let disposition = reconcile_status(&store, "col-1", 3, None, &Ok(Vec::new())).await.unwrap();
        assert_eq!(disposition, SyncKeyDisposition::WipeAndReset);
        assert_eq!(store.wiped.lock().unwrap().as_slice(), ["col-1"]);
        let state = store.states.lock().unwrap().get("col-1").unwrap().clone();
        assert!(state.sync_key.is_initial());
    }

    #[tokio::test]
    async fn status_8_signals_stale_without_touching_key() {
        let store = MemoryStore::default();
        let disposition = reconcile_status(&store, "col-1", 8, None, &Ok(Vec::new())).await.unwrap();
        assert_eq!(disposition, SyncKeyDisposition::FolderStale);
        assert!(store.states.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn status_1_with_failed_commit_does_not_advance() {
        let store = MemoryStore::default();
        let failed: Result<Vec<LocalId>, SyncCoreError> = Err(SyncCoreError::Store("boom".into()));
        let disposition = reconcile_status(&store, "col-1", 1, Some(SyncKey::from_str("5")), &failed)
            .await
            .unwrap();
        assert_eq!(disposition, SyncKeyDisposition::NoChange);
    }

    #[tokio::test]
    async fn status_1_with_successful_commit_advances() {
        let store = MemoryStore::default();
        let disposition = reconcile_status(&store, "col-1", 1, Some(SyncKey::from_str("5")), &Ok(vec![LocalId(1)]))
            .await
            .unwrap();
        assert_eq!(disposition, SyncKeyDisposition::Advance(SyncKey::from_str("5")));
    }

    #[test]
    fn two_pass_upsync_marks_parent_secondary_dirty_and_finds_orphans() {
        let events = vec![
            DirtyEventSummary {
                id: LocalId(1),
                dirty: false,
                is_organizer: true,
            },
            DirtyEventSummary {
                id: LocalId(2),
                dirty: false,
                is_organizer: false,
            },
        ];
        let exceptions = vec![
            DirtyExceptionSummary {
                id: LocalId(10),
                parent: Some(LocalId(1)),
                dirty: true,
            },
            DirtyExceptionSummary {
                id: LocalId(11),
                parent: Some(LocalId(999)),
                dirty: true,
            },
            DirtyExceptionSummary {
                id: LocalId(12),
                parent: Some(LocalId(2)),
                dirty: false,
            },
        ];
        let plan = plan_calendar_upsync(&events, &exceptions);
        assert_eq!(plan.events_to_upsync, vec![LocalId(1)]);
        assert_eq!(plan.orphaned_exceptions_to_delete, vec![LocalId(11)]);
    }

    #[tokio::test]
    async fn organizer_dirty_enqueues_invite() {
        let mail_out = RecordingMailOut::default();
        let event = Event::default();
        dispatch_dirty_event_mail(&mail_out, LocalId(1), &event, true, None, "acct")
            .await
            .unwrap();
        let enqueued = mail_out.enqueued.lock().unwrap();
        assert_eq!(enqueued.as_slice(), [(LocalId(1), MailOutFlag::Invite)]);
    }
}
