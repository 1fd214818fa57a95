//! Component D — Sync Envelope Driver.
//!
//! Builds the `<Sync>` request envelope, transmits it via `Transport`,
//! decodes the response and dispatches its `<Collection>` body to the
//! right collection parser, then hands the resulting batch to
//! `reconcile` for atomic commit and sync-key adoption (§4.D). One
//! function per collection class, matching the three parsers in
//! `email`/`contacts`/`calendar` rather than one dispatching-by-enum
//! entry point.

use crate::calendar::{self, CalendarUpsyncOp, Event};
use crate::cancel::CancelToken;
use crate::config::SyncEngineConfig;
use crate::contacts::{self, Contact};
use crate::email::{self, EmailUpsyncOp};
use crate::error::SyncCoreError;
use crate::external::{MailOut, Store, Transport};
use crate::models::{Collection, LocalId};
use crate::reconcile::{self, SyncKeyDisposition};
use crate::token_table::{CodePage, TokenId, TOKEN_TABLE};
use crate::wbxml::{Decoder, Encoder};

fn air_sync_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::AIR_SYNC, TOKEN_TABLE.tag_for(CodePage::AIR_SYNC, name).expect(name))
}

/// What happened on the wire, independent of what the reconciliation core
/// did with the sync-key.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub status: u32,
    pub more_available: bool,
    pub disposition: SyncKeyDisposition,
}

fn build_request_header(enc: &mut Encoder, collection: &Collection, window_size: u32) -> Result<(), SyncCoreError> {
    enc.start(air_sync_tag("Sync"))?;
    enc.start(air_sync_tag("Collections"))?;
    enc.start(air_sync_tag("Collection"))?;
    enc.start(air_sync_tag("Class"))?;
    enc.data(collection.class.as_wire_str())?;
    enc.end()?;
    enc.start(air_sync_tag("SyncKey"))?;
    enc.data(collection.sync_key.as_str())?;
    enc.end()?;
    enc.start(air_sync_tag("CollectionId"))?;
    enc.data(&collection.server_id)?;
    enc.end()?;
    enc.start(air_sync_tag("GetChanges"))?;
    enc.end()?;
    enc.start(air_sync_tag("WindowSize"))?;
    enc.data(&window_size.to_string())?;
    enc.end()?;
    Ok(())
}

fn close_request(enc: &mut Encoder) -> Result<(), SyncCoreError> {
    enc.end()?; // Collection
    enc.end()?; // Collections
    enc.end()?; // Sync
    Ok(())
}

/// A parsed `<Collection>` response body, common to every class.
struct ResponseEnvelope {
    status: u32,
    new_sync_key: Option<crate::models::SyncKey>,
    more_available: bool,
    commands_tag: Option<TokenId>,
}

/// Reads everything in a response `<Collection>` up to (but not through)
/// `<Commands>`, leaving the decoder positioned to parse `<Commands>`'s
/// children next if present.
fn parse_response_envelope(dec: &mut Decoder, collection_tag: TokenId) -> Result<ResponseEnvelope, SyncCoreError> {
    let mut status = 1u32;
    let mut new_sync_key = None;
    let mut more_available = false;
    let mut commands_tag = None;

    while let Some(field) = dec.next_tag(Some(collection_tag))? {
        match field.name().as_str() {
            "SyncKey" => new_sync_key = Some(crate::models::SyncKey::from_str(dec.get_value()?)),
            "Status" => status = dec.get_value_int()? as u32,
            "MoreAvailable" => {
                more_available = true;
                dec.skip_tag()?;
            }
            "Commands" => commands_tag = Some(field),
            _ => dec.skip_tag()?,
        }
    }
    Ok(ResponseEnvelope {
        status,
        new_sync_key,
        more_available,
        commands_tag,
    })
}

fn find_collection(dec: &mut Decoder, root: TokenId) -> Result<Option<TokenId>, SyncCoreError> {
    let collections = match dec.next_tag(Some(root))? {
        Some(t) if t.name() == "Collections" => t,
        Some(_) => return Ok(None),
        None => return Ok(None),
    };
    dec.next_tag(Some(collections))
}

#[tracing::instrument(skip(transport, store, collection, cfg, upsync, cancel), fields(collection = %collection.server_id))]
pub async fn sync_email_once<T: Transport, S: Store>(
    transport: &T,
    store: &S,
    collection: &mut Collection,
    cfg: &SyncEngineConfig,
    upsync: Vec<EmailUpsyncOp>,
    cancel: &CancelToken,
) -> Result<SyncOutcome, SyncCoreError> {
    let mut enc = Encoder::new();
    build_request_header(&mut enc, collection, cfg.window_size)?;
    if !upsync.is_empty() {
        email::serialize_commands(&mut enc, &upsync)?;
    }
    close_request(&mut enc)?;
    let request_bytes = enc.finish()?;

    let response_bytes = transport
        .post(collection, request_bytes)
        .await
        .map_err(|e| SyncCoreError::protocol(e.to_string()))?;

    let mut dec = Decoder::new(&response_bytes)?.with_cancel(cancel.clone());
    let root = dec.expect_root(&["Sync"])?;
    let collection_tag =
        find_collection(&mut dec, root)?.ok_or_else(|| SyncCoreError::protocol("Sync response has no Collection"))?;
    let envelope = parse_response_envelope(&mut dec, collection_tag)?;

    let commit_result = match envelope.commands_tag {
        Some(commands_tag) => {
            let batch = email::parse_commands(&mut dec, commands_tag)?;
            reconcile::commit_email(store, batch, cancel).await
        }
        None => Ok(Vec::new()),
    };

    let disposition =
        reconcile::reconcile_status(store, &collection.server_id, envelope.status, envelope.new_sync_key.clone(), &commit_result)
            .await?;
    apply_disposition(store, collection, &disposition).await?;
    commit_result?;

    Ok(SyncOutcome {
        status: envelope.status,
        more_available: envelope.more_available,
        disposition,
    })
}

#[tracing::instrument(skip(transport, store, collection, cfg, new_contacts, cancel), fields(collection = %collection.server_id))]
pub async fn sync_contacts_once<T: Transport, S: Store>(
    transport: &T,
    store: &S,
    collection: &mut Collection,
    cfg: &SyncEngineConfig,
    new_contacts: Vec<Contact>,
    cancel: &CancelToken,
) -> Result<SyncOutcome, SyncCoreError> {
    let mut enc = Encoder::new();
    build_request_header(&mut enc, collection, cfg.window_size)?;
    if !new_contacts.is_empty() {
        enc.start(air_sync_tag("Commands"))?;
        for contact in &new_contacts {
            let client_id = uuid::Uuid::new_v4().to_string();
            contacts::serialize_add(&mut enc, &client_id, contact)?;
        }
        enc.end()?;
    }
    close_request(&mut enc)?;
    let request_bytes = enc.finish()?;

    let response_bytes = transport
        .post(collection, request_bytes)
        .await
        .map_err(|e| SyncCoreError::protocol(e.to_string()))?;

    let mut dec = Decoder::new(&response_bytes)?.with_cancel(cancel.clone());
    let root = dec.expect_root(&["Sync"])?;
    let collection_tag =
        find_collection(&mut dec, root)?.ok_or_else(|| SyncCoreError::protocol("Sync response has no Collection"))?;
    let envelope = parse_response_envelope(&mut dec, collection_tag)?;

    let commit_result: Result<Vec<LocalId>, SyncCoreError> = match envelope.commands_tag {
        Some(commands_tag) => {
            let batch: crate::models::ChangeBatch<Contact> = contacts::parse_commands(&mut dec, commands_tag)?;
            reconcile::commit_contacts(store, batch, cancel).await
        }
        None => Ok(Vec::new()),
    };

    let disposition =
        reconcile::reconcile_status(store, &collection.server_id, envelope.status, envelope.new_sync_key.clone(), &commit_result)
            .await?;
    apply_disposition(store, collection, &disposition).await?;
    commit_result?;

    Ok(SyncOutcome {
        status: envelope.status,
        more_available: envelope.more_available,
        disposition,
    })
}

/// Per-item context for a dirtied calendar event that needs a
/// meeting-invite side-effect dispatched alongside its upsync op.
pub struct CalendarMailDispatch {
    pub event_id: LocalId,
    pub event: Event,
    pub is_organizer: bool,
    pub account: String,
    pub client_id: Option<String>,
}

#[tracing::instrument(
    skip(transport, store, mail_out, collection, cfg, upsync, mail_dispatches, cancel),
    fields(collection = %collection.server_id)
)]
pub async fn sync_calendar_once<T: Transport, S: Store, M: MailOut>(
    transport: &T,
    store: &S,
    mail_out: &M,
    collection: &mut Collection,
    cfg: &SyncEngineConfig,
    upsync: Vec<CalendarUpsyncOp>,
    mail_dispatches: Vec<CalendarMailDispatch>,
    local_account_email: &str,
    cancel: &CancelToken,
) -> Result<SyncOutcome, SyncCoreError> {
    let mut enc = Encoder::new();
    build_request_header(&mut enc, collection, cfg.window_size)?;
    if !upsync.is_empty() {
        calendar::serialize_commands(&mut enc, &upsync)?;
    }
    close_request(&mut enc)?;
    let request_bytes = enc.finish()?;

    let response_bytes = transport
        .post(collection, request_bytes)
        .await
        .map_err(|e| SyncCoreError::protocol(e.to_string()))?;

    for dispatch in &mail_dispatches {
        reconcile::dispatch_dirty_event_mail(
            mail_out,
            dispatch.event_id,
            &dispatch.event,
            dispatch.is_organizer,
            dispatch.client_id.clone(),
            &dispatch.account,
        )
        .await?;
    }

    let mut dec = Decoder::new(&response_bytes)?.with_cancel(cancel.clone());
    let root = dec.expect_root(&["Sync"])?;
    let collection_tag =
        find_collection(&mut dec, root)?.ok_or_else(|| SyncCoreError::protocol("Sync response has no Collection"))?;
    let envelope = parse_response_envelope(&mut dec, collection_tag)?;

    let commit_result: Result<Vec<LocalId>, SyncCoreError> = match envelope.commands_tag {
        Some(commands_tag) => {
            let batch: crate::models::ChangeBatch<Event> =
                calendar::parse_commands(&mut dec, commands_tag, cfg.max_attendees, Some(local_account_email))?;
            reconcile::commit_calendar(store, batch, cancel).await
        }
        None => Ok(Vec::new()),
    };

    let disposition =
        reconcile::reconcile_status(store, &collection.server_id, envelope.status, envelope.new_sync_key.clone(), &commit_result)
            .await?;
    apply_disposition(store, collection, &disposition).await?;
    commit_result?;

    Ok(SyncOutcome {
        status: envelope.status,
        more_available: envelope.more_available,
        disposition,
    })
}

/// Persists whatever `reconcile_status` decided and mutates the in-memory
/// `Collection` to match (§3 "Push auto-becomes Ping after the first
/// successful sync that yielded any sync-key").
async fn apply_disposition<S: Store>(
    store: &S,
    collection: &mut Collection,
    disposition: &SyncKeyDisposition,
) -> Result<(), SyncCoreError> {
    match disposition {
        SyncKeyDisposition::WipeAndReset => {
            collection.sync_key = crate::models::SyncKey::initial();
        }
        SyncKeyDisposition::FolderStale | SyncKeyDisposition::NoChange => {}
        SyncKeyDisposition::Advance(new_key) => {
            collection.sync_key = new_key.clone();
            collection.sync_interval = collection.sync_interval.after_first_success_with_key();
            store
                .set_sync_key(
                    &collection.server_id,
                    crate::external::PersistedCollectionState {
                        sync_key: collection.sync_key.clone(),
                        sync_interval: collection.sync_interval,
                    },
                )
                .await
                .map_err(|e| SyncCoreError::Store(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::test_support::{MemoryStore, RecordingMailOut, ScriptedTransport};
    use crate::models::{CollectionClass, LocalId as Id, SyncInterval, SyncKey};

    fn build_email_add_response(sync_key: &str) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.start(air_sync_tag("Sync")).unwrap();
        enc.start(air_sync_tag("Collections")).unwrap();
        enc.start(air_sync_tag("Collection")).unwrap();
        enc.start(air_sync_tag("SyncKey")).unwrap();
        enc.data(sync_key).unwrap();
        enc.end().unwrap();
        enc.start(air_sync_tag("Status")).unwrap();
        enc.data("1").unwrap();
        enc.end().unwrap();
        enc.start(air_sync_tag("Commands")).unwrap();
        enc.start(air_sync_tag("Add")).unwrap();
        enc.start(air_sync_tag("ServerId")).unwrap();
        enc.data("1:1").unwrap();
        enc.end().unwrap();
        enc.start(air_sync_tag("ApplicationData")).unwrap();
        enc.end().unwrap();
        enc.end().unwrap(); // Add
        enc.end().unwrap(); // Commands
        enc.end().unwrap(); // Collection
        enc.end().unwrap(); // Collections
        enc.end().unwrap(); // Sync
        enc.finish().unwrap()
    }

    #[tokio::test]
    async fn initial_sync_advances_key_and_commits_batch() {
        crate::init_test_tracing();
        let store = MemoryStore::default();
        let transport = ScriptedTransport::default();
        transport.responses.lock().unwrap().push_back(build_email_add_response("1"));

        let mut collection = Collection::new("col-email", CollectionClass::Email, Id(1));
        let cfg = SyncEngineConfig::default();
        let cancel = CancelToken::new();

        let outcome = sync_email_once(&transport, &store, &mut collection, &cfg, Vec::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, 1);
        assert_eq!(collection.sync_key, SyncKey::from_str("1"));
        assert_eq!(collection.sync_interval, SyncInterval::Ping);
    }

    #[tokio::test]
    async fn status_3_resets_collection_key_to_initial() {
        let store = MemoryStore::default();
        let transport = ScriptedTransport::default();
        let mut enc = Encoder::new();
        enc.start(air_sync_tag("Sync")).unwrap();
        enc.start(air_sync_tag("Collections")).unwrap();
        enc.start(air_sync_tag("Collection")).unwrap();
        enc.start(air_sync_tag("Status")).unwrap();
        enc.data("3").unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        transport.responses.lock().unwrap().push_back(enc.finish().unwrap());

        let mut collection = Collection::new("col-email", CollectionClass::Email, Id(1));
        collection.sync_key = SyncKey::from_str("{stale}");
        let cfg = SyncEngineConfig::default();
        let cancel = CancelToken::new();

        let outcome = sync_email_once(&transport, &store, &mut collection, &cfg, Vec::new(), &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.status, 3);
        assert!(collection.sync_key.is_initial());
    }

    #[tokio::test]
    async fn calendar_organizer_dirty_enqueues_invite_before_transmit_returns() {
        let store = MemoryStore::default();
        let mail_out = RecordingMailOut::default();
        let transport = ScriptedTransport::default();
        let mut enc = Encoder::new();
        enc.start(air_sync_tag("Sync")).unwrap();
        enc.start(air_sync_tag("Collections")).unwrap();
        enc.start(air_sync_tag("Collection")).unwrap();
        enc.start(air_sync_tag("Status")).unwrap();
        enc.data("1").unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
        transport.responses.lock().unwrap().push_back(enc.finish().unwrap());

        let mut collection = Collection::new("col-cal", CollectionClass::Calendar, Id(2));
        let cfg = SyncEngineConfig::default();
        let cancel = CancelToken::new();

        let dispatch = CalendarMailDispatch {
            event_id: Id(42),
            event: Event::default(),
            is_organizer: true,
            account: "me@example.com".into(),
            client_id: Some("c1".into()),
        };

        sync_calendar_once(
            &transport,
            &store,
            &mail_out,
            &mut collection,
            &cfg,
            Vec::new(),
            vec![dispatch],
            "me@example.com",
            &cancel,
        )
        .await
        .unwrap();

        let enqueued = mail_out.enqueued.lock().unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].0, Id(42));
    }
}
