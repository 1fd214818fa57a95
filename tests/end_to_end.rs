//! End-to-end scenarios exercising the Sync Envelope Driver, the three
//! collection parsers, and the reconciliation core together against the
//! `test-util` in-memory fakes, the way a host application would drive them.

use eas_sync_core::calendar::{self, CalendarUpsyncOp, Event, Exception};
use eas_sync_core::cancel::CancelToken;
use eas_sync_core::config::SyncEngineConfig;
use eas_sync_core::contacts;
use eas_sync_core::email::EmailUpsyncOp;
use eas_sync_core::external::test_support::{MemoryStore, RecordingMailOut, ScriptedTransport};
use eas_sync_core::models::{ChangeRecord, Collection, CollectionClass, LocalId, SyncInterval, SyncKey};
use eas_sync_core::reconcile::SyncKeyDisposition;
use eas_sync_core::sync::{sync_calendar_once, sync_contacts_once, sync_email_once, CalendarMailDispatch};
use eas_sync_core::token_table::{CodePage, TokenId, TOKEN_TABLE};
use eas_sync_core::wbxml::{Decoder, Encoder};

fn air_sync_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::AIR_SYNC, TOKEN_TABLE.tag_for(CodePage::AIR_SYNC, name).expect(name))
}

fn contacts_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::CONTACTS, TOKEN_TABLE.tag_for(CodePage::CONTACTS, name).expect(name))
}

fn cal_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::CALENDAR, TOKEN_TABLE.tag_for(CodePage::CALENDAR, name).expect(name))
}

/// Navigates a full `<Sync>` response down to its `<Collection>` element,
/// the way the Driver does internally, for tests that want to inspect a
/// response's `<Commands>` body directly rather than through a full
/// `sync_*_once` call.
fn find_collection_and_commands(dec: &mut Decoder) -> (TokenId, Option<TokenId>) {
    let root = dec.expect_root(&["Sync"]).unwrap();
    let collections = dec.next_tag(Some(root)).unwrap().unwrap();
    let collection = dec.next_tag(Some(collections)).unwrap().unwrap();
    let mut commands_tag = None;
    while let Some(field) = dec.next_tag(Some(collection)).unwrap() {
        if field.name() == "Commands" {
            commands_tag = Some(field);
        } else {
            dec.skip_tag().unwrap();
        }
    }
    (collection, commands_tag)
}

// Scenario 1: initial contact sync.
#[tokio::test]
async fn initial_contact_sync_inserts_contact_and_advances_key() {
    let mut enc = Encoder::new();
    enc.start(air_sync_tag("Sync")).unwrap();
    enc.start(air_sync_tag("Collections")).unwrap();
    enc.start(air_sync_tag("Collection")).unwrap();
    enc.start(air_sync_tag("SyncKey")).unwrap();
    enc.data("{abc}").unwrap();
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
    enc.start(contacts_tag("FirstName")).unwrap();
    enc.data("Anne").unwrap();
    enc.end().unwrap();
    enc.start(contacts_tag("LastName")).unwrap();
    enc.data("Lee").unwrap();
    enc.end().unwrap();
    enc.start(contacts_tag("Email1Address")).unwrap();
    enc.data("anne@x").unwrap();
    enc.end().unwrap();
    enc.end().unwrap(); // ApplicationData
    enc.end().unwrap(); // Add
    enc.end().unwrap(); // Commands
    enc.end().unwrap(); // Collection
    enc.end().unwrap(); // Collections
    enc.end().unwrap(); // Sync
    let response_bytes = enc.finish().unwrap();

    // The response's <Commands> body decodes to exactly what the scenario
    // names: one contact named "Anne Lee" with one email address.
    let mut dec = Decoder::new(&response_bytes).unwrap();
    let (_collection, commands_tag) = find_collection_and_commands(&mut dec);
    let batch = contacts::parse_commands(&mut dec, commands_tag.unwrap()).unwrap();
    assert_eq!(batch.len(), 1);
    match &batch.ops[0] {
        ChangeRecord::Add { server_id, data, .. } => {
            assert_eq!(server_id.as_deref(), Some("1:1"));
            assert_eq!(data.first_name.as_deref(), Some("Anne"));
            assert_eq!(data.last_name.as_deref(), Some("Lee"));
            assert_eq!(data.email1.as_deref(), Some("anne@x"));
        }
        _ => panic!("expected Add"),
    }

    // Driving it through the full Sync Envelope Driver commits the batch
    // and adopts the server's new sync-key.
    let store = MemoryStore::default();
    let transport = ScriptedTransport::default();
    transport.responses.lock().unwrap().push_back(response_bytes);
    let mut collection = Collection::new("5", CollectionClass::Contacts, LocalId(1));
    let cfg = SyncEngineConfig::default();
    let cancel = CancelToken::new();

    let outcome = sync_contacts_once(&transport, &store, &mut collection, &cfg, Vec::new(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, 1);
    assert_eq!(collection.sync_key, SyncKey::from_str("{abc}"));
    assert!(matches!(outcome.disposition, SyncKeyDisposition::Advance(_)));
}

// Scenario 2: invalid sync-key recovery.
#[tokio::test]
async fn invalid_sync_key_wipes_collection_and_resets_to_initial() {
    let mut enc = Encoder::new();
    enc.start(air_sync_tag("Sync")).unwrap();
    enc.start(air_sync_tag("Collections")).unwrap();
    enc.start(air_sync_tag("Collection")).unwrap();
    enc.start(air_sync_tag("Status")).unwrap();
    enc.data("3").unwrap();
    enc.end().unwrap();
    enc.end().unwrap(); // Collection
    enc.end().unwrap(); // Collections
    enc.end().unwrap(); // Sync
    let response_bytes = enc.finish().unwrap();

    let store = MemoryStore::default();
    let transport = ScriptedTransport::default();
    transport.responses.lock().unwrap().push_back(response_bytes);
    let mut collection = Collection::new("5", CollectionClass::Contacts, LocalId(1));
    collection.sync_key = SyncKey::from_str("{stale}");
    let cfg = SyncEngineConfig::default();
    let cancel = CancelToken::new();

    let outcome = sync_contacts_once(&transport, &store, &mut collection, &cfg, Vec::new(), &cancel)
        .await
        .unwrap();

    assert_eq!(outcome.status, 3);
    assert_eq!(outcome.disposition, SyncKeyDisposition::WipeAndReset);
    assert_eq!(store.wiped.lock().unwrap().as_slice(), ["5"]);
    // The collection's key is reset to "0", so its next Sync request will
    // carry the initial key and restart from scratch.
    assert!(collection.sync_key.is_initial());
}

// Scenario 3: read-flag upsync.
#[tokio::test]
async fn read_flag_toggle_upsyncs_as_change() {
    let mut response = Encoder::new();
    response.start(air_sync_tag("Sync")).unwrap();
    response.start(air_sync_tag("Collections")).unwrap();
    response.start(air_sync_tag("Collection")).unwrap();
    response.start(air_sync_tag("Status")).unwrap();
    response.data("1").unwrap();
    response.end().unwrap();
    response.end().unwrap();
    response.end().unwrap();
    response.end().unwrap();
    let response_bytes = response.finish().unwrap();

    let store = MemoryStore::default();
    let transport = ScriptedTransport::default();
    transport.responses.lock().unwrap().push_back(response_bytes);
    let mut collection = Collection::new("42", CollectionClass::Email, LocalId(1));
    let cfg = SyncEngineConfig::default();
    let cancel = CancelToken::new();

    sync_email_once(
        &transport,
        &store,
        &mut collection,
        &cfg,
        vec![EmailUpsyncOp::SetRead {
            server_id: "42:7".into(),
            read: true,
        }],
        &cancel,
    )
    .await
    .unwrap();

    let sent = transport.requests_seen.lock().unwrap()[0].clone();
    let mut dec = Decoder::new(&sent).unwrap();
    let root = dec.expect_root(&["Sync"]).unwrap();
    let collections = dec.next_tag(Some(root)).unwrap().unwrap();
    let req_collection = dec.next_tag(Some(collections)).unwrap().unwrap();
    let mut commands_tag = None;
    while let Some(field) = dec.next_tag(Some(req_collection)).unwrap() {
        if field.name() == "Commands" {
            commands_tag = Some(field);
        } else {
            dec.skip_tag().unwrap();
        }
    }
    let change = dec.next_tag(commands_tag).unwrap().unwrap();
    assert_eq!(change.name(), "Change");
    let server_id_tag = dec.next_tag(Some(change)).unwrap().unwrap();
    assert_eq!(server_id_tag.name(), "ServerId");
    assert_eq!(dec.get_value().unwrap(), "42:7");
    let ad = dec.next_tag(Some(change)).unwrap().unwrap();
    assert_eq!(ad.name(), "ApplicationData");
    let read_tag = dec.next_tag(Some(ad)).unwrap().unwrap();
    assert_eq!(read_tag.name(), "Read");
    assert_eq!(dec.get_value().unwrap(), "1");
}

// Scenario 4: all-day event in a non-matching timezone downgrades to timed.
#[test]
fn all_day_event_in_non_matching_timezone_downgrades() {
    let mut enc = Encoder::new();
    enc.start(air_sync_tag("Commands")).unwrap();
    enc.start(air_sync_tag("Add")).unwrap();
    enc.start(air_sync_tag("ServerId")).unwrap();
    enc.data("9:1").unwrap();
    enc.end().unwrap();
    enc.start(air_sync_tag("ApplicationData")).unwrap();
    enc.start(cal_tag("AllDayEvent")).unwrap();
    enc.data("1").unwrap();
    enc.end().unwrap();
    // Server's local midnight in "Pacific Standard Time" is not UTC
    // midnight from the client's Europe/Berlin perspective.
    enc.start(cal_tag("StartTime")).unwrap();
    enc.data("20240601T070000Z").unwrap();
    enc.end().unwrap();
    enc.end().unwrap(); // ApplicationData
    enc.end().unwrap(); // Add
    enc.end().unwrap(); // Commands
    let bytes = enc.finish().unwrap();

    let mut dec = Decoder::new(&bytes).unwrap();
    let commands = dec.expect_root(&["Commands"]).unwrap();
    let batch = calendar::parse_commands(&mut dec, commands, 50, None).unwrap();
    match &batch.ops[0] {
        ChangeRecord::Add { data, .. } => {
            assert!(!data.all_day);
            assert_eq!(data.start_utc_ms, Some(1717225200000));
        }
        _ => panic!("expected Add"),
    }
}

// Scenario 5: exception cancellation round-trip.
#[test]
fn cancelled_exception_round_trips_through_downsync_and_upsync() {
    let mut enc = Encoder::new();
    enc.start(air_sync_tag("Commands")).unwrap();
    enc.start(air_sync_tag("Add")).unwrap();
    enc.start(air_sync_tag("ServerId")).unwrap();
    enc.data("P").unwrap();
    enc.end().unwrap();
    enc.start(air_sync_tag("ApplicationData")).unwrap();
    enc.start(cal_tag("Subject")).unwrap();
    enc.data("Weekly sync").unwrap();
    enc.end().unwrap();
    enc.start(cal_tag("Exceptions")).unwrap();
    enc.start(cal_tag("Exception")).unwrap();
    enc.start(cal_tag("Exception_StartTime")).unwrap();
    enc.data("20240704T150000Z").unwrap();
    enc.end().unwrap();
    enc.start(cal_tag("Exception_Deleted")).unwrap();
    enc.data("1").unwrap();
    enc.end().unwrap();
    enc.start(cal_tag("MeetingStatus")).unwrap();
    enc.data("5").unwrap();
    enc.end().unwrap();
    enc.end().unwrap(); // Exception
    enc.end().unwrap(); // Exceptions
    enc.end().unwrap(); // ApplicationData
    enc.end().unwrap(); // Add
    enc.end().unwrap(); // Commands
    let bytes = enc.finish().unwrap();

    let mut dec = Decoder::new(&bytes).unwrap();
    let commands = dec.expect_root(&["Commands"]).unwrap();
    let batch = calendar::parse_commands(&mut dec, commands, 50, None).unwrap();
    let event = match &batch.ops[0] {
        ChangeRecord::Add { data, .. } => data.clone(),
        _ => panic!("expected Add"),
    };
    assert_eq!(event.exceptions.len(), 1);
    let exc = &event.exceptions[0];
    assert!(exc.is_cancelled());
    assert!(exc.deleted);
    // Inherited from the parent since the exception itself carries no subject.
    assert_eq!(exc.subject.as_deref(), Some("Weekly sync"));

    // A subsequent upsync of the parent re-sends every exception, the
    // cancelled one included, as a start-time + deleted marker.
    let mut upsync_enc = Encoder::new();
    calendar::serialize_commands(
        &mut upsync_enc,
        &[CalendarUpsyncOp::UpsyncExceptions {
            server_id: "P".into(),
            exceptions: event.exceptions.clone(),
        }],
    )
    .unwrap();
    let upsync_bytes = upsync_enc.finish().unwrap();

    let mut dec = Decoder::new(&upsync_bytes).unwrap();
    let cmds = dec.expect_root(&["Commands"]).unwrap();
    let change = dec.next_tag(Some(cmds)).unwrap().unwrap();
    assert_eq!(change.name(), "Change");
    let sid = dec.next_tag(Some(change)).unwrap().unwrap();
    assert_eq!(dec.get_value().unwrap(), "P");
    let _ = sid;
    let ad = dec.next_tag(Some(change)).unwrap().unwrap();
    let exceptions_tag = dec.next_tag(Some(ad)).unwrap().unwrap();
    assert_eq!(exceptions_tag.name(), "Exceptions");
    let exception_tag = dec.next_tag(Some(exceptions_tag)).unwrap().unwrap();
    assert_eq!(exception_tag.name(), "Exception");
    let start_tag = dec.next_tag(Some(exception_tag)).unwrap().unwrap();
    assert_eq!(start_tag.name(), "Exception_StartTime");
    assert_eq!(dec.get_value().unwrap(), "20240704T150000Z");
    let deleted_tag = dec.next_tag(Some(exception_tag)).unwrap().unwrap();
    assert_eq!(deleted_tag.name(), "Exception_Deleted");
    assert_eq!(dec.get_value().unwrap(), "1");
}

// Scenario 6: attendee overflow with the local user as organizer.
#[tokio::test]
async fn attendee_overflow_redacts_and_prohibits_upsync_for_organizer() {
    let mut enc = Encoder::new();
    enc.start(air_sync_tag("Commands")).unwrap();
    enc.start(air_sync_tag("Add")).unwrap();
    enc.start(air_sync_tag("ServerId")).unwrap();
    enc.data("9:2").unwrap();
    enc.end().unwrap();
    enc.start(air_sync_tag("ApplicationData")).unwrap();
    enc.start(cal_tag("OrganizerEmail")).unwrap();
    enc.data("me@example.com").unwrap();
    enc.end().unwrap();
    enc.start(cal_tag("Attendees")).unwrap();
    for i in 0..75 {
        enc.start(cal_tag("Attendee")).unwrap();
        enc.start(cal_tag("Attendee_Email")).unwrap();
        enc.data(&format!("person{i}@example.com")).unwrap();
        enc.end().unwrap();
        enc.end().unwrap();
    }
    enc.end().unwrap(); // Attendees
    enc.end().unwrap(); // ApplicationData
    enc.end().unwrap(); // Add
    enc.end().unwrap(); // Commands
    let bytes = enc.finish().unwrap();

    let mut dec = Decoder::new(&bytes).unwrap();
    let commands = dec.expect_root(&["Commands"]).unwrap();
    let batch = calendar::parse_commands(&mut dec, commands, 50, None).unwrap();
    let event = match &batch.ops[0] {
        ChangeRecord::Add { data, .. } => data.clone(),
        _ => panic!("expected Add"),
    };

    assert!(event.attendees.is_empty());
    assert!(event.attendees_redacted);
    assert!(event.upsync_prohibited);
    assert_eq!(event.organizer_email.as_deref(), Some(calendar::REDACTED_ORGANIZER_SENTINEL));

    // upsync_prohibited must suppress the invite at the effect-decision
    // layer itself, not just rely on the host's upsync planner excluding
    // the event from the batch.
    assert_eq!(calendar::meeting_invite_effect_for_dirty(&event, true), None);
}

#[tokio::test]
async fn calendar_upsync_dispatches_invite_before_commands_transmit() {
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

    let mut collection = Collection::new("col-cal", CollectionClass::Calendar, LocalId(2));
    collection.sync_interval = SyncInterval::Ping;
    let cfg = SyncEngineConfig::default();
    let cancel = CancelToken::new();

    let dispatch = eas_sync_core::sync::CalendarMailDispatch {
        event_id: LocalId(7),
        event: Event::default(),
        is_organizer: true,
        account: "me@example.com".into(),
        client_id: None,
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

    assert_eq!(mail_out.enqueued.lock().unwrap().len(), 1);
}

// Sanity checks on two supporting types touched throughout the scenarios.
#[test]
fn exception_default_is_not_cancelled() {
    let exc = Exception::default();
    assert!(!exc.is_cancelled());
}
