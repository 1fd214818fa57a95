//! Component E — Email Parser/Serializer.
//!
//! Decodes Add/Change/Delete for messages; serializes read-flag updates and
//! deletions. Changes carry only sparse fields — the core merges into the
//! current record (field-level detail of "merge" lives in the Store
//! collaborator; this module hands back exactly the fields the wire sent).

use crate::error::SyncCoreError;
use crate::models::{ChangeBatch, ChangeRecord};
use crate::token_table::{CodePage, TokenId, TOKEN_TABLE};
use crate::wbxml::{Decoder, Encoder};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    PlainText = 1,
    Html = 2,
    Rtf = 3,
    Mime = 4,
}

impl BodyType {
    fn from_wire(v: i64) -> Option<Self> {
        match v {
            1 => Some(BodyType::PlainText),
            2 => Some(BodyType::Html),
            3 => Some(BodyType::Rtf),
            4 => Some(BodyType::Mime),
            _ => None,
        }
    }
}

/// Required (display-name, size, file-reference) triple — an attachment
/// missing any of the three is silently dropped (§4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub display_name: String,
    pub size: u64,
    pub file_reference: String,
}

#[derive(Debug, Clone, Default)]
pub struct Message {
    pub from: Option<String>,
    pub to: Option<String>,
    pub cc: Option<String>,
    pub reply_to: Option<String>,
    pub subject: Option<String>,
    pub date_received: Option<DateTime<Utc>>,
    pub body: Option<String>,
    pub body_type: Option<BodyType>,
    pub attachments: Vec<Attachment>,
    pub read: Option<bool>,
}

fn email_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::EMAIL, TOKEN_TABLE.tag_for(CodePage::EMAIL, name).expect(name))
}

fn asb_tag(name: &str) -> TokenId {
    TokenId::new(
        CodePage::AIR_SYNC_BASE,
        TOKEN_TABLE.tag_for(CodePage::AIR_SYNC_BASE, name).expect(name),
    )
}

fn air_sync_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::AIR_SYNC, TOKEN_TABLE.tag_for(CodePage::AIR_SYNC, name).expect(name))
}

/// Parses the nested token stream under a `<Commands>` element for the
/// Email collection into a `ChangeBatch<Message>`.
#[tracing::instrument(skip(dec))]
pub fn parse_commands(dec: &mut Decoder, commands_tag: TokenId) -> Result<ChangeBatch<Message>, SyncCoreError> {
    let mut batch = ChangeBatch::new();

    while let Some(cmd_tag) = dec.next_tag(Some(commands_tag))? {
        match cmd_tag.name().as_str() {
            "Add" => {
                let (server_id, client_id, data) = parse_add_or_change(dec, cmd_tag)?;
                batch.push(ChangeRecord::Add {
                    client_id,
                    server_id,
                    data,
                });
            }
            "Change" => {
                let (server_id, _client_id, data) = parse_add_or_change(dec, cmd_tag)?;
                if let Some(server_id) = server_id {
                    batch.push(ChangeRecord::Change { server_id, data });
                } else {
                    tracing::warn!("Email Change with no ServerId, dropping");
                }
            }
            "Delete" => {
                if let Some(server_id) = read_server_id(dec, cmd_tag)? {
                    batch.push(ChangeRecord::Delete { server_id });
                }
            }
            _ => {
                tracing::debug!(tag = %cmd_tag.name(), "skipping unrecognized Email command");
                dec.skip_tag()?;
            }
        }
    }
    Ok(batch)
}

fn read_server_id(dec: &mut Decoder, parent: TokenId) -> Result<Option<String>, SyncCoreError> {
    let mut server_id = None;
    while let Some(child) = dec.next_tag(Some(parent))? {
        if child.name() == "ServerId" {
            server_id = Some(dec.get_value()?);
        } else {
            dec.skip_tag()?;
        }
    }
    Ok(server_id)
}

fn parse_add_or_change(
    dec: &mut Decoder,
    parent: TokenId,
) -> Result<(Option<String>, Option<String>, Message), SyncCoreError> {
    let mut server_id = None;
    let mut client_id = None;
    let mut message = Message::default();

    while let Some(child) = dec.next_tag(Some(parent))? {
        match child.name().as_str() {
            "ServerId" => server_id = Some(dec.get_value()?),
            "ClientId" => client_id = Some(dec.get_value()?),
            "ApplicationData" => message = parse_application_data(dec, child)?,
            _ => dec.skip_tag()?,
        }
    }
    Ok((server_id, client_id, message))
}

fn parse_application_data(dec: &mut Decoder, ad_tag: TokenId) -> Result<Message, SyncCoreError> {
    let mut m = Message::default();

    while let Some(field) = dec.next_tag(Some(ad_tag))? {
        let name = field.name();
        match name.as_str() {
            "From" => m.from = Some(dec.get_value()?),
            "To" => m.to = Some(dec.get_value()?),
            "Cc" => m.cc = Some(dec.get_value()?),
            "ReplyTo" => m.reply_to = Some(dec.get_value()?),
            "Subject" => m.subject = Some(dec.get_value()?),
            "Read" => m.read = Some(dec.get_value_int()? != 0),
            "DateReceived" => {
                let raw = dec.get_value()?;
                match parse_iso8601_ms(&raw) {
                    Ok(dt) => m.date_received = Some(dt),
                    Err(e) => tracing::warn!(value = %raw, error = %e, "unparseable DateReceived, skipping field"),
                }
            }
            "Body" if field.page == CodePage::AIR_SYNC_BASE => {
                parse_airsyncbase_body(dec, field, &mut m)?;
            }
            "Attachments" if field.page == CodePage::AIR_SYNC_BASE => {
                m.attachments = parse_attachments(dec, field)?;
            }
            _ => {
                dec.skip_tag()?;
            }
        }
    }
    Ok(m)
}

fn parse_airsyncbase_body(dec: &mut Decoder, body_tag: TokenId, m: &mut Message) -> Result<(), SyncCoreError> {
    while let Some(field) = dec.next_tag(Some(body_tag))? {
        match field.name().as_str() {
            "Type" => m.body_type = BodyType::from_wire(dec.get_value_int()?),
            "Data" => m.body = Some(dec.get_value()?),
            _ => dec.skip_tag()?,
        }
    }
    Ok(())
}

fn parse_attachments(dec: &mut Decoder, attachments_tag: TokenId) -> Result<Vec<Attachment>, SyncCoreError> {
    let mut out = Vec::new();
    while let Some(att_tag) = dec.next_tag(Some(attachments_tag))? {
        if att_tag.name() != "Attachment" {
            dec.skip_tag()?;
            continue;
        }
        let mut display_name = None;
        let mut size = None;
        let mut file_reference = None;
        while let Some(field) = dec.next_tag(Some(att_tag))? {
            match field.name().as_str() {
                "DisplayName" => display_name = Some(dec.get_value()?),
                "EstimatedDataSize" => size = Some(dec.get_value_int()? as u64),
                "FileReference" => file_reference = Some(dec.get_value()?),
                _ => dec.skip_tag()?,
            }
        }
        match (display_name, size, file_reference) {
            (Some(display_name), Some(size), Some(file_reference)) => out.push(Attachment {
                display_name,
                size,
                file_reference,
            }),
            _ => tracing::warn!("dropping attachment missing display-name/size/file-reference"),
        }
    }
    Ok(out)
}

fn parse_iso8601_ms(s: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(s).map(|d| d.with_timezone(&Utc))
}

/// Upsync operations: "for messages moved to Trash locally -> Delete; for
/// read-state changes -> Change with ApplicationData/Read. Other local
/// edits are not upsynced" (§4.E).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmailUpsyncOp {
    Delete { server_id: String },
    SetRead { server_id: String, read: bool },
}

pub fn serialize_commands(enc: &mut Encoder, ops: &[EmailUpsyncOp]) -> Result<(), SyncCoreError> {
    enc.start(air_sync_tag("Commands"))?;
    for op in ops {
        match op {
            EmailUpsyncOp::Delete { server_id } => {
                enc.start(air_sync_tag("Delete"))?;
                enc.start(air_sync_tag("ServerId"))?;
                enc.data(server_id)?;
                enc.end()?;
                enc.end()?;
            }
            EmailUpsyncOp::SetRead { server_id, read } => {
                enc.start(air_sync_tag("Change"))?;
                enc.start(air_sync_tag("ServerId"))?;
                enc.data(server_id)?;
                enc.end()?;
                enc.start(air_sync_tag("ApplicationData"))?;
                enc.start(email_tag("Read"))?;
                enc.data(if *read { "1" } else { "0" })?;
                enc.end()?;
                enc.end()?;
                enc.end()?;
            }
        }
    }
    enc.end()?; // Commands
    Ok(())
}
