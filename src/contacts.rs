//! Component F — Contacts Parser/Serializer.
//!
//! Canonicalizes the fixed, enumerated set of known Contacts fields into a
//! typed `Contact`; everything else round-trips verbatim through `extras`
//! (§4.F "Extras policy"). A server `Change` is applied as delete+re-add
//! because EAS sends full records on change, never a diff.

use crate::error::SyncCoreError;
use crate::models::{ChangeBatch, ChangeRecord};
use crate::token_table::{CodePage, TokenId, TOKEN_TABLE};
use crate::wbxml::{Decoder, Encoder};

/// The fixed set of Contacts tags this crate canonicalizes. Anything else
/// under `ApplicationData` falls through to `extras`.
const KNOWN_FIELDS: &[&str] = &[
    "FirstName",
    "LastName",
    "MiddleName",
    "Suffix",
    "CompanyName",
    "JobTitle",
    "Department",
    "FileAs",
    "Email1Address",
    "Email2Address",
    "Email3Address",
    "BusinessPhoneNumber",
    "Business2PhoneNumber",
    "HomePhoneNumber",
    "Home2PhoneNumber",
    "MobilePhoneNumber",
    "CarPhoneNumber",
    "PagerNumber",
    "RadioPhoneNumber",
    "BusinessFaxNumber",
    "HomeFaxNumber",
    "BusinessAddressStreet",
    "BusinessAddressCity",
    "BusinessAddressState",
    "BusinessAddressPostalCode",
    "BusinessAddressCountry",
    "HomeAddressStreet",
    "HomeAddressCity",
    "HomeAddressState",
    "HomeAddressPostalCode",
    "HomeAddressCountry",
    "Birthday",
    "Anniversary",
    "WebPage",
    "Title",
    "Spouse",
];

#[derive(Debug, Clone, Default)]
pub struct Contact {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub middle_name: Option<String>,
    pub suffix: Option<String>,
    pub company_name: Option<String>,
    pub job_title: Option<String>,
    pub department: Option<String>,
    pub file_as: Option<String>,
    pub email1: Option<String>,
    pub email2: Option<String>,
    pub email3: Option<String>,
    pub business_phone: Option<String>,
    pub business2_phone: Option<String>,
    pub home_phone: Option<String>,
    pub home2_phone: Option<String>,
    pub mobile_phone: Option<String>,
    pub car_phone: Option<String>,
    pub pager_number: Option<String>,
    pub radio_phone: Option<String>,
    pub business_fax: Option<String>,
    pub home_fax: Option<String>,
    pub business_address_street: Option<String>,
    pub business_address_city: Option<String>,
    pub business_address_state: Option<String>,
    pub business_address_postal_code: Option<String>,
    pub business_address_country: Option<String>,
    pub home_address_street: Option<String>,
    pub home_address_city: Option<String>,
    pub home_address_state: Option<String>,
    pub home_address_postal_code: Option<String>,
    pub home_address_country: Option<String>,
    pub birthday: Option<String>,
    pub anniversary: Option<String>,
    pub web_page: Option<String>,
    pub title: Option<String>,
    pub spouse: Option<String>,
    /// Verbatim `"tag~value~tag~value~..."` payload for unmapped fields.
    pub extras: Option<String>,
}

impl Contact {
    /// "Required display-name rule: the contact is created only if at
    /// least one of firstName, lastName, companyName is non-empty" (§4.F).
    pub fn has_display_name(&self) -> bool {
        [&self.first_name, &self.last_name, &self.company_name]
            .into_iter()
            .any(|f| f.as_deref().is_some_and(|s| !s.is_empty()))
    }

    fn set_field(&mut self, name: &str, value: String) {
        match name {
            "FirstName" => self.first_name = Some(value),
            "LastName" => self.last_name = Some(value),
            "MiddleName" => self.middle_name = Some(value),
            "Suffix" => self.suffix = Some(value),
            "CompanyName" => self.company_name = Some(value),
            "JobTitle" => self.job_title = Some(value),
            "Department" => self.department = Some(value),
            "FileAs" => self.file_as = Some(value),
            "Email1Address" => self.email1 = Some(value),
            "Email2Address" => self.email2 = Some(value),
            "Email3Address" => self.email3 = Some(value),
            "BusinessPhoneNumber" => self.business_phone = Some(value),
            "Business2PhoneNumber" => self.business2_phone = Some(value),
            "HomePhoneNumber" => self.home_phone = Some(value),
            "Home2PhoneNumber" => self.home2_phone = Some(value),
            "MobilePhoneNumber" => self.mobile_phone = Some(value),
            "CarPhoneNumber" => self.car_phone = Some(value),
            "PagerNumber" => self.pager_number = Some(value),
            "RadioPhoneNumber" => self.radio_phone = Some(value),
            "BusinessFaxNumber" => self.business_fax = Some(value),
            "HomeFaxNumber" => self.home_fax = Some(value),
            "BusinessAddressStreet" => self.business_address_street = Some(value),
            "BusinessAddressCity" => self.business_address_city = Some(value),
            "BusinessAddressState" => self.business_address_state = Some(value),
            "BusinessAddressPostalCode" => self.business_address_postal_code = Some(value),
            "BusinessAddressCountry" => self.business_address_country = Some(value),
            "HomeAddressStreet" => self.home_address_street = Some(value),
            "HomeAddressCity" => self.home_address_city = Some(value),
            "HomeAddressState" => self.home_address_state = Some(value),
            "HomeAddressPostalCode" => self.home_address_postal_code = Some(value),
            "HomeAddressCountry" => self.home_address_country = Some(value),
            "Birthday" => self.birthday = Some(value),
            "Anniversary" => self.anniversary = Some(value),
            "WebPage" => self.web_page = Some(value),
            "Title" => self.title = Some(value),
            "Spouse" => self.spouse = Some(value),
            _ => unreachable!("set_field called with unmapped name {name}"),
        }
    }

    fn get_field(&self, name: &str) -> Option<&str> {
        match name {
            "FirstName" => self.first_name.as_deref(),
            "LastName" => self.last_name.as_deref(),
            "MiddleName" => self.middle_name.as_deref(),
            "Suffix" => self.suffix.as_deref(),
            "CompanyName" => self.company_name.as_deref(),
            "JobTitle" => self.job_title.as_deref(),
            "Department" => self.department.as_deref(),
            "FileAs" => self.file_as.as_deref(),
            "Email1Address" => self.email1.as_deref(),
            "Email2Address" => self.email2.as_deref(),
            "Email3Address" => self.email3.as_deref(),
            "BusinessPhoneNumber" => self.business_phone.as_deref(),
            "Business2PhoneNumber" => self.business2_phone.as_deref(),
            "HomePhoneNumber" => self.home_phone.as_deref(),
            "Home2PhoneNumber" => self.home2_phone.as_deref(),
            "MobilePhoneNumber" => self.mobile_phone.as_deref(),
            "CarPhoneNumber" => self.car_phone.as_deref(),
            "PagerNumber" => self.pager_number.as_deref(),
            "RadioPhoneNumber" => self.radio_phone.as_deref(),
            "BusinessFaxNumber" => self.business_fax.as_deref(),
            "HomeFaxNumber" => self.home_fax.as_deref(),
            "BusinessAddressStreet" => self.business_address_street.as_deref(),
            "BusinessAddressCity" => self.business_address_city.as_deref(),
            "BusinessAddressState" => self.business_address_state.as_deref(),
            "BusinessAddressPostalCode" => self.business_address_postal_code.as_deref(),
            "BusinessAddressCountry" => self.business_address_country.as_deref(),
            "HomeAddressStreet" => self.home_address_street.as_deref(),
            "HomeAddressCity" => self.home_address_city.as_deref(),
            "HomeAddressState" => self.home_address_state.as_deref(),
            "HomeAddressPostalCode" => self.home_address_postal_code.as_deref(),
            "HomeAddressCountry" => self.home_address_country.as_deref(),
            "Birthday" => self.birthday.as_deref(),
            "Anniversary" => self.anniversary.as_deref(),
            "WebPage" => self.web_page.as_deref(),
            "Title" => self.title.as_deref(),
            "Spouse" => self.spouse.as_deref(),
            _ => unreachable!("get_field called with unmapped name {name}"),
        }
    }
}

/// Splits the extras blob into `(tag, value)` pairs; a trailing partial
/// pair (odd element count) is dropped rather than erroring.
fn parse_extras(raw: &str) -> Vec<(String, String)> {
    let parts: Vec<&str> = raw.split('~').collect();
    parts.chunks_exact(2).map(|p| (p[0].to_string(), p[1].to_string())).collect()
}

fn format_extras(pairs: &[(String, String)]) -> String {
    pairs.iter().map(|(t, v)| format!("{t}~{v}")).collect::<Vec<_>>().join("~")
}

fn contacts_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::CONTACTS, TOKEN_TABLE.tag_for(CodePage::CONTACTS, name).expect(name))
}

fn air_sync_tag(name: &str) -> TokenId {
    TokenId::new(CodePage::AIR_SYNC, TOKEN_TABLE.tag_for(CodePage::AIR_SYNC, name).expect(name))
}

#[tracing::instrument(skip(dec))]
pub fn parse_commands(dec: &mut Decoder, commands_tag: TokenId) -> Result<ChangeBatch<Contact>, SyncCoreError> {
    let mut batch = ChangeBatch::new();

    while let Some(cmd_tag) = dec.next_tag(Some(commands_tag))? {
        match cmd_tag.name().as_str() {
            "Add" => {
                let (server_id, client_id, contact) = parse_add_or_change(dec, cmd_tag)?;
                if contact.has_display_name() {
                    batch.push(ChangeRecord::Add {
                        client_id,
                        server_id,
                        data: contact,
                    });
                } else {
                    tracing::warn!("dropping contact with no firstName/lastName/companyName");
                }
            }
            "Change" => {
                // Change-as-recreate: EAS sends full records on change, so a
                // Change is modelled as delete(server-id) + re-add (§4.F).
                let (server_id, _client_id, contact) = parse_add_or_change(dec, cmd_tag)?;
                if let Some(server_id) = server_id {
                    if contact.has_display_name() {
                        batch.push(ChangeRecord::Delete {
                            server_id: server_id.clone(),
                        });
                        batch.push(ChangeRecord::Add {
                            client_id: None,
                            server_id: Some(server_id),
                            data: contact,
                        });
                    } else {
                        batch.push(ChangeRecord::Delete { server_id });
                    }
                } else {
                    tracing::warn!("Contacts Change with no ServerId, dropping");
                }
            }
            "Delete" => {
                let mut server_id = None;
                while let Some(child) = dec.next_tag(Some(cmd_tag))? {
                    if child.name() == "ServerId" {
                        server_id = Some(dec.get_value()?);
                    } else {
                        dec.skip_tag()?;
                    }
                }
                if let Some(server_id) = server_id {
                    batch.push(ChangeRecord::Delete { server_id });
                }
            }
            _ => {
                tracing::debug!(tag = %cmd_tag.name(), "skipping unrecognized Contacts command");
                dec.skip_tag()?;
            }
        }
    }
    Ok(batch)
}

fn parse_add_or_change(
    dec: &mut Decoder,
    parent: TokenId,
) -> Result<(Option<String>, Option<String>, Contact), SyncCoreError> {
    let mut server_id = None;
    let mut client_id = None;
    let mut contact = Contact::default();

    while let Some(child) = dec.next_tag(Some(parent))? {
        match child.name().as_str() {
            "ServerId" => server_id = Some(dec.get_value()?),
            "ClientId" => client_id = Some(dec.get_value()?),
            "ApplicationData" => contact = parse_application_data(dec, child)?,
            _ => dec.skip_tag()?,
        }
    }
    Ok((server_id, client_id, contact))
}

fn parse_application_data(dec: &mut Decoder, ad_tag: TokenId) -> Result<Contact, SyncCoreError> {
    let mut c = Contact::default();
    let mut extras: Vec<(String, String)> = Vec::new();

    while let Some(field) = dec.next_tag(Some(ad_tag))? {
        let name = field.name();
        if KNOWN_FIELDS.contains(&name.as_str()) {
            let value = dec.get_value()?;
            c.set_field(&name, value);
        } else {
            let value = dec.get_value()?;
            extras.push((name, value));
        }
    }
    if !extras.is_empty() {
        c.extras = Some(format_extras(&extras));
    }
    Ok(c)
}

pub fn serialize_add(enc: &mut Encoder, client_id: &str, contact: &Contact) -> Result<(), SyncCoreError> {
    enc.start(air_sync_tag("Add"))?;
    enc.start(air_sync_tag("ClientId"))?;
    enc.data(client_id)?;
    enc.end()?;
    enc.start(air_sync_tag("ApplicationData"))?;
    serialize_fields(enc, contact)?;
    enc.end()?; // ApplicationData
    enc.end()?; // Add
    Ok(())
}

fn serialize_fields(enc: &mut Encoder, contact: &Contact) -> Result<(), SyncCoreError> {
    for &name in KNOWN_FIELDS {
        if let Some(value) = contact.get_field(name) {
            enc.start(contacts_tag(name))?;
            enc.data(value)?;
            enc.end()?;
        }
    }
    if let Some(extras) = &contact.extras {
        for (tag, value) in parse_extras(extras) {
            if let Some(tag_num) = TOKEN_TABLE.tag_for(CodePage::CONTACTS, &tag) {
                enc.start(TokenId::new(CodePage::CONTACTS, tag_num))?;
                enc.data(&value)?;
                enc.end()?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_round_trip_through_format_and_parse() {
        let pairs = vec![
            ("Spouse".to_string(), "Jordan".to_string()),
            ("WebPage".to_string(), "https://example.com".to_string()),
        ];
        let blob = format_extras(&pairs);
        assert_eq!(blob, "Spouse~Jordan~WebPage~https://example.com");
        assert_eq!(parse_extras(&blob), pairs);
    }

    #[test]
    fn drops_trailing_odd_extra() {
        let parsed = parse_extras("Spouse~Jordan~Orphan");
        assert_eq!(parsed, vec![("Spouse".to_string(), "Jordan".to_string())]);
    }

    #[test]
    fn requires_a_display_name_field() {
        let mut c = Contact::default();
        assert!(!c.has_display_name());
        c.company_name = Some("Acme".into());
        assert!(c.has_display_name());
    }

    #[test]
    fn add_with_only_empty_fields_is_dropped() {
        let mut enc = Encoder::new();
        enc.start(air_sync_tag("Commands")).unwrap();
        enc.start(air_sync_tag("Add")).unwrap();
        enc.start(air_sync_tag("ApplicationData")).unwrap();
        enc.start(contacts_tag("JobTitle")).unwrap();
        enc.data("Engineer").unwrap();
        enc.end().unwrap();
        enc.end().unwrap(); // ApplicationData
        enc.end().unwrap(); // Add
        enc.end().unwrap(); // Commands
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes).unwrap();
        let commands = dec.expect_root(&["Commands"]).unwrap();
        let batch = parse_commands(&mut dec, commands).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn change_becomes_delete_then_add() {
        let mut enc = Encoder::new();
        enc.start(air_sync_tag("Commands")).unwrap();
        enc.start(air_sync_tag("Change")).unwrap();
        enc.start(air_sync_tag("ServerId")).unwrap();
        enc.data("3:9").unwrap();
        enc.end().unwrap();
        enc.start(air_sync_tag("ApplicationData")).unwrap();
        enc.start(contacts_tag("FirstName")).unwrap();
        enc.data("Dana").unwrap();
        enc.end().unwrap();
        enc.start(contacts_tag("Spouse")).unwrap();
        enc.data("Avery").unwrap();
        enc.end().unwrap();
        enc.end().unwrap(); // ApplicationData
        enc.end().unwrap(); // Change
        enc.end().unwrap(); // Commands
        let bytes = enc.finish().unwrap();

        let mut dec = Decoder::new(&bytes).unwrap();
        let commands = dec.expect_root(&["Commands"]).unwrap();
        let batch = parse_commands(&mut dec, commands).unwrap();
        assert_eq!(batch.len(), 2);
        match &batch.ops[0] {
            ChangeRecord::Delete { server_id } => assert_eq!(server_id, "3:9"),
            _ => panic!("expected Delete"),
        }
        match &batch.ops[1] {
            ChangeRecord::Add { server_id, data, .. } => {
                assert_eq!(server_id.as_deref(), Some("3:9"));
                assert_eq!(data.first_name.as_deref(), Some("Dana"));
                assert_eq!(data.spouse.as_deref(), Some("Avery"));
                assert!(data.extras.is_none());
            }
            _ => panic!("expected Add"),
        }
    }
}
