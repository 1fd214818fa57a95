//! Component A — the Token Table.
//!
//! A compile-time two-dimensional mapping: for each code page, tag numbers
//! 5..63 map to a symbolic name. Lookup is O(1) both ways (name+page -> tag
//! for encoding, page+tag -> name for decoding/logging). Unknown tag numbers
//! decode to a synthetic `"page_N:tag_M"` name and must be skippable without
//! error — callers never fail just because they met a tag they don't model.
//!
//! This table is the thing a misnamed entry corrupts on the wire; it is
//! generalized from the teacher's `Wbxml::new()` (which only filled in a
//! handful of tags for Calendar sync) to cover every code page §6 lists,
//! with the tags the Email/Contacts/Calendar parsers (§4.E/F/G) actually
//! need.

use lazy_static::lazy_static;
use std::collections::HashMap;

/// A numbered namespace of up to 59 tag numbers (5..63).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodePage(pub u8);

impl CodePage {
    pub const AIR_SYNC: CodePage = CodePage(0);
    pub const CONTACTS: CodePage = CodePage(1);
    pub const EMAIL: CodePage = CodePage(2);
    pub const CALENDAR: CodePage = CodePage(4);
    pub const MOVE: CodePage = CodePage(5);
    pub const ITEM_ESTIMATE: CodePage = CodePage(6);
    pub const FOLDER_HIERARCHY: CodePage = CodePage(7);
    pub const MEETING_RESPONSE: CodePage = CodePage(8);
    pub const TASKS: CodePage = CodePage(9);
    pub const CONTACTS2: CodePage = CodePage(12);
    pub const PING: CodePage = CodePage(13);
    pub const PROVISION: CodePage = CodePage(14);
    pub const GAL: CodePage = CodePage(16);
    pub const AIR_SYNC_BASE: CodePage = CodePage(17);
}

/// A 16-bit value: the high 10 bits are the code page, the low 6 bits are
/// the tag-within-page number (5..63). Tag 0 is END; tag 3 is STR_I.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenId {
    pub page: CodePage,
    pub tag: u8,
}

impl TokenId {
    pub fn new(page: CodePage, tag: u8) -> Self {
        TokenId { page, tag }
    }

    /// Symbolic name, or the synthetic `page_N:tag_M` form for a tag number
    /// this table does not carry. Unknown tags must remain skippable, never
    /// an error — this is the function that makes that possible.
    pub fn name(&self) -> String {
        TOKEN_TABLE
            .tok_to_tag
            .get(&(self.page.0, self.tag))
            .map(|s| s.to_string())
            .unwrap_or_else(|| format!("page_{}:tag_{}", self.page.0, self.tag))
    }
}

pub struct TokenTable {
    tok_to_tag: HashMap<(u8, u8), &'static str>,
    tag_to_tok: HashMap<(&'static str, u8), u8>,
}

impl TokenTable {
    pub fn name_for(&self, page: CodePage, tag: u8) -> Option<&'static str> {
        self.tok_to_tag.get(&(page.0, tag)).copied()
    }

    pub fn tag_for(&self, page: CodePage, name: &str) -> Option<u8> {
        // names are 'static in the table; look up by value since the input
        // is a borrowed str, not the 'static key.
        self.tag_to_tok
            .iter()
            .find(|((n, p), _)| *p == page.0 && *n == name)
            .map(|(_, t)| *t)
    }
}

macro_rules! page {
    ($tok_to_tag:ident, $tag_to_tok:ident, $page:expr, { $($tag:expr => $name:expr),* $(,)? }) => {
        $(
            $tok_to_tag.insert(($page, $tag), $name);
            $tag_to_tok.insert(($name, $page), $tag);
        )*
    };
}

fn build() -> TokenTable {
    let mut tok_to_tag: HashMap<(u8, u8), &'static str> = HashMap::new();
    let mut tag_to_tok: HashMap<(&'static str, u8), u8> = HashMap::new();

    // Page 0: AirSync
    page!(tok_to_tag, tag_to_tok, 0, {
        0x05 => "Sync",
        0x06 => "Responses",
        0x07 => "Add",
        0x08 => "Change",
        0x09 => "Delete",
        0x0A => "Fetch",
        0x0B => "SyncKey",
        0x0C => "ClientId",
        0x0D => "ServerId",
        0x0E => "Status",
        0x0F => "Collection",
        0x10 => "Class",
        0x12 => "CollectionId",
        0x13 => "GetChanges",
        0x14 => "MoreAvailable",
        0x15 => "WindowSize",
        0x16 => "Commands",
        0x17 => "Options",
        0x18 => "FilterType",
        0x1B => "Conflict",
        0x1C => "Collections",
        0x1D => "ApplicationData",
        0x1E => "DeletesAsMoves",
        0x1F => "NotifyGUID",
        0x20 => "Supported",
        0x21 => "SoftDelete",
        0x22 => "MIMESupport",
        0x23 => "MIMETruncation",
        0x24 => "Wait",
        0x25 => "Limit",
        0x26 => "Partial",
        0x27 => "ConversationMode",
        0x28 => "MaxItems",
        0x29 => "HeartbeatInterval",
    });

    // Page 1: Contacts
    page!(tok_to_tag, tag_to_tok, 1, {
        0x05 => "Anniversary",
        0x06 => "AssistantName",
        0x07 => "AssistantTelephoneNumber",
        0x08 => "Birthday",
        0x0C => "Business2PhoneNumber",
        0x0D => "BusinessAddressCity",
        0x0E => "BusinessAddressCountry",
        0x0F => "BusinessAddressPostalCode",
        0x10 => "BusinessAddressState",
        0x11 => "BusinessAddressStreet",
        0x12 => "BusinessFaxNumber",
        0x13 => "BusinessPhoneNumber",
        0x14 => "CarPhoneNumber",
        0x15 => "Categories",
        0x16 => "Category",
        0x17 => "Children",
        0x18 => "Child",
        0x19 => "CompanyName",
        0x1A => "Department",
        0x1B => "Email1Address",
        0x1C => "Email2Address",
        0x1D => "Email3Address",
        0x1E => "FileAs",
        0x1F => "FirstName",
        0x20 => "Home2PhoneNumber",
        0x21 => "HomeAddressCity",
        0x22 => "HomeAddressCountry",
        0x23 => "HomeAddressPostalCode",
        0x24 => "HomeAddressState",
        0x25 => "HomeAddressStreet",
        0x26 => "HomeFaxNumber",
        0x27 => "HomePhoneNumber",
        0x28 => "JobTitle",
        0x29 => "LastName",
        0x2A => "MiddleName",
        0x2B => "MobilePhoneNumber",
        0x2C => "OfficeLocation",
        0x2D => "OtherAddressCity",
        0x2E => "OtherAddressCountry",
        0x2F => "OtherAddressPostalCode",
        0x30 => "OtherAddressState",
        0x31 => "OtherAddressStreet",
        0x32 => "PagerNumber",
        0x33 => "RadioPhoneNumber",
        0x34 => "Spouse",
        0x35 => "Suffix",
        0x36 => "Title",
        0x37 => "WebPage",
        0x38 => "YomiCompanyName",
        0x39 => "YomiFirstName",
        0x3A => "YomiLastName",
        0x3B => "CompressedRTF",
        0x3C => "Picture",
    });

    // Page 2: Email
    page!(tok_to_tag, tag_to_tok, 2, {
        0x05 => "Attachment",
        0x06 => "Attachments",
        0x07 => "AttName",
        0x08 => "AttSize",
        0x09 => "Att0Id",
        0x0A => "AttMethod",
        0x0B => "AttRemoved",
        0x0C => "Body",
        0x0D => "BodySize",
        0x0E => "BodyTruncated",
        0x0F => "DateReceived",
        0x10 => "DisplayName",
        0x11 => "DisplayTo",
        0x12 => "Importance",
        0x13 => "MessageClass",
        0x14 => "Subject",
        0x15 => "Read",
        0x16 => "To",
        0x17 => "Cc",
        0x18 => "From",
        0x19 => "ReplyTo",
        0x1A => "AllDayEvent",
        0x1B => "Categories",
        0x1C => "Category",
        0x1D => "DTStamp",
        0x1E => "EndTime",
        0x1F => "InstanceType",
        0x20 => "BusyStatus",
        0x21 => "Location",
        0x22 => "MeetingRequest",
        0x23 => "Organizer",
        0x24 => "RecurrenceId",
        0x25 => "Reminder",
        0x26 => "ResponseRequested",
        0x27 => "Recurrences",
        0x28 => "Recurrence",
        0x29 => "Recurrence_Type",
        0x2A => "Recurrence_Until",
        0x2B => "Recurrence_Occurrences",
        0x2C => "Recurrence_Interval",
        0x2D => "Recurrence_DayOfWeek",
        0x2E => "Recurrence_DayOfMonth",
        0x2F => "Recurrence_WeekOfMonth",
        0x30 => "Recurrence_MonthOfYear",
        0x31 => "StartTime",
        0x32 => "Sensitivity",
        0x33 => "TimeZone",
        0x34 => "GlobalObjId",
        0x35 => "ThreadTopic",
        0x39 => "InternetCPID",
        0x3A => "Flag",
        0x3B => "FlagStatus",
        0x3C => "ContentClass",
        0x3D => "FlagType",
        0x3E => "CompleteTime",
    });

    // Page 4: Calendar
    page!(tok_to_tag, tag_to_tok, 4, {
        0x05 => "Timezone",
        0x06 => "AllDayEvent",
        0x07 => "Attendees",
        0x08 => "Attendee",
        0x09 => "Attendee_Email",
        0x0A => "Attendee_Name",
        0x0B => "BusyStatus",
        0x0C => "Categories",
        0x0D => "Category",
        0x0E => "Rtf",
        0x0F => "DtStamp",
        0x10 => "EndTime",
        0x11 => "Exception",
        0x12 => "Exceptions",
        0x13 => "Exception_Deleted",
        0x14 => "Exception_StartTime",
        0x15 => "Location",
        0x16 => "MeetingStatus",
        0x17 => "Attendee_Status",
        0x18 => "Attendee_Type",
        0x19 => "Reminder",
        0x1A => "Sensitivity",
        0x1B => "Subject",
        0x1C => "Recurrence",
        0x1D => "Recurrence_Type",
        0x1E => "Recurrence_Until",
        0x1F => "Recurrence_Occurrences",
        0x20 => "Recurrence_Interval",
        0x21 => "Recurrence_DayOfWeek",
        0x22 => "Recurrence_DayOfMonth",
        0x23 => "Recurrence_WeekOfMonth",
        0x24 => "Recurrence_MonthOfYear",
        0x25 => "Organizer",
        0x26 => "StartTime",
        0x27 => "UID",
        0x28 => "OrganizerName",
        0x29 => "OrganizerEmail",
        0x2A => "Recurrence_Id",
        0x2B => "ResponseRequested",
        0x2C => "AppointmentReplyTime",
        0x2D => "ResponseType",
        0x2E => "CalendarType",
        0x2F => "IsLeapMonth",
        0x30 => "FirstDayOfWeek",
        0x31 => "OnlineMeetingConfLink",
        0x32 => "OnlineMeetingExternalLink",
    });

    // Page 7: FolderHierarchy
    page!(tok_to_tag, tag_to_tok, 7, {
        0x05 => "Folders",
        0x06 => "Folder",
        0x07 => "DisplayName",
        0x08 => "ServerId",
        0x09 => "ParentId",
        0x0A => "Type",
        0x0C => "Status",
        0x0E => "Add",
        0x0F => "Delete",
        0x10 => "Update",
        0x12 => "SyncKey",
        0x13 => "FolderCreate",
        0x14 => "FolderDelete",
        0x15 => "FolderUpdate",
        0x16 => "FolderSync",
        0x17 => "Count",
    });

    // Page 13: Ping
    page!(tok_to_tag, tag_to_tok, 13, {
        0x05 => "Ping",
        0x06 => "AutdState",
        0x07 => "Status",
        0x08 => "HeartbeatInterval",
        0x09 => "Folders",
        0x0A => "Folder",
        0x0B => "Id",
        0x0C => "Class",
        0x0D => "MaxFolders",
    });

    // Page 14: Provision
    page!(tok_to_tag, tag_to_tok, 14, {
        0x05 => "Provision",
        0x06 => "Policies",
        0x07 => "Policy",
        0x08 => "PolicyType",
        0x09 => "PolicyKey",
        0x0A => "Data",
        0x0B => "Status",
        0x0C => "RemoteWipe",
        0x0D => "EASProvisionDoc",
    });

    // Page 17: AirSyncBase
    page!(tok_to_tag, tag_to_tok, 17, {
        0x05 => "BodyPreference",
        0x06 => "Type",
        0x07 => "TruncationSize",
        0x08 => "AllOrNone",
        0x0A => "Body",
        0x0B => "Data",
        0x0C => "EstimatedDataSize",
        0x0D => "Truncated",
        0x0E => "Attachments",
        0x0F => "Attachment",
        0x10 => "DisplayName",
        0x11 => "FileReference",
        0x12 => "Method",
        0x13 => "ContentId",
        0x14 => "ContentLocation",
        0x15 => "IsInline",
        0x16 => "NativeBodyType",
        0x17 => "ContentType",
        0x18 => "Preview",
    });

    TokenTable {
        tok_to_tag,
        tag_to_tok,
    }
}

lazy_static! {
    pub static ref TOKEN_TABLE: TokenTable = build();
}
