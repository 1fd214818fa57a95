//! Components B (Decoder) and C (Encoder): the WBXML codec itself.
//!
//! Wire format per WAP-192: header bytes `0x03 0x01 0x6A` (version 1.3,
//! unknown public-id, UTF-8 charset), an empty string table, then a stream
//! of tag/content tokens. The decoder never resolves string-table
//! references — it only tolerates an empty table — and neither side
//! populates one on encode.
//!
//! This generalizes the teacher's `Wbxml` (which decoded straight to an XML
//! string and only knew a handful of Calendar/AirSync tags) into a proper
//! pull-event decoder plus a tree-building encoder, per §4.B/§4.C.

use crate::cancel::CancelToken;
use crate::error::SyncCoreError;
use crate::token_table::{CodePage, TokenId, TOKEN_TABLE};
use bytes::BytesMut;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WbxmlEvent {
    StartTag,
    EndTag,
    EndDocument,
    Text,
    Opaque,
}

/// A pull-style decoder over a WBXML byte stream. `next()` advances and
/// updates the three observable fields `event`/`tag`/`value`.
pub struct Decoder<'a> {
    bytes: &'a [u8],
    offset: usize,
    page: u8,
    open_stack: Vec<TokenId>,
    /// Logical nesting depth, incremented on every StartTag event (even a
    /// degenerate has-content-clear one) and decremented on every matching
    /// EndTag — this is what `skip_tag`/`get_value` compare against, since
    /// `open_stack` alone doesn't move for degenerate tags.
    depth: usize,
    pending_end: Option<TokenId>,
    cancel: Option<CancelToken>,

    pub event: WbxmlEvent,
    pub tag: Option<TokenId>,
    pub value: Option<Vec<u8>>,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, SyncCoreError> {
        if bytes.is_empty() {
            return Err(SyncCoreError::decode("empty payload"));
        }
        let mut offset = 0usize;
        let _version = bytes[offset];
        offset += 1;
        let _public_id = read_mb_uint(bytes, &mut offset)?;
        let _charset = read_mb_uint(bytes, &mut offset)?;
        let strtbl_len = read_mb_uint(bytes, &mut offset)? as usize;
        if offset + strtbl_len > bytes.len() {
            return Err(SyncCoreError::decode("string table truncated"));
        }
        offset += strtbl_len;

        Ok(Decoder {
            bytes,
            offset,
            page: 0,
            open_stack: Vec::new(),
            depth: 0,
            pending_end: None,
            cancel: None,
            event: WbxmlEvent::EndDocument,
            tag: None,
            value: None,
        })
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancel(&self) -> Result<(), SyncCoreError> {
        if let Some(c) = &self.cancel {
            if c.is_cancelled() {
                return Err(SyncCoreError::Cancelled);
            }
        }
        Ok(())
    }

    /// Advances to the next syntactic event.
    #[tracing::instrument(skip(self))]
    pub fn next(&mut self) -> Result<WbxmlEvent, SyncCoreError> {
        self.check_cancel()?;

        if let Some(t) = self.pending_end.take() {
            self.depth -= 1;
            self.event = WbxmlEvent::EndTag;
            self.tag = Some(t);
            self.value = None;
            tracing::trace!(tag = %t.name(), "wbxml end_tag (degenerate)");
            return Ok(self.event);
        }

        if self.offset >= self.bytes.len() {
            self.event = WbxmlEvent::EndDocument;
            self.tag = None;
            self.value = None;
            return Ok(self.event);
        }

        loop {
            let b = self.bytes[self.offset];
            self.offset += 1;
            match b {
                0x00 => {
                    if self.offset >= self.bytes.len() {
                        return Err(SyncCoreError::decode("truncated SWITCH_PAGE"));
                    }
                    self.page = self.bytes[self.offset];
                    self.offset += 1;
                    continue;
                }
                0x01 => {
                    let t = self
                        .open_stack
                        .pop()
                        .ok_or_else(|| SyncCoreError::decode("END_TAG with no open START_TAG"))?;
                    self.depth -= 1;
                    self.event = WbxmlEvent::EndTag;
                    self.tag = Some(t);
                    self.value = None;
                    tracing::trace!(tag = %t.name(), "wbxml end_tag");
                    return Ok(self.event);
                }
                0x03 => {
                    let s = self.read_inline_string()?;
                    self.event = WbxmlEvent::Text;
                    self.tag = None;
                    self.value = Some(s.into_bytes());
                    tracing::trace!(len = self.value.as_ref().unwrap().len(), "wbxml text");
                    return Ok(self.event);
                }
                0xC3 => {
                    let len = read_mb_uint(self.bytes, &mut self.offset)? as usize;
                    if self.offset + len > self.bytes.len() {
                        return Err(SyncCoreError::decode("OPAQUE truncated"));
                    }
                    let data = self.bytes[self.offset..self.offset + len].to_vec();
                    self.offset += len;
                    self.event = WbxmlEvent::Opaque;
                    self.tag = None;
                    self.value = Some(data);
                    return Ok(self.event);
                }
                _ => {
                    let has_attrs = b & 0x80 != 0;
                    let has_content = b & 0x40 != 0;
                    let tag_num = b & 0x3F;
                    let token = TokenId::new(CodePage(self.page), tag_num);

                    if has_attrs {
                        // Attributes are unused on the EAS wire; parse-then-ignore
                        // per §4.B rather than error out.
                        self.skip_attributes()?;
                    }

                    self.depth += 1;
                    if has_content {
                        self.open_stack.push(token);
                    } else {
                        self.pending_end = Some(token);
                    }
                    self.event = WbxmlEvent::StartTag;
                    self.tag = Some(token);
                    self.value = None;
                    tracing::trace!(tag = %token.name(), "wbxml start_tag");
                    return Ok(self.event);
                }
            }
        }
    }

    fn read_inline_string(&mut self) -> Result<String, SyncCoreError> {
        let start = self.offset;
        while self.offset < self.bytes.len() && self.bytes[self.offset] != 0x00 {
            self.offset += 1;
        }
        if self.offset >= self.bytes.len() {
            return Err(SyncCoreError::decode("unterminated inline string"));
        }
        let s = String::from_utf8(self.bytes[start..self.offset].to_vec())
            .map_err(|_| SyncCoreError::decode("inline string is not valid UTF-8"))?;
        self.offset += 1; // consume the NUL terminator
        Ok(s)
    }

    /// Best-effort skip of an attribute list: EAS never emits attributes in
    /// practice, so this only needs to consume bytes up to the attribute
    /// list's own END (0x01) without misinterpreting STR_I/OPAQUE payloads
    /// along the way.
    fn skip_attributes(&mut self) -> Result<(), SyncCoreError> {
        loop {
            if self.offset >= self.bytes.len() {
                return Err(SyncCoreError::decode("truncated attribute list"));
            }
            let b = self.bytes[self.offset];
            self.offset += 1;
            match b {
                0x01 => return Ok(()),
                0x03 => {
                    while self.offset < self.bytes.len() && self.bytes[self.offset] != 0x00 {
                        self.offset += 1;
                    }
                    self.offset += 1;
                }
                0xC3 => {
                    let len = read_mb_uint(self.bytes, &mut self.offset)? as usize;
                    self.offset += len;
                }
                _ => {}
            }
        }
    }

    /// Discards all content up to the matching END at the current depth.
    /// Call immediately after seeing the StartTag you want to skip.
    pub fn skip_tag(&mut self) -> Result<(), SyncCoreError> {
        let target = self.depth - 1;
        loop {
            match self.next()? {
                WbxmlEvent::EndTag => {
                    if self.depth == target {
                        return Ok(());
                    }
                }
                WbxmlEvent::EndDocument => {
                    return Err(SyncCoreError::decode("EOF while skipping an element"));
                }
                _ => {}
            }
        }
    }

    /// Consumes all TEXT/OPAQUE children of the current element until its
    /// END and returns them concatenated.
    pub fn get_value(&mut self) -> Result<String, SyncCoreError> {
        let target = self.depth - 1;
        let mut buf = Vec::new();
        loop {
            match self.next()? {
                WbxmlEvent::Text | WbxmlEvent::Opaque => {
                    if let Some(v) = &self.value {
                        buf.extend_from_slice(v);
                    }
                }
                WbxmlEvent::StartTag => {
                    self.skip_tag()?;
                }
                WbxmlEvent::EndTag => {
                    if self.depth == target {
                        return String::from_utf8(buf)
                            .map_err(|_| SyncCoreError::decode("value is not valid UTF-8"));
                    }
                }
                WbxmlEvent::EndDocument => {
                    return Err(SyncCoreError::decode("EOF while reading a value"));
                }
            }
        }
    }

    /// Like `get_value` but parses base-10; `""` decodes to 0. Malformed
    /// non-empty content degrades to 0 rather than erroring — field-level
    /// noise is swallowed per §7, structural EOF is not.
    pub fn get_value_int(&mut self) -> Result<i64, SyncCoreError> {
        let s = self.get_value()?;
        if s.is_empty() {
            return Ok(0);
        }
        Ok(s.parse::<i64>().unwrap_or_else(|_| {
            tracing::warn!(value = %s, "non-numeric value where an integer was expected, defaulting to 0");
            0
        }))
    }

    /// Advances until the next START_TAG whose parent context is
    /// `expected_parent`, or returns `None` when that parent's closing END
    /// is reached. `None` for `expected_parent` means "top level" — the
    /// sentinel used to read the document's root element.
    pub fn next_tag(&mut self, expected_parent: Option<TokenId>) -> Result<Option<TokenId>, SyncCoreError> {
        loop {
            match self.next()? {
                WbxmlEvent::StartTag => return Ok(self.tag),
                WbxmlEvent::EndTag => {
                    if expected_parent == self.tag {
                        return Ok(None);
                    }
                }
                WbxmlEvent::EndDocument => {
                    if expected_parent.is_none() {
                        return Ok(None);
                    }
                    return Err(SyncCoreError::protocol("unexpected end of document"));
                }
                WbxmlEvent::Text | WbxmlEvent::Opaque => continue,
            }
        }
    }

    /// Reads the document's root element and fails with `ProtocolError`
    /// unless its name is one of `allowed` (§6: root is always one of
    /// `<Sync>`, `<FolderSync>`, `<Ping>`, ... ; anything else is a protocol
    /// error).
    pub fn expect_root(&mut self, allowed: &[&str]) -> Result<TokenId, SyncCoreError> {
        match self.next_tag(None)? {
            Some(t) if allowed.contains(&t.name().as_str()) => Ok(t),
            Some(t) => Err(SyncCoreError::protocol(format!(
                "unexpected root element <{}>",
                t.name()
            ))),
            None => Err(SyncCoreError::protocol("empty document")),
        }
    }
}

/// Component C: builds a WBXML byte stream from a sequence of
/// `start`/`data`/`end`/`opaque` calls, tracking a current-page cursor and
/// emitting `SWITCH_PAGE` whenever the next tag's page differs.
pub struct Encoder {
    out: BytesMut,
    page: u8,
    pending: Vec<PendingFrame>,
}

struct PendingFrame {
    token: TokenId,
    flushed: bool,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Encoder {
    pub fn new() -> Self {
        let mut out = BytesMut::new();
        out.extend_from_slice(&[0x03, 0x01, 0x6A, 0x00]); // version 1.3, public-id, utf-8, empty string table
        Encoder {
            out,
            page: 0,
            pending: Vec::new(),
        }
    }

    fn flush_parent_as_having_content(&mut self) {
        if let Some(top) = self.pending.last_mut() {
            if !top.flushed {
                let token = top.token;
                top.flushed = true;
                Self::write_tag(&mut self.out, &mut self.page, token, true);
            }
        }
    }

    fn write_tag(out: &mut BytesMut, page: &mut u8, token: TokenId, has_content: bool) {
        if *page != token.page.0 {
            out.extend_from_slice(&[0x00, token.page.0]);
            *page = token.page.0;
        }
        let mut b = token.tag & 0x3F;
        if has_content {
            b |= 0x40;
        }
        out.extend_from_slice(&[b]);
    }

    /// Opens an element. Every element defers its own tag byte until either
    /// a child arrives (has-content set) or `end()` is called with none
    /// (has-content clear, no trailing END byte per §4.C).
    pub fn start(&mut self, token: TokenId) -> Result<(), SyncCoreError> {
        self.flush_parent_as_having_content();
        self.pending.push(PendingFrame {
            token,
            flushed: false,
        });
        Ok(())
    }

    pub fn data(&mut self, text: &str) -> Result<(), SyncCoreError> {
        if self.pending.is_empty() {
            return Err(SyncCoreError::protocol("data() with no open start()"));
        }
        self.flush_parent_as_having_content();
        self.out.extend_from_slice(&[0x03]);
        self.out.extend_from_slice(text.as_bytes());
        self.out.extend_from_slice(&[0x00]);
        Ok(())
    }

    pub fn opaque(&mut self, bytes: &[u8]) -> Result<(), SyncCoreError> {
        if self.pending.is_empty() {
            return Err(SyncCoreError::protocol("opaque() with no open start()"));
        }
        self.flush_parent_as_having_content();
        self.out.extend_from_slice(&[0xC3]);
        write_mb_uint(&mut self.out, bytes.len() as u64);
        self.out.extend_from_slice(bytes);
        Ok(())
    }

    /// Closes the innermost open element. Unmatched `end()` is a
    /// programming error (fail fast) — surfaced as a `ProtocolError` rather
    /// than a panic, since callers are expected to propagate it with `?`.
    pub fn end(&mut self) -> Result<(), SyncCoreError> {
        let frame = self
            .pending
            .pop()
            .ok_or_else(|| SyncCoreError::protocol("end() with no matching start()"))?;
        if frame.flushed {
            self.out.extend_from_slice(&[0x01]);
        } else {
            Self::write_tag(&mut self.out, &mut self.page, frame.token, false);
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, SyncCoreError> {
        if !self.pending.is_empty() {
            return Err(SyncCoreError::protocol("unterminated elements at finish()"));
        }
        Ok(self.out.to_vec())
    }
}

pub(crate) fn read_mb_uint(bytes: &[u8], offset: &mut usize) -> Result<u64, SyncCoreError> {
    let mut value: u64 = 0;
    loop {
        if *offset >= bytes.len() {
            return Err(SyncCoreError::decode("malformed multi-byte uint"));
        }
        let b = bytes[*offset];
        *offset += 1;
        value = (value << 7) | (b & 0x7F) as u64;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok(value)
}

pub(crate) fn write_mb_uint(out: &mut BytesMut, value: u64) {
    let mut groups = vec![(value & 0x7F) as u8];
    let mut v = value >> 7;
    while v > 0 {
        groups.push((v & 0x7F) as u8);
        v >>= 7;
    }
    groups.reverse();
    let last = groups.len() - 1;
    for (i, g) in groups.iter().enumerate() {
        if i < last {
            out.extend_from_slice(&[g | 0x80]);
        } else {
            out.extend_from_slice(&[*g]);
        }
    }
}
