use crate::headermap::{header_def, EncodeHeaderValue, HeaderKind, HeaderMap};
use crate::rfc5322_parser::{qp_encode, Parser};
use crate::strings::IntoSharedString;
use crate::{
    AddressList, MailModelError, Mailbox, MailboxList, MessageID, MimeParameters, Received, Result,
    SharedString,
};
use bitflags::bitflags;
use chrono::{DateTime, FixedOffset};
use std::str::FromStr;

bitflags! {
    /// Records the ways in which a message deviates from the RFCs.
    /// Parsing is lenient; these flags (together with the warning
    /// strings collected alongside them) are how the damage is
    /// reported to the caller.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct MessageConformance: u16 {
        const MISSING_COLON_VALUE = 1 << 0;
        const NON_CANONICAL_LINE_ENDINGS = 1 << 1;
        const NAME_ENDS_WITH_SPACE = 1 << 2;
        const LINE_TOO_LONG = 1 << 3;
        const NEEDS_TRANSFER_ENCODING = 1 << 4;
        const MISSING_DATE_HEADER = 1 << 5;
        const MISSING_MESSAGE_ID_HEADER = 1 << 6;
        const MISSING_MIME_VERSION = 1 << 7;
        const INVALID_MIME_HEADERS = 1 << 8;
        const NON_ASCII_HEADER = 1 << 9;
    }
}

impl FromStr for MessageConformance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, String> {
        let mut result = Self::default();
        for ele in s.split('|') {
            if ele.is_empty() {
                continue;
            }
            match Self::from_name(ele) {
                Some(v) => {
                    result = result.union(v);
                }
                None => {
                    let possible: Vec<String> = Self::all()
                        .iter_names()
                        .map(|(name, _)| name.to_string())
                        .collect();
                    return Err(format!(
                        "invalid MessageConformance flag '{ele}', possible values are {}",
                        possible.join(", ")
                    ));
                }
            }
        }
        Ok(result)
    }
}

impl ToString for MessageConformance {
    fn to_string(&self) -> String {
        let mut names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        names.sort();
        names.join("|")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header<'a> {
    /// Name half of the field
    name: SharedString<'a>,
    /// Value half of the field, as it appeared in the input
    value: SharedString<'a>,
    /// Separator text sitting between the name and the value
    separator: SharedString<'a>,
    conformance: MessageConformance,
}

/// Result of parsing a run of header lines
#[derive(Debug)]
pub struct HeaderParseResult<'a> {
    pub headers: HeaderMap<'a>,
    pub body_offset: usize,
    pub overall_conformance: MessageConformance,
    /// Notes about lines that had to be discarded or repaired,
    /// in document order
    pub warnings: Vec<String>,
}

impl<'a> Header<'a> {
    pub fn with_name_value<N: Into<SharedString<'a>>, V: Into<SharedString<'a>>>(
        name: N,
        value: V,
    ) -> Self {
        let name = name.into();
        let value = value.into();
        Self {
            name,
            value,
            separator: ": ".into(),
            conformance: MessageConformance::default(),
        }
    }

    pub fn new<N: Into<SharedString<'a>>>(name: N, value: impl EncodeHeaderValue) -> Self {
        let name = name.into();
        let value = value.encode_value();
        Self {
            name,
            value,
            separator: ": ".into(),
            conformance: MessageConformance::default(),
        }
    }

    /// Build a header from a human readable string, wrapping long
    /// values onto folded continuation lines and applying RFC 2047
    /// encoding if the value isn't pure ASCII
    pub fn new_unstructured<N: Into<SharedString<'a>>, V: Into<SharedString<'a>>>(
        name: N,
        value: V,
    ) -> Self {
        let name = name.into();
        let value: SharedString = value.into();

        let value: SharedString = if value.is_ascii() {
            crate::textwrap::wrap(&value).into()
        } else {
            qp_encode(&value).into()
        };

        Self {
            name,
            value,
            separator: ": ".into(),
            conformance: MessageConformance::default(),
        }
    }

    pub fn assign(&mut self, v: impl EncodeHeaderValue) {
        self.value = v.encode_value();
    }

    /// Format the header into the provided output stream, as though
    /// writing it out as part of a mime message
    pub fn write_header<W: std::io::Write>(&self, out: &mut W) -> std::io::Result<()> {
        let line_ending = if self
            .conformance
            .contains(MessageConformance::NON_CANONICAL_LINE_ENDINGS)
        {
            "\n"
        } else {
            "\r\n"
        };
        write!(
            out,
            "{}{}{}{line_ending}",
            self.name, self.separator, self.value
        )
    }

    /// Convenience method for formatting the header as a standalone
    /// string
    pub fn to_header_string(&self) -> String {
        let mut out = vec![];
        self.write_header(&mut out)
            .expect("writing to a Vec always succeeds");
        String::from_utf8_lossy(&out).to_string()
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }

    pub fn get_raw_value(&self) -> &str {
        &self.value
    }

    pub fn conformance(&self) -> MessageConformance {
        self.conformance
    }

    pub fn to_owned(&self) -> Header<'static> {
        Header {
            name: self.name.clone().to_owned(),
            value: self.value.clone().to_owned(),
            separator: self.separator.clone().to_owned(),
            conformance: self.conformance,
        }
    }

    pub fn as_content_transfer_encoding(&self) -> Result<MimeParameters> {
        Parser::parse_token_with_parameters_header(self.get_raw_value())
    }

    pub fn as_content_disposition(&self) -> Result<MimeParameters> {
        Parser::parse_token_with_parameters_header(self.get_raw_value())
    }

    pub fn as_content_type(&self) -> Result<MimeParameters> {
        Parser::parse_content_type_header(self.get_raw_value())
    }

    /// Parse the header into a mailbox-list (as defined in RFC 5322),
    /// which is how the `From` and `Resent-From` headers are defined
    pub fn as_mailbox_list(&self) -> Result<MailboxList> {
        Parser::parse_mailbox_list_header(self.get_raw_value())
    }

    /// Parse the header into a mailbox (as defined in RFC 5322),
    /// which is how the `Sender` and `Resent-Sender` headers are
    /// defined
    pub fn as_mailbox(&self) -> Result<Mailbox> {
        Parser::parse_mailbox_header(self.get_raw_value())
    }

    pub fn as_address_list(&self) -> Result<AddressList> {
        Parser::parse_address_list_header(self.get_raw_value())
    }

    pub fn as_message_id(&self) -> Result<MessageID> {
        Parser::parse_msg_id_header(self.get_raw_value())
    }

    pub fn as_content_id(&self) -> Result<MessageID> {
        Parser::parse_content_id_header(self.get_raw_value())
    }

    pub fn as_message_id_list(&self) -> Result<Vec<MessageID>> {
        Parser::parse_msg_id_header_list(self.get_raw_value())
    }

    pub fn as_keywords(&self) -> Result<Vec<String>> {
        Parser::parse_keywords_header(self.get_raw_value())
    }

    pub fn as_unstructured(&self) -> Result<String> {
        Parser::parse_unstructured_header(self.get_raw_value())
    }

    /// Received is mostly free-form routing information, optionally
    /// terminated by `; date-time`, so it never fails to parse
    pub fn as_received(&self) -> Received {
        Received::from_header_value(self.get_raw_value())
    }

    pub fn as_date(&self) -> Result<DateTime<FixedOffset>> {
        DateTime::parse_from_rfc2822(self.get_raw_value())
            .map_err(|err| MailModelError::ChronoError(err.to_string()))
    }

    /// Re-constitute the header value from its parsed form,
    /// canonicalizing the spacing, quoting and folding.
    /// The stored name decides which grammar applies; unknown names
    /// are treated as unstructured text.
    pub fn rebuild(&self) -> Result<Self> {
        let name = self.get_name();

        let def = header_def(name);
        let kind = def.map(|d| d.kind).unwrap_or(HeaderKind::Unstructured);
        let name = def.map(|d| d.name).unwrap_or(name).to_string();

        let wrap_err = |err: MailModelError| {
            MailModelError::HeaderParse(format!("rebuilding '{}' header: {err}", self.get_name()))
        };

        Ok(match kind {
            HeaderKind::MailboxList => Self::new(name, self.as_mailbox_list().map_err(wrap_err)?),
            HeaderKind::Mailbox => Self::new(name, self.as_mailbox().map_err(wrap_err)?),
            HeaderKind::AddressList => Self::new(name, self.as_address_list().map_err(wrap_err)?),
            HeaderKind::Date => Self::new(name, self.as_date().map_err(wrap_err)?),
            HeaderKind::MessageId => Self::new(name, self.as_message_id().map_err(wrap_err)?),
            HeaderKind::ContentId => Self::new(name, self.as_content_id().map_err(wrap_err)?),
            HeaderKind::MessageIdList => {
                Self::new(name, self.as_message_id_list().map_err(wrap_err)?)
            }
            HeaderKind::ContentType => Self::new(name, self.as_content_type().map_err(wrap_err)?),
            HeaderKind::TokenWithParameters => {
                Self::new(name, self.as_content_disposition().map_err(wrap_err)?)
            }
            HeaderKind::Keywords => Self::new(name, self.as_keywords().map_err(wrap_err)?),
            HeaderKind::Received => Self::new(name, self.as_received()),
            HeaderKind::Unstructured => {
                Self::new_unstructured(name, self.as_unstructured().map_err(wrap_err)?)
            }
        })
    }

    /// Parse the complete header block, stopping at the blank line
    /// that separates it from the body (the returned `body_offset`
    /// points just past that line). Damaged lines are discarded with a
    /// warning rather than failing the parse.
    pub fn parse_headers<S: IntoSharedString<'a>>(header_block: S) -> HeaderParseResult<'a> {
        let (header_block, mut overall_conformance) = header_block.into_shared_string();
        let mut headers = vec![];
        let mut warnings: Vec<String> = vec![];
        let mut idx = 0;

        while idx < header_block.len() {
            let b = header_block[idx];
            if b == b'\n' {
                overall_conformance.set(MessageConformance::NON_CANONICAL_LINE_ENDINGS, true);
                idx += 1;
                break;
            }
            if b == b'\r' && header_block.as_bytes().get(idx + 1) == Some(&b'\n') {
                idx += 2;
                break;
            }
            if (b == b' ' || b == b'\t')
                && whitespace_only_line(header_block.as_bytes(), idx)
            {
                // a separator line padded with whitespace still ends
                // the header block
                idx = match memchr::memchr(b'\n', &header_block.as_bytes()[idx..]) {
                    Some(n) => idx + n + 1,
                    None => header_block.len(),
                };
                break;
            }
            match Self::parse(header_block.slice(idx..header_block.len())) {
                Ok((header, next)) => {
                    debug_assert!(next > 0, "tokenizer must always make progress");
                    if header
                        .conformance
                        .contains(MessageConformance::MISSING_COLON_VALUE)
                    {
                        warnings.push(format!(
                            "could not parse header line {:?}; ignoring it",
                            header.get_name()
                        ));
                        overall_conformance.set(MessageConformance::MISSING_COLON_VALUE, true);
                    } else {
                        if header
                            .conformance
                            .contains(MessageConformance::NON_ASCII_HEADER)
                        {
                            warnings.push(format!(
                                "header {:?} holds non us-ascii octets; keeping them as-is",
                                header.get_name()
                            ));
                        }
                        overall_conformance |= header.conformance;
                        headers.push(header);
                    }
                    idx += next;
                }
                Err(_) => {
                    // parse only fails on an empty slice, which the
                    // loop condition rules out
                    break;
                }
            }
        }
        HeaderParseResult {
            headers: HeaderMap::new(headers),
            body_offset: idx,
            overall_conformance,
            warnings,
        }
    }

    /// Parse a single header starting at the beginning of
    /// `header_block`, consuming any continuation lines folded onto
    /// it. Returns the header and the number of bytes consumed.
    ///
    /// A line that cannot be split into `name: value` (no colon,
    /// whitespace inside the name, control or non-ascii bytes in the
    /// name, or a continuation with no header to continue) is consumed
    /// together with its own continuations and returned with
    /// `MISSING_COLON_VALUE` set and the offending first line as the
    /// name, so that the caller can report and discard it.
    pub fn parse<S: Into<SharedString<'a>>>(header_block: S) -> Result<(Self, usize)> {
        let header_block = header_block.into();

        enum State {
            Initial,
            Name,
            Separator,
            Value,
            NewLine,
            Junk,
            JunkNewLine,
        }

        let mut state = State::Initial;

        let mut iter = header_block.as_bytes().iter();
        let mut c = *iter
            .next()
            .ok_or_else(|| MailModelError::HeaderParse("empty header string".to_string()))?;

        let mut name_end = None;
        let mut value_start = 0;
        let mut value_end = 0;

        let mut idx = 0usize;
        let mut conformance = MessageConformance::default();
        let mut saw_cr = false;
        let mut saw_space_in_name = false;
        let mut line_start = 0;
        let mut max_line_len = 0;
        let mut junk_line_end = None;

        loop {
            match state {
                State::Initial => {
                    state = if c == b' ' || c == b'\t' || c == b'\r' || c == b'\n' {
                        State::Junk
                    } else {
                        State::Name
                    };
                    continue;
                }
                State::Name => {
                    if c == b':' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                        state = State::Separator;
                    } else if c == b' ' || c == b'\t' {
                        if name_end.is_none() {
                            name_end.replace(idx);
                        }
                        conformance.set(MessageConformance::NAME_ENDS_WITH_SPACE, true);
                        saw_space_in_name = true;
                    } else if c == b'\n' {
                        // the line held no colon at all
                        state = State::Junk;
                        continue;
                    } else if c == b'\r' {
                        // allow the CR of a CRLF pair through; the LF
                        // branch above deals with the line
                    } else if (33..=126).contains(&c) {
                        if saw_space_in_name {
                            // name bytes after whitespace: there is no
                            // usable `name:` prefix on this line
                            name_end.take();
                            state = State::Junk;
                            continue;
                        }
                    } else {
                        // control or non-ascii byte in the name
                        name_end.take();
                        state = State::Junk;
                        continue;
                    }
                }
                State::Separator => {
                    if c != b' ' {
                        value_start = idx;
                        value_end = idx;
                        state = State::Value;
                        continue;
                    }
                }
                State::Value => {
                    if c == b'\n' {
                        if !saw_cr {
                            conformance.set(MessageConformance::NON_CANONICAL_LINE_ENDINGS, true);
                        }
                        state = State::NewLine;
                        saw_cr = false;
                    } else if c != b'\r' {
                        value_end = idx + 1;
                        saw_cr = false;
                    } else {
                        saw_cr = true;
                    }
                }
                State::NewLine => {
                    if c == b' ' || c == b'\t' {
                        if whitespace_only_line(header_block.as_bytes(), idx) {
                            // not a continuation: that is the blank
                            // line separating headers from the body
                            break;
                        }
                        state = State::Value;
                        continue;
                    }
                    break;
                }
                State::Junk => {
                    if c == b'\n' {
                        if junk_line_end.is_none() {
                            junk_line_end.replace(trim_cr(header_block.as_bytes(), idx));
                        }
                        state = State::JunkNewLine;
                    }
                }
                State::JunkNewLine => {
                    if c == b' ' || c == b'\t' {
                        if whitespace_only_line(header_block.as_bytes(), idx) {
                            break;
                        }
                        // the junk was folded across multiple lines;
                        // they belong to it, not to the prior header
                        state = State::Junk;
                        continue;
                    }
                    break;
                }
            }

            max_line_len = max_line_len.max(idx.saturating_sub(line_start));
            if c == b'\n' {
                line_start = idx + 1;
            }

            match iter.next() {
                None => {
                    idx += 1;
                    break;
                }
                Some(v) => {
                    idx += 1;
                    c = *v;
                }
            }
        }

        max_line_len = max_line_len.max(idx.saturating_sub(line_start));
        if max_line_len > 78 {
            conformance.set(MessageConformance::LINE_TOO_LONG, true);
        }

        if matches!(state, State::Junk | State::JunkNewLine) || name_end.is_none() {
            conformance.set(MessageConformance::MISSING_COLON_VALUE, true);
            let end =
                junk_line_end.unwrap_or_else(|| trim_cr(header_block.as_bytes(), idx));
            let header = Self {
                name: header_block.slice(0..end),
                value: "".into(),
                separator: "".into(),
                conformance,
            };
            return Ok((header, idx));
        }

        let name_end = name_end.unwrap_or(idx);
        let value = header_block.slice(value_start..value_end.max(value_start));
        if !value.is_ascii() {
            conformance.set(MessageConformance::NON_ASCII_HEADER, true);
        }

        let header = Self {
            name: header_block.slice(0..name_end),
            value,
            separator: header_block.slice(name_end..value_start.max(name_end)),
            conformance,
        };

        Ok((header, idx))
    }
}

fn trim_cr(bytes: &[u8], idx: usize) -> usize {
    if idx > 0 && bytes.get(idx - 1) == Some(&b'\r') {
        idx - 1
    } else {
        idx
    }
}

/// True if the line beginning at `idx` holds nothing but horizontal
/// whitespace before its terminator (or the end of the input)
fn whitespace_only_line(bytes: &[u8], idx: usize) -> bool {
    for &b in &bytes[idx..] {
        match b {
            b' ' | b'\t' | b'\r' => {}
            b'\n' => return true,
            _ => return false,
        }
    }
    true
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::AddrSpec;

    #[test]
    fn construct_and_render() {
        let header = Header::with_name_value("Subject", "hello there");
        k9::assert_equal!(header.to_header_string(), "Subject: hello there\r\n");
    }

    #[test]
    fn parse_basic_block() {
        let result =
            Header::parse_headers("To: mikel\r\nFrom: bob\r\nSubject: Hello!\r\n\r\nemail message\r\n");
        k9::assert_equal!(result.body_offset, 41);
        k9::assert_equal!(result.overall_conformance, MessageConformance::default());
        assert!(result.warnings.is_empty());

        let names: Vec<&str> = result.headers.iter().map(|h| h.get_name()).collect();
        k9::assert_equal!(names, vec!["To", "From", "Subject"]);
        k9::assert_equal!(
            result.headers.get_first("subject").unwrap().get_raw_value(),
            "Hello!"
        );
    }

    #[test]
    fn folded_value() {
        let result = Header::parse_headers("Subject: hello\r\n\tthere\r\n\r\nbody");
        k9::assert_equal!(
            result.headers.get_first("Subject").unwrap().get_raw_value(),
            "hello\r\n\tthere"
        );
        k9::assert_equal!(
            result.headers.get_first("Subject").unwrap().as_unstructured().unwrap(),
            "hello there"
        );
    }

    #[test]
    fn discards_line_without_usable_name() {
        let result = Header::parse_headers(
            "To: mikel\r\nquite Delivered-To: xxx@xxx.xxx\r\nFrom: bob\r\n\r\nbody",
        );
        let names: Vec<&str> = result.headers.iter().map(|h| h.get_name()).collect();
        k9::assert_equal!(names, vec!["To", "From"]);
        assert!(result
            .overall_conformance
            .contains(MessageConformance::MISSING_COLON_VALUE));
        k9::assert_equal!(result.warnings.len(), 1);
        assert!(
            result.warnings[0].contains("quite Delivered-To: xxx@xxx.xxx"),
            "got: {}",
            result.warnings[0]
        );
    }

    #[test]
    fn discards_colonless_line_but_keeps_empty_value() {
        let result = Header::parse_headers("Subject\r\nOther: \r\nTo: bob\r\n\r\n");
        let names: Vec<&str> = result.headers.iter().map(|h| h.get_name()).collect();
        k9::assert_equal!(names, vec!["Other", "To"]);
        // present-with-empty-value is a different state from absent
        k9::assert_equal!(
            result.headers.get_first("Other").unwrap().get_raw_value(),
            ""
        );
        assert!(result.warnings[0].contains("Subject"));
    }

    #[test]
    fn name_with_trailing_space_is_kept() {
        let result = Header::parse_headers("Subject : elevenses\r\n\r\n");
        k9::assert_equal!(
            result.headers.get_first("Subject").unwrap().get_raw_value(),
            "elevenses"
        );
        assert!(result
            .overall_conformance
            .contains(MessageConformance::NAME_ENDS_WITH_SPACE));
    }

    #[test]
    fn whitespace_padded_separator_line() {
        let result = Header::parse_headers("To: mikel\r\n   \t\t  \r\nG'Day!");
        k9::assert_equal!(result.headers.len(), 1);
        k9::assert_equal!(result.body_offset, 20);
    }

    #[test]
    fn orphan_continuation_is_skipped() {
        let result = Header::parse_headers(" folded junk\r\n more junk\r\nTo: bob\r\n\r\n");
        let names: Vec<&str> = result.headers.iter().map(|h| h.get_name()).collect();
        k9::assert_equal!(names, vec!["To"]);
        k9::assert_equal!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("folded junk"));
    }

    #[test]
    fn non_ascii_value_is_kept_with_warning() {
        let result = Header::parse_headers("Subject: Hej då\r\n\r\n");
        k9::assert_equal!(
            result.headers.get_first("Subject").unwrap().get_raw_value(),
            "Hej då"
        );
        assert!(result
            .overall_conformance
            .contains(MessageConformance::NON_ASCII_HEADER));
        k9::assert_equal!(result.warnings.len(), 1);
    }

    #[test]
    fn bare_lf_line_endings() {
        let result = Header::parse_headers("To: bob\nSubject: hi\n\nbody");
        k9::assert_equal!(result.headers.len(), 2);
        assert!(result
            .overall_conformance
            .contains(MessageConformance::NON_CANONICAL_LINE_ENDINGS));
        k9::assert_equal!(result.body_offset, 21);
    }

    #[test]
    fn headers_without_body() {
        let result = Header::parse_headers("To: bob\r\nSubject: hi\r\n");
        k9::assert_equal!(result.headers.len(), 2);
        k9::assert_equal!(result.body_offset, 22);
    }

    #[test]
    fn overlong_line_is_flagged() {
        let long_value = "x".repeat(100);
        let result = Header::parse_headers(format!("Subject: {long_value}\r\n\r\n"));
        assert!(result
            .overall_conformance
            .contains(MessageConformance::LINE_TOO_LONG));
    }

    #[test]
    fn conformance_string() {
        k9::assert_equal!(MessageConformance::default().to_string(), "");
        k9::assert_equal!(
            (MessageConformance::LINE_TOO_LONG | MessageConformance::NEEDS_TRANSFER_ENCODING)
                .to_string(),
            "LINE_TOO_LONG|NEEDS_TRANSFER_ENCODING"
        );
        k9::assert_equal!(
            MessageConformance::from_str("LINE_TOO_LONG|NEEDS_TRANSFER_ENCODING"),
            Ok(MessageConformance::LINE_TOO_LONG | MessageConformance::NEEDS_TRANSFER_ENCODING)
        );
        let err = MessageConformance::from_str("LINE_TOO_LONG|spoon").unwrap_err();
        assert!(err.contains("invalid MessageConformance flag 'spoon'"));
    }

    #[test]
    fn unstructured_encoding() {
        let header = Header::new_unstructured("Subject", "hello there");
        k9::assert_equal!(header.get_raw_value(), "hello there");

        let header = Header::new_unstructured(
            "Subject",
            "The quick brown fox jumps over the lazy dog pack my box with five dozen liquor jugs",
        );
        k9::assert_equal!(
            header.get_raw_value(),
            "The quick brown fox jumps over the lazy dog pack my box with five dozen\r\n\tliquor jugs"
        );

        let header = Header::new_unstructured("Subject", "hello Bjørn");
        k9::assert_equal!(header.get_raw_value(), "=?UTF-8?q?hello_Bj=C3=B8rn?=");
    }

    #[test]
    fn date_header() {
        let header = Header::with_name_value("Date", "Tue, 1 Jul 2003 10:52:37 +0200");
        k9::assert_equal!(
            header.as_date().unwrap().to_rfc2822(),
            "Tue, 1 Jul 2003 10:52:37 +0200"
        );

        let header = Header::with_name_value("Date", "not a date");
        assert!(matches!(
            header.as_date(),
            Err(MailModelError::ChronoError(_))
        ));
    }

    #[test]
    fn assign_typed_value() {
        let mut sender = Header::with_name_value("Sender", "");
        sender.assign(Mailbox {
            name: Some("Rosa Marin".to_string()),
            address: AddrSpec::new("rosa.marin", "example.com"),
        });
        k9::assert_equal!(
            sender.to_header_string(),
            "Sender: Rosa Marin <rosa.marin@example.com>\r\n"
        );

        sender.assign(Mailbox {
            name: Some("Rosa \"the marlin\" Marin".to_string()),
            address: AddrSpec::new("rosa.marin", "example.com"),
        });
        k9::assert_equal!(
            sender.to_header_string(),
            "Sender: \"Rosa \\\"the marlin\\\" Marin\" <rosa.marin@example.com>\r\n"
        );
    }

    #[test]
    fn rebuild_canonicalizes() {
        let header = Header::with_name_value("to", "bob@example.com , sue@example.com");
        let rebuilt = header.rebuild().unwrap();
        k9::assert_equal!(rebuilt.get_name(), "To");
        k9::assert_equal!(
            rebuilt.get_raw_value(),
            "<bob@example.com>,\r\n\t<sue@example.com>"
        );
    }
}
