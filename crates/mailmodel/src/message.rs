use crate::header::{HeaderParseResult, MessageConformance};
use crate::headermap::HeaderMap;
use crate::normalize::{has_lone_cr_or_lf, line_endings_to_lf};
use crate::strings::IntoSharedString;
use crate::{Header, MailModelError, MessageID, MimeParameters, Result, SharedString};
use charset::Charset;
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

/// data_encoding::BASE64_MIME refuses embedded spaces, which RFC 2045
/// requires decoders to skip, so we declare a compliant variant here
const BASE64_RFC2045: data_encoding::Encoding = data_encoding_macro::new_encoding! {
    symbols: "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/",
    padding: '=',
    ignore: " \r\n\t",
    wrap_width: 76,
    wrap_separator: "\r\n",
};

/// A parsed message. The root of a parse and every multipart child are
/// the same type; a message is either a leaf with a body or a container
/// with child parts, never both.
#[derive(Debug, Clone)]
pub struct Message<'a> {
    /// The bytes that comprise this message, from its beginning to its end
    bytes: SharedString<'a>,
    /// Headers parsed out of the front of bytes
    headers: HeaderMap<'a>,
    /// The index into bytes of the first non-header byte
    body_offset: usize,
    body_len: usize,
    conformance: MessageConformance,
    parts: Vec<Self>,
    /// The mbox `From addr date` line, top level only
    envelope: Option<MboxEnvelope>,
    /// Advisory notes accumulated while parsing and encoding
    warnings: Vec<String>,
    /// Use fixed rather than random tokens for generated
    /// Message-ID/boundary values
    stable_ids: bool,
}

/// The transfer-encoding and charset situation of a single part,
/// distilled from its Content-* headers
#[derive(PartialEq, Debug)]
pub struct Rfc2045Info {
    pub encoding: ContentTransferEncoding,
    pub charset: Result<Charset>,
    pub content_type: Option<MimeParameters>,
    pub is_text: bool,
    pub is_multipart: bool,
    pub attachment_options: Option<AttachmentOptions>,
    pub is_attachment: bool,
    pub invalid_mime_headers: bool,
}

impl Rfc2045Info {
    // This must be infallible so that a basic mime structure can be
    // examined even if the mime headers are a bit borked
    fn new(headers: &HeaderMap) -> Self {
        let mut invalid_mime_headers = false;
        let encoding = match headers.content_transfer_encoding() {
            // an unrecognized encoding decodes as identity; it isn't
            // a structural error
            Ok(Some(cte)) => ContentTransferEncoding::from_str(&cte.value)
                .unwrap_or(ContentTransferEncoding::SevenBit),
            Ok(None) => ContentTransferEncoding::SevenBit,
            Err(_) => {
                invalid_mime_headers = true;
                ContentTransferEncoding::SevenBit
            }
        };

        let content_type = match headers.content_type() {
            Ok(ct) => ct,
            Err(_) => {
                invalid_mime_headers = true;
                None
            }
        };

        let mut ct_name = None;
        let charset = if let Some(ct) = &content_type {
            ct_name = ct.get("name");
            ct.get("charset")
        } else {
            None
        };
        let charset = charset.unwrap_or_else(|| "us-ascii".to_string());

        let charset = Charset::for_label_no_replacement(charset.as_bytes())
            .ok_or_else(|| MailModelError::BodyParse(format!("unsupported charset {charset}")));

        let (is_text, is_multipart) = if let Some(ct) = &content_type {
            (ct.is_text(), ct.is_multipart())
        } else {
            (true, false)
        };

        let mut inline = false;
        let mut is_attachment = false;
        let mut cd_file_name = None;

        match headers.content_disposition() {
            Ok(Some(cd)) => {
                inline = cd.value.eq_ignore_ascii_case("inline");
                is_attachment = cd.value.eq_ignore_ascii_case("attachment");
                cd_file_name = cd.get("filename");
            }
            Ok(None) => {}
            Err(_) => {
                invalid_mime_headers = true;
            }
        };

        let content_id = match headers.content_id() {
            Ok(cid) => cid.map(|cid| cid.0),
            Err(_) => {
                invalid_mime_headers = true;
                None
            }
        };

        // the Content-Disposition filename wins over the
        // Content-Type name parameter
        let file_name = match (cd_file_name, ct_name) {
            (Some(name), _) | (None, Some(name)) => Some(name),
            (None, None) => None,
        };

        if file_name.is_some() {
            is_attachment = true;
        }

        let attachment_options = if inline || file_name.is_some() || content_id.is_some() {
            Some(AttachmentOptions {
                file_name,
                inline,
                content_id,
            })
        } else {
            None
        };

        Self {
            encoding,
            charset,
            content_type,
            is_text,
            is_multipart,
            attachment_options,
            is_attachment,
            invalid_mime_headers,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_ref()
            .map(|params| params.value.as_str())
    }
}

impl<'a> Message<'a> {
    /// An empty leaf message with no headers and no body
    pub fn new() -> Self {
        Self {
            bytes: "".into(),
            headers: HeaderMap::default(),
            body_offset: 0,
            body_len: 0,
            conformance: MessageConformance::default(),
            parts: vec![],
            envelope: None,
            warnings: vec![],
            stable_ids: false,
        }
    }

    /// Parse some data into a tree of Messages. Damaged input degrades
    /// to warnings and conformance flags; this never fails.
    pub fn parse<S>(bytes: S) -> Self
    where
        S: IntoSharedString<'a>,
    {
        let (mut bytes, base_conformance) = bytes.into_shared_string();
        let mut pre_warnings: Vec<String> = vec![];
        let mut envelope = None;

        if base_conformance.contains(MessageConformance::NEEDS_TRANSFER_ENCODING) {
            pre_warnings
                .push("message bytes are not valid utf-8; replaced the offending sequences".into());
        }

        let skip = {
            let text = bytes.as_str();
            text.len() - text.trim_start_matches(['\r', '\n']).len()
        };
        if skip > 0 {
            let len = bytes.len();
            bytes = bytes.slice(skip..len);
        }

        if let Some((env, consumed)) = MboxEnvelope::extract(bytes.as_str()) {
            if env.date.is_none() {
                pre_warnings.push(format!(
                    "could not parse the timestamp on the mbox envelope line {:?}",
                    env.raw
                ));
            }
            let len = bytes.len();
            bytes = bytes.slice(consumed..len);
            envelope = Some(env);
        }

        let mut msg = Self::parse_impl(bytes, base_conformance, true);
        msg.envelope = envelope;
        for warning in pre_warnings {
            msg.push_warning(warning);
        }
        msg
    }

    fn parse_impl(
        bytes: SharedString<'a>,
        base_conformance: MessageConformance,
        is_top_level: bool,
    ) -> Self {
        let HeaderParseResult {
            headers,
            body_offset,
            overall_conformance: mut conformance,
            warnings,
        } = Header::parse_headers(bytes.clone());

        conformance |= base_conformance;

        let body_len = bytes.len();

        if !bytes.is_ascii() {
            conformance.set(MessageConformance::NEEDS_TRANSFER_ENCODING, true);
        }
        {
            let mut prev = 0;
            for idx in memchr::memchr_iter(b'\n', bytes.as_bytes()) {
                if idx - prev > 78 {
                    conformance.set(MessageConformance::LINE_TOO_LONG, true);
                    break;
                }
                prev = idx;
            }
        }
        conformance.set(
            MessageConformance::NON_CANONICAL_LINE_ENDINGS,
            has_lone_cr_or_lf(bytes.as_bytes()),
        );

        if is_top_level {
            conformance.set(
                MessageConformance::MISSING_DATE_HEADER,
                !matches!(headers.date(), Ok(Some(_))),
            );
            conformance.set(
                MessageConformance::MISSING_MESSAGE_ID_HEADER,
                !matches!(headers.message_id(), Ok(Some(_))),
            );
            conformance.set(
                MessageConformance::MISSING_MIME_VERSION,
                match headers.mime_version() {
                    Ok(Some(v)) => v.as_str() != "1.0",
                    _ => true,
                },
            );
        }

        let mut msg = Self {
            bytes,
            headers,
            body_offset,
            body_len,
            conformance,
            parts: vec![],
            envelope: None,
            warnings,
            stable_ids: false,
        };

        msg.recursive_parse();
        msg
    }

    fn recursive_parse(&mut self) {
        let info = self.rfc2045_info();
        if info.invalid_mime_headers {
            self.conformance |= MessageConformance::INVALID_MIME_HEADERS;
            self.push_warning(
                "MIME structure headers failed to parse; keeping this part as an opaque leaf"
                    .to_string(),
            );
        }

        let Some(ct) = &info.content_type else {
            return;
        };
        if !ct.main_type().eq_ignore_ascii_case("multipart") {
            return;
        }
        let Some(boundary) = ct.get("boundary") else {
            self.push_warning(format!(
                "{} part has no boundary parameter; keeping it as an opaque leaf",
                ct.value
            ));
            return;
        };

        let needle = format!("\n--{boundary}");
        let raw_body = self
            .bytes
            .slice(self.body_offset.saturating_sub(1)..self.bytes.len());

        let mut iter = memchr::memmem::find_iter(raw_body.as_bytes(), &needle);
        let Some(first_boundary_pos) = iter.next() else {
            self.push_warning(format!(
                "the boundary {boundary:?} never occurs in the body; \
                 keeping this part as an opaque leaf"
            ));
            return;
        };

        // the preamble before the first boundary is discarded, and so
        // is the epilogue after the closing one
        self.body_len = 0;

        let mut boundary_end = first_boundary_pos + needle.len();

        while let Some(part_start) = memchr::memchr(b'\n', &raw_body.as_bytes()[boundary_end..])
            .map(|p| p + boundary_end + 1)
        {
            let part_end = iter
                .next()
                .map(|p| {
                    // p lands on the newline, which belongs to this
                    // part's raw bytes, so step past it
                    p + 1
                })
                .unwrap_or(raw_body.len());

            let mut child = Self::parse_impl(
                raw_body.slice(part_start..part_end),
                MessageConformance::default(),
                false,
            );
            self.conformance |= child.conformance;
            self.warnings.append(&mut child.warnings);
            self.parts.push(child);

            boundary_end = part_end -
                1 /* undo the newline folded into part_end above */
                + needle.len();

            if boundary_end + 2 > raw_body.len() {
                break;
            }
            if &raw_body.as_bytes()[boundary_end..boundary_end + 2] == b"--" {
                break;
            }
        }
    }

    /// Deep-copy self into a message with a static lifetime
    pub fn to_owned(&self) -> Message<'static> {
        Message {
            bytes: self.bytes.clone().to_owned(),
            headers: self.headers.to_owned(),
            body_offset: self.body_offset,
            body_len: self.body_len,
            conformance: self.conformance,
            parts: self.parts.iter().map(|p| p.to_owned()).collect(),
            envelope: self.envelope.clone(),
            warnings: self.warnings.clone(),
            stable_ids: self.stable_ids,
        }
    }

    pub fn conformance(&self) -> MessageConformance {
        self.conformance
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    fn push_warning(&mut self, warning: String) {
        tracing::warn!("{warning}");
        self.warnings.push(warning);
    }

    pub fn envelope(&self) -> Option<&MboxEnvelope> {
        self.envelope.as_ref()
    }

    pub fn envelope_from(&self) -> Option<&str> {
        self.envelope.as_ref().map(|env| env.from.as_str())
    }

    pub fn envelope_date(&self) -> Option<DateTime<FixedOffset>> {
        self.envelope.as_ref().and_then(|env| env.date)
    }

    /// Shared access to the child parts
    pub fn parts(&self) -> &[Self] {
        &self.parts
    }

    /// Mutable access to the child parts
    pub fn parts_mut(&mut self) -> &mut Vec<Self> {
        &mut self.parts
    }

    /// Shared access to the headers
    pub fn headers(&self) -> &HeaderMap<'a> {
        &self.headers
    }

    /// Mutable access to the headers
    pub fn headers_mut<'b>(&'b mut self) -> &'b mut HeaderMap<'a> {
        &mut self.headers
    }

    /// The body as it appears on the wire, still transfer-encoded
    pub fn raw_body(&self) -> SharedString<'a> {
        self.bytes
            .slice(self.body_offset..self.body_len.max(self.body_offset))
    }

    /// Replace the body with `text`, stored verbatim as the wire form.
    /// If a Content-Transfer-Encoding is declared on this message,
    /// `text` is assumed to already be encoded under it. Any child
    /// parts are dropped.
    pub fn set_body<S: Into<SharedString<'a>>>(&mut self, text: S) {
        let text = text.into();
        self.body_offset = 0;
        self.body_len = text.len();
        self.bytes = text;
        self.parts.clear();
    }

    pub fn rfc2045_info(&self) -> Rfc2045Info {
        Rfc2045Info::new(&self.headers)
    }

    /// Decode transfer decoding and return the body.
    /// A container has no body of its own; decode its parts instead.
    pub fn body(&self) -> Result<DecodedBody<'a>> {
        if !self.parts.is_empty() {
            return Err(MailModelError::MultipartBodyDecode);
        }
        let info = self.rfc2045_info();

        let bytes = match info.encoding {
            ContentTransferEncoding::Base64 => {
                let data = self.raw_body();
                let bytes = data.as_bytes();
                BASE64_RFC2045.decode(bytes).map_err(|err| {
                    let b = bytes[err.position] as char;
                    let region =
                        &bytes[err.position.saturating_sub(8)..(err.position + 8).min(bytes.len())];
                    let region = String::from_utf8_lossy(region);
                    MailModelError::BodyParse(format!("base64 decode: {err:#} b={b:?} in {region}"))
                })?
            }
            ContentTransferEncoding::QuotedPrintable => quoted_printable::decode(
                self.raw_body().as_bytes(),
                quoted_printable::ParseMode::Robust,
            )
            .map_err(|err| MailModelError::BodyParse(format!("quoted printable decode: {err:#}")))?,
            ContentTransferEncoding::SevenBit
            | ContentTransferEncoding::EightBit
            | ContentTransferEncoding::Binary
                if info.is_text =>
            {
                return Ok(DecodedBody::Text(self.raw_body()));
            }
            ContentTransferEncoding::SevenBit
            | ContentTransferEncoding::EightBit
            | ContentTransferEncoding::Binary => {
                return Ok(DecodedBody::Binary(self.raw_body().as_bytes().to_vec()))
            }
        };

        if info.is_text {
            let (decoded, _malformed) = info.charset?.decode_without_bom_handling(&bytes);
            Ok(DecodedBody::Text(decoded.to_string().into()))
        } else {
            Ok(DecodedBody::Binary(bytes))
        }
    }

    /// The decoded body as text with line endings normalized to `\n`.
    /// Binary bodies are rendered lossily without normalization.
    pub fn decoded(&self) -> Result<String> {
        match self.body()? {
            DecodedBody::Text(text) => Ok(line_endings_to_lf(&text)),
            DecodedBody::Binary(bytes) => Ok(String::from_utf8_lossy(&bytes).to_string()),
        }
    }

    pub fn subject(&self) -> Option<String> {
        self.headers.subject().ok().flatten()
    }

    pub fn mime_type(&self) -> Option<String> {
        self.headers
            .content_type()
            .ok()
            .flatten()
            .map(|ct| ct.value)
    }

    pub fn from_addrs(&self) -> Vec<String> {
        match self.headers.from() {
            Ok(Some(list)) => list.addresses(),
            _ => vec![],
        }
    }

    pub fn to_addrs(&self) -> Vec<String> {
        match self.headers.to() {
            Ok(Some(list)) => list.addresses(),
            _ => vec![],
        }
    }

    pub fn cc_addrs(&self) -> Vec<String> {
        match self.headers.cc() {
            Ok(Some(list)) => list.addresses(),
            _ => vec![],
        }
    }

    pub fn bcc_addrs(&self) -> Vec<String> {
        match self.headers.bcc() {
            Ok(Some(list)) => list.addresses(),
            _ => vec![],
        }
    }

    /// Every To, Cc and Bcc address in that order
    pub fn destinations(&self) -> Vec<String> {
        let mut result = self.to_addrs();
        result.extend(self.cc_addrs());
        result.extend(self.bcc_addrs());
        result
    }

    pub fn has_message_id(&self) -> bool {
        self.headers.get_first("Message-ID").is_some()
    }

    pub fn has_date(&self) -> bool {
        self.headers.get_first("Date").is_some()
    }

    pub fn has_mime_version(&self) -> bool {
        self.headers.get_first("Mime-Version").is_some()
    }

    pub fn has_content_type(&self) -> bool {
        self.headers.get_first("Content-Type").is_some()
    }

    /// Use fixed tokens instead of random ones for the Message-ID and
    /// boundary values generated during encoding, making the output
    /// reproducible
    pub fn set_stable_ids(&mut self, stable: bool) {
        self.stable_ids = stable;
        for part in &mut self.parts {
            part.set_stable_ids(stable);
        }
    }

    /// Inject the deferred default headers and serialize. The injected
    /// values are stored on the message, so encoding again produces
    /// identical output unless the model changed in between.
    pub fn encoded(&mut self) -> Result<String> {
        self.inject_missing_headers();
        let mut out = vec![];
        self.write_message(&mut out)?;
        Ok(String::from_utf8_lossy(&out).to_string())
    }

    fn inject_missing_headers(&mut self) {
        if !self.has_message_id() {
            let token = if self.stable_ids {
                "stable-message-id".to_string()
            } else {
                uuid::Uuid::new_v4().simple().to_string()
            };
            let hostname = gethostname::gethostname().to_string_lossy().to_string();
            self.headers
                .set_message_id(MessageID(format!("{token}@{hostname}.mail")));
        }
        if !self.has_date() {
            self.headers.set_date(chrono::Local::now().fixed_offset());
        }

        self.apply_content_defaults();

        if !self.has_mime_version() && (self.has_mime_headers() || !self.parts.is_empty()) {
            self.headers.set_mime_version("1.0");
        }
    }

    fn has_mime_headers(&self) -> bool {
        self.headers.iter().any(|header| {
            header
                .get_name()
                .get(..8)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("content-"))
        })
    }

    fn apply_content_defaults(&mut self) {
        if self.parts.is_empty() {
            self.apply_leaf_content_defaults();
        } else {
            self.apply_container_content_defaults();
        }
    }

    fn apply_container_content_defaults(&mut self) {
        let mut ct = match self.headers.content_type() {
            Ok(Some(ct)) => ct,
            _ => MimeParameters::new("multipart/mixed"),
        };
        if ct.get("boundary").is_none() {
            let boundary = if self.stable_ids {
                "stable-boundary".to_string()
            } else {
                let uuid = uuid::Uuid::new_v4();
                data_encoding::BASE64_NOPAD.encode(uuid.as_bytes())
            };
            ct.set("boundary", &boundary);
            // only rewrite the header when we had to generate a
            // boundary; an already-complete Content-Type is preserved
            // byte for byte
            self.headers.set_content_type(ct);
        }

        for part in &mut self.parts {
            part.stable_ids = self.stable_ids;
            part.apply_content_defaults();
        }
    }

    fn apply_leaf_content_defaults(&mut self) {
        let body_is_ascii = match self.body() {
            Ok(DecodedBody::Text(text)) => text.is_ascii(),
            Ok(DecodedBody::Binary(bytes)) => bytes.iter().all(|b| b.is_ascii()),
            // if the body fails to decode, judge the wire form instead
            Err(_) => self.raw_body().is_ascii(),
        };

        let explicit_charset = match self.headers.content_type() {
            Ok(Some(ct)) => ct.get("charset").is_some(),
            _ => false,
        };

        let is_attachment = self.rfc2045_info().is_attachment;

        match self.headers.content_type() {
            Ok(Some(mut ct)) => {
                if ct.is_text() && !body_is_ascii && ct.get("charset").is_none() {
                    let warning = format!("assuming UTF-8 for the {} body", ct.value);
                    ct.set("charset", "UTF-8");
                    self.headers.set_content_type(ct);
                    self.push_warning(warning);
                }
            }
            Ok(None) => {
                let mut ct = MimeParameters::new("text/plain");
                if !is_attachment {
                    if body_is_ascii {
                        ct.set("charset", "us-ascii");
                    } else {
                        ct.set("charset", "UTF-8");
                        self.push_warning("assuming UTF-8 for the text/plain body".to_string());
                    }
                }
                self.headers.set_content_type(ct);
            }
            // an unparseable Content-Type is left alone rather than
            // silently overwritten
            Err(_) => {}
        }

        if matches!(self.headers.content_transfer_encoding(), Ok(None)) {
            if body_is_ascii {
                self.headers
                    .set_content_transfer_encoding(MimeParameters::new("7bit"));
            } else {
                self.headers
                    .set_content_transfer_encoding(MimeParameters::new("8bit"));
                if !explicit_charset {
                    self.push_warning(
                        "using 8bit transfer encoding for a body that is not pure ascii"
                            .to_string(),
                    );
                }
            }
        }
    }

    /// Serialize the message to the supplied writer
    pub fn write_message<W: std::io::Write>(&self, out: &mut W) -> Result<()> {
        let line_ending = if self
            .conformance
            .contains(MessageConformance::NON_CANONICAL_LINE_ENDINGS)
        {
            "\n"
        } else {
            "\r\n"
        };

        for hdr in self.headers.iter() {
            hdr.write_header(out)
                .map_err(|_| MailModelError::WriteMessageIOError)?;
        }
        out.write_all(line_ending.as_bytes())
            .map_err(|_| MailModelError::WriteMessageIOError)?;

        if self.parts.is_empty() {
            out.write_all(self.raw_body().as_bytes())
                .map_err(|_| MailModelError::WriteMessageIOError)?;
        } else {
            let boundary = self
                .headers
                .content_type()
                .ok()
                .flatten()
                .and_then(|ct| ct.get("boundary"))
                .ok_or(MailModelError::MissingBoundary)?;
            for p in &self.parts {
                write!(out, "--{boundary}{line_ending}")
                    .map_err(|_| MailModelError::WriteMessageIOError)?;
                p.write_message(out)?;
            }
            write!(out, "--{boundary}--{line_ending}")
                .map_err(|_| MailModelError::WriteMessageIOError)?;
        }
        Ok(())
    }

    /// Convenience method wrapping write_message that returns the
    /// formatted message as a standalone string. Panics only when the
    /// tree is multipart without a boundary; use write_message to
    /// handle that case, or encoded() to have a boundary generated.
    pub fn to_message_string(&self) -> String {
        let mut out = vec![];
        self.write_message(&mut out).unwrap();
        String::from_utf8_lossy(&out).to_string()
    }

    /// Parse each element of the message and assemble a fresh copy
    /// from the parsed forms. Non-conforming elements come out
    /// normalized, at the price of dropping anything that could not
    /// be represented canonically.
    pub fn rebuild(&self) -> Result<Self> {
        let info = self.rfc2045_info();

        let mut children = vec![];
        for part in &self.parts {
            children.push(part.rebuild()?);
        }

        let mut rebuilt = if children.is_empty() {
            match self.body()? {
                DecodedBody::Text(text) => {
                    let ct = info
                        .content_type
                        .as_ref()
                        .map(|ct| ct.value.as_str())
                        .unwrap_or("text/plain");
                    Self::new_text(ct, text.as_str())
                }
                DecodedBody::Binary(data) => {
                    let ct = info
                        .content_type
                        .as_ref()
                        .map(|ct| ct.value.as_str())
                        .unwrap_or("application/octet-stream");
                    Self::new_binary(ct, &data, info.attachment_options.as_ref())
                }
            }
        } else {
            let ct = info.content_type.ok_or_else(|| {
                MailModelError::BodyParse(
                    "multipart message has no content-type information".to_string(),
                )
            })?;
            Self::new_multipart(&ct.value, children, ct.get("boundary").as_deref())
        };

        for hdr in self.headers.iter() {
            let name = hdr.get_name();
            if name.eq_ignore_ascii_case("Content-ID") {
                continue;
            }

            // Merge in any MimeParameters that we might otherwise have
            // lost in the rebuild
            if name.eq_ignore_ascii_case("Content-Type") {
                if let Ok(params) = hdr.as_content_type() {
                    let Some(mut dest) = rebuilt.headers_mut().content_type()? else {
                        continue;
                    };
                    for (k, v) in params.parameter_map() {
                        if dest.get(&k).is_none() {
                            dest.set(&k, &v);
                        }
                    }
                    rebuilt.headers_mut().set_content_type(dest);
                }
                continue;
            }
            if name.eq_ignore_ascii_case("Content-Transfer-Encoding") {
                if let Ok(params) = hdr.as_content_transfer_encoding() {
                    let Some(mut dest) = rebuilt.headers_mut().content_transfer_encoding()? else {
                        continue;
                    };
                    for (k, v) in params.parameter_map() {
                        if dest.get(&k).is_none() {
                            dest.set(&k, &v);
                        }
                    }
                    rebuilt.headers_mut().set_content_transfer_encoding(dest);
                }
                continue;
            }
            if name.eq_ignore_ascii_case("Content-Disposition") {
                if let Ok(params) = hdr.as_content_disposition() {
                    let Some(mut dest) = rebuilt.headers_mut().content_disposition()? else {
                        continue;
                    };
                    for (k, v) in params.parameter_map() {
                        if dest.get(&k).is_none() {
                            dest.set(&k, &v);
                        }
                    }
                    rebuilt.headers_mut().set_content_disposition(dest);
                }
                continue;
            }

            if let Ok(hdr) = hdr.rebuild() {
                rebuilt.headers_mut().push(hdr);
            }
        }

        Ok(rebuilt)
    }

    /// Build a new part holding utf8 text content.
    /// quoted-printable transfer encoding will be applied, unless it is
    /// smaller to represent the text in base64
    pub fn new_text(content_type: &str, content: &str) -> Self {
        let qp_encoded = quoted_printable::encode_to_str(content);

        let (mut encoded, encoding) = if qp_encoded == content {
            (qp_encoded, None)
        } else if qp_encoded.len() <= BASE64_RFC2045.encode_len(content.len()) {
            (qp_encoded, Some("quoted-printable"))
        } else {
            // base64 will be smaller; perhaps the content is dominated
            // by non-ASCII text?
            (BASE64_RFC2045.encode(content.as_bytes()), Some("base64"))
        };

        if !encoded.ends_with("\r\n") {
            encoded.push_str("\r\n");
        }

        let mut headers = HeaderMap::default();
        let mut ct = MimeParameters::new(content_type);
        ct.set(
            "charset",
            if content.is_ascii() {
                "us-ascii"
            } else {
                "utf-8"
            },
        );
        headers.set_content_type(ct);

        if let Some(encoding) = encoding {
            headers.set_content_transfer_encoding(MimeParameters::new(encoding));
        }

        let body_len = encoded.len();

        Self {
            bytes: encoded.into(),
            headers,
            body_offset: 0,
            body_len,
            conformance: MessageConformance::default(),
            parts: vec![],
            envelope: None,
            warnings: vec![],
            stable_ids: false,
        }
    }

    pub fn new_text_plain(content: &str) -> Self {
        Self::new_text("text/plain", content)
    }

    pub fn new_html(content: &str) -> Self {
        Self::new_text("text/html", content)
    }

    pub fn new_multipart(content_type: &str, parts: Vec<Self>, boundary: Option<&str>) -> Self {
        let mut headers = HeaderMap::default();

        let mut ct = MimeParameters::new(content_type);
        match boundary {
            Some(b) => {
                ct.set("boundary", b);
            }
            None => {
                // Random boundary for this container
                let uuid = uuid::Uuid::new_v4();
                let boundary = data_encoding::BASE64_NOPAD.encode(uuid.as_bytes());
                ct.set("boundary", &boundary);
            }
        }
        headers.set_content_type(ct);

        Self {
            bytes: "".into(),
            headers,
            body_offset: 0,
            body_len: 0,
            conformance: MessageConformance::default(),
            parts,
            envelope: None,
            warnings: vec![],
            stable_ids: false,
        }
    }

    pub fn new_binary(
        content_type: &str,
        content: &[u8],
        options: Option<&AttachmentOptions>,
    ) -> Self {
        let mut encoded = BASE64_RFC2045.encode(content);
        if !encoded.ends_with("\r\n") {
            encoded.push_str("\r\n");
        }
        let mut headers = HeaderMap::default();

        let mut ct = MimeParameters::new(content_type);

        if let Some(opts) = options {
            let mut cd = MimeParameters::new(if opts.inline { "inline" } else { "attachment" });
            if let Some(name) = &opts.file_name {
                cd.set("filename", name);
                ct.set("name", name);
            }
            headers.set_content_disposition(cd);

            if let Some(id) = &opts.content_id {
                headers.set_content_id(MessageID(id.to_string()));
            }
        }

        headers.set_content_type(ct);
        headers.set_content_transfer_encoding(MimeParameters::new("base64"));

        let body_len = encoded.len();

        Self {
            bytes: encoded.into(),
            headers,
            body_offset: 0,
            body_len,
            conformance: MessageConformance::default(),
            parts: vec![],
            envelope: None,
            warnings: vec![],
            stable_ids: false,
        }
    }

    /// The first non-attachment text/plain leaf, depth first.
    /// A leaf without a Content-Type counts as text/plain.
    pub fn text_part(&self) -> Option<&Self> {
        self.find_part_of_type("text/plain")
    }

    /// The first non-attachment text/html leaf, depth first
    pub fn html_part(&self) -> Option<&Self> {
        self.find_part_of_type("text/html")
    }

    /// Replace the first text/plain leaf, or add one, promoting a
    /// plain message to multipart/alternative as needed
    pub fn set_text_part(&mut self, content: &str) {
        self.set_alternative_part("text/plain", content);
    }

    /// Replace the first text/html leaf, or add one, promoting a
    /// plain message to multipart/alternative as needed
    pub fn set_html_part(&mut self, content: &str) {
        self.set_alternative_part("text/html", content);
    }

    fn set_alternative_part(&mut self, content_type: &str, content: &str) {
        let new_part = Self::new_text(content_type, content);

        if self.parts.is_empty() {
            if self.part_matches_type(content_type) {
                self.replace_body_from(new_part);
            } else {
                self.promote_to_multipart("multipart/alternative");
                self.parts.push(new_part);
            }
            return;
        }

        match self.find_ptr_of_type(content_type, PartPointer::root()) {
            Some(ptr) => {
                if let Some(part) = self.resolve_ptr_mut(ptr) {
                    part.replace_body_from(new_part);
                }
            }
            None => self.parts.push(new_part),
        }
    }

    fn part_matches_type(&self, content_type: &str) -> bool {
        match self.headers.content_type() {
            Ok(Some(ct)) => ct.value.eq_ignore_ascii_case(content_type),
            // a part without a Content-Type is implicitly text/plain
            Ok(None) => content_type.eq_ignore_ascii_case("text/plain"),
            Err(_) => false,
        }
    }

    fn find_part_of_type(&self, content_type: &str) -> Option<&Self> {
        let ptr = self.find_ptr_of_type(content_type, PartPointer::root())?;
        self.resolve_ptr(ptr)
    }

    fn find_ptr_of_type(&self, content_type: &str, my_ptr: PartPointer) -> Option<PartPointer> {
        if self.parts.is_empty() {
            if !self.rfc2045_info().is_attachment && self.part_matches_type(content_type) {
                return Some(my_ptr);
            }
            return None;
        }
        for (i, part) in self.parts.iter().enumerate() {
            let Ok(idx) = u8::try_from(i) else {
                break;
            };
            if let Some(found) =
                part.find_ptr_of_type(content_type, my_ptr.clone().append(PartPointer::nth(idx)))
            {
                return Some(found);
            }
        }
        None
    }

    /// Resolve a PartPointer to the corresponding part
    pub fn resolve_ptr(&self, ptr: PartPointer) -> Option<&Self> {
        let mut current = self;
        let mut cursor = ptr.0.as_slice();

        loop {
            match cursor.first() {
                Some(&idx) => {
                    current = current.parts.get(idx as usize)?;
                    cursor = &cursor[1..];
                }
                None => {
                    return Some(current);
                }
            }
        }
    }

    /// Resolve a PartPointer to the corresponding part, for mutable access
    pub fn resolve_ptr_mut(&mut self, ptr: PartPointer) -> Option<&mut Self> {
        let mut current = self;
        let mut cursor = ptr.0.as_slice();

        loop {
            match cursor.first() {
                Some(&idx) => {
                    current = current.parts.get_mut(idx as usize)?;
                    cursor = &cursor[1..];
                }
                None => {
                    return Some(current);
                }
            }
        }
    }

    /// Take this leaf's body and content headers and return them as a
    /// new child-ready part, leaving the headers that describe the
    /// message rather than the content
    fn take_body_as_part(&mut self) -> Self {
        let raw = self.raw_body();
        let body_len = raw.len();

        let structural = |name: &str| {
            name.eq_ignore_ascii_case("Content-Type")
                || name.eq_ignore_ascii_case("Content-Transfer-Encoding")
                || name.eq_ignore_ascii_case("Content-Disposition")
        };
        let (moved, kept): (Vec<_>, Vec<_>) = self
            .headers
            .headers
            .drain(..)
            .partition(|header| structural(header.get_name()));
        self.headers.headers = kept;

        self.bytes = "".into();
        self.body_offset = 0;
        self.body_len = 0;

        Self {
            bytes: raw,
            headers: HeaderMap::new(moved),
            body_offset: 0,
            body_len,
            conformance: MessageConformance::default(),
            parts: vec![],
            envelope: None,
            warnings: vec![],
            stable_ids: self.stable_ids,
        }
    }

    /// Turn this leaf into a container of the given multipart type.
    /// An existing body (or explicit Content-Type) moves into the
    /// first child part.
    fn promote_to_multipart(&mut self, content_type: &str) {
        if !self.raw_body().is_empty() || self.has_content_type() {
            let part = self.take_body_as_part();
            self.parts.push(part);
        }
        self.headers
            .set_content_type(MimeParameters::new(content_type));
        self.headers.remove_all_named("Content-Transfer-Encoding");
    }

    fn replace_body_from(&mut self, mut new_part: Self) {
        self.bytes = new_part.bytes;
        self.body_offset = new_part.body_offset;
        self.body_len = new_part.body_len;
        // Replace the headers that reflect how the content is encoded.
        // Note that we preserve Content-Disposition as that isn't
        // related purely to how the content is encoded
        self.headers.remove_all_named("Content-Type");
        self.headers.remove_all_named("Content-Transfer-Encoding");
        self.headers.append(&mut new_part.headers.headers);
    }

    /// Append a file as a base64 attachment part. A plain body becomes
    /// the first part of a multipart/mixed container.
    pub fn add_file(&mut self, file: FileAttachment) -> Result<()> {
        if self.parts.len() >= 255 {
            return Err(MailModelError::TooManyParts);
        }
        let content_type = file.resolved_content_type();
        let part = Self::new_binary(
            &content_type,
            &file.content,
            Some(&AttachmentOptions {
                file_name: Some(file.file_name.clone()),
                inline: false,
                content_id: None,
            }),
        );
        if self.parts.is_empty() {
            self.promote_to_multipart("multipart/mixed");
        }
        self.parts.push(part);
        Ok(())
    }

    pub fn is_attachment(&self) -> bool {
        self.rfc2045_info().is_attachment
    }

    /// The filename recorded on this part, Content-Disposition
    /// filename first, Content-Type name as the fallback
    pub fn file_name(&self) -> Option<String> {
        self.rfc2045_info()
            .attachment_options
            .and_then(|opts| opts.file_name)
    }

    pub fn has_attachments(&self) -> bool {
        !self.attachments().is_empty()
    }

    /// Every attachment leaf in depth-first order, descending into
    /// encapsulated message/rfc822 bodies
    pub fn attachments(&self) -> Vec<Message<'static>> {
        let mut found = vec![];
        self.collect_attachments(&mut found);
        found
    }

    fn collect_attachments(&self, found: &mut Vec<Message<'static>>) {
        for part in &self.parts {
            if !part.parts.is_empty() {
                part.collect_attachments(found);
                continue;
            }
            if part.is_attachment() {
                found.push(part.to_owned());
            }
            let encapsulated = match part.headers.content_type() {
                Ok(Some(ct)) => {
                    ct.value.eq_ignore_ascii_case("message/rfc822")
                        || ct.value.eq_ignore_ascii_case("text/rfc822-headers")
                }
                _ => false,
            };
            if encapsulated {
                if let Ok(body) = part.body() {
                    let inner = Message::parse(body.to_string_lossy().to_string());
                    inner.collect_attachments(found);
                }
            }
        }
    }
}

impl Default for Message<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Messages compare structurally, with one exception: a Message-ID
/// that is absent on either side is ignored, since it is injected
/// during encoding and would make a built message compare unequal to
/// its own parsed output.
impl PartialEq for Message<'_> {
    fn eq(&self, other: &Self) -> bool {
        let my_id = self.headers.get_first("Message-ID");
        let other_id = other.headers.get_first("Message-ID");
        if let (Some(mine), Some(theirs)) = (&my_id, &other_id) {
            if mine.get_raw_value() != theirs.get_raw_value() {
                return false;
            }
        }

        fn named_values(map: &HeaderMap) -> Vec<(String, String)> {
            map.iter()
                .filter(|h| !h.get_name().eq_ignore_ascii_case("Message-ID"))
                .map(|h| (h.get_name().to_ascii_lowercase(), h.get_raw_value().to_string()))
                .collect()
        }

        named_values(&self.headers) == named_values(&other.headers)
            && self.raw_body() == other.raw_body()
            && self.parts == other.parts
    }
}

/// Messages order chronologically by their Date header; messages
/// without a parseable Date are unordered
impl PartialOrd for Message<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        match (self.headers.date(), other.headers.date()) {
            (Ok(Some(mine)), Ok(Some(theirs))) => mine.partial_cmp(&theirs),
            _ => None,
        }
    }
}

/// References the position of a part by encoding the steps in a tree
/// walking operation: a sequence of child indices, selecting the
/// current node when no more indices remain. `[]` is the root, `[0]`
/// the 0th child of the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPointer(Vec<u8>);

impl PartPointer {
    /// A PartPointer addressing the root of the tree
    pub fn root() -> Self {
        Self(vec![])
    }

    /// A PartPointer addressing the nth immediate child
    pub fn nth(n: u8) -> Self {
        Self(vec![n])
    }

    /// Join other onto self, consuming self and producing a pointer
    /// that makes other relative to self
    pub fn append(mut self, mut other: Self) -> Self {
        self.0.append(&mut other.0);
        Self(self.0)
    }
}

/// The mbox mailbox format prefixes each message with a
/// `From addr ctime-date` line that is not part of the message proper
#[derive(Debug, Clone, PartialEq)]
pub struct MboxEnvelope {
    pub from: String,
    pub date: Option<DateTime<FixedOffset>>,
    /// The envelope line as it appeared, without the `From ` prefix
    pub raw: String,
}

impl MboxEnvelope {
    /// Recognize a leading envelope line. Returns the envelope and the
    /// offset just past its terminating newline. The date is parsed
    /// best-effort; an unreadable date leaves `date` unset rather than
    /// rejecting the envelope.
    fn extract(text: &str) -> Option<(Self, usize)> {
        let rest = text.strip_prefix("From ")?;
        let line_end = memchr::memchr(b'\n', rest.as_bytes())?;
        let line = rest[..line_end].trim_end_matches('\r');

        let mut fields = line.split_whitespace();
        let from = fields.next()?.to_string();
        if from.contains(':') {
            // "From : value" is a damaged header, not an envelope
            return None;
        }

        let date_text = fields.collect::<Vec<_>>().join(" ");
        let date = NaiveDateTime::parse_from_str(&date_text, "%a %b %e %H:%M:%S %Y")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset());

        Some((
            Self {
                from,
                date,
                raw: line.to_string(),
            },
            "From ".len() + line_end + 1,
        ))
    }
}

/// How a part is presented: as an attachment (with an optional
/// filename) or inline (with an optional content id for cid:
/// references)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AttachmentOptions {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub inline: bool,
    #[serde(default)]
    pub content_id: Option<String>,
}

/// A file to be attached: a name, the raw bytes, and optionally an
/// explicit content type. When no type is given one is inferred from
/// the file extension, then from the content, with
/// application/octet-stream as the last resort.
#[derive(Debug, Clone, PartialEq)]
pub struct FileAttachment {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: Option<String>,
}

impl FileAttachment {
    pub fn new<N: Into<String>>(file_name: N, content: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content,
            content_type: None,
        }
    }

    /// Read the file eagerly; the attachment carries only the name and
    /// the bytes, never the path
    pub fn from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path)
            .map_err(|err| MailModelError::FileRead(format!("{}: {err:#}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self {
            file_name,
            content,
            content_type: None,
        })
    }

    pub fn with_content_type<S: Into<String>>(mut self, content_type: S) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub(crate) fn resolved_content_type(&self) -> String {
        if let Some(explicit) = &self.content_type {
            return explicit.to_string();
        }
        if let Some((_, extension)) = self.file_name.rsplit_once('.') {
            if let Some(file_type) = file_type::FileType::from_extension(extension).first() {
                if let Some(media_type) = file_type.media_types().first() {
                    return media_type.to_string();
                }
            }
        }
        if let Some(media_type) = file_type::FileType::from_bytes(&self.content)
            .media_types()
            .first()
        {
            return media_type.to_string();
        }
        "application/octet-stream".to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentTransferEncoding {
    SevenBit,
    EightBit,
    Binary,
    QuotedPrintable,
    Base64,
}

impl FromStr for ContentTransferEncoding {
    type Err = MailModelError;

    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("7bit") {
            Ok(Self::SevenBit)
        } else if s.eq_ignore_ascii_case("8bit") {
            Ok(Self::EightBit)
        } else if s.eq_ignore_ascii_case("binary") {
            Ok(Self::Binary)
        } else if s.eq_ignore_ascii_case("quoted-printable") {
            Ok(Self::QuotedPrintable)
        } else if s.eq_ignore_ascii_case("base64") {
            Ok(Self::Base64)
        } else {
            Err(MailModelError::InvalidContentTransferEncoding(
                s.to_string(),
            ))
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum DecodedBody<'a> {
    Text(SharedString<'a>),
    Binary(Vec<u8>),
}

impl<'a> DecodedBody<'a> {
    pub fn to_string_lossy(&'a self) -> Cow<'a, str> {
        match self {
            Self::Text(s) => Cow::Borrowed(s),
            Self::Binary(b) => String::from_utf8_lossy(b),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_simple_message() {
        let message = "To: mikel\r\nFrom: bob\r\nSubject: Hello!\r\n\r\nemail message\r\n";
        let msg = Message::parse(message);

        k9::assert_equal!(msg.to_addrs(), vec!["mikel".to_string()]);
        k9::assert_equal!(msg.from_addrs(), vec!["bob".to_string()]);
        k9::assert_equal!(msg.subject().unwrap(), "Hello!");
        k9::assert_equal!(msg.decoded().unwrap(), "email message\n");
        k9::assert_equal!(
            msg.conformance().to_string(),
            "MISSING_DATE_HEADER|MISSING_MESSAGE_ID_HEADER|MISSING_MIME_VERSION"
        );
    }

    #[test]
    fn round_trips_bare_lf_endings() {
        let message = concat!(
            "Subject: hello there\n",
            "From:  Someone <someone@example.com>\n",
            "\n",
            "I am the body"
        );

        let msg = Message::parse(message);
        k9::assert_equal!(message, msg.to_message_string());
        k9::assert_equal!(msg.raw_body(), "I am the body");
        k9::assert_equal!(msg.body().unwrap(), DecodedBody::Text("I am the body".into()));
        assert!(msg
            .conformance()
            .contains(MessageConformance::NON_CANONICAL_LINE_ENDINGS));
    }

    #[test]
    fn base64_body_decodes() {
        let message = concat!(
            "Subject: hello there\r\n",
            "Content-Type: text/plain\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "aGVsbG8K\r\n"
        );

        let msg = Message::parse(message);
        k9::assert_equal!(msg.raw_body(), "aGVsbG8K\r\n");
        k9::assert_equal!(msg.body().unwrap(), DecodedBody::Text("hello\n".into()));
    }

    #[test]
    fn bogus_base64_body_reports_the_damage() {
        let message = concat!(
            "Content-Type: text/plain\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "hello\r\n"
        );

        let err = Message::parse(message).body().unwrap_err().to_string();
        assert!(err.contains("base64 decode"), "{err}");
    }

    #[test]
    fn qp_and_base64_codecs_are_inverses() {
        let qp_message = concat!(
            "Content-Type: text/plain; charset=us-ascii\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "The=3Dbody\r\n"
        );
        k9::assert_equal!(Message::parse(qp_message).decoded().unwrap(), "The=body\n");

        let b64_message = concat!(
            "Content-Type: text/plain; charset=us-ascii\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "VGhlIGJvZHk=\r\n"
        );
        k9::assert_equal!(Message::parse(b64_message).decoded().unwrap(), "The body");

        // encode side picks an encoding and decodes back to the input
        let content = "Hello Øyvind, here is a Euro: €\r\n";
        let part = Message::new_text_plain(content);
        k9::assert_equal!(part.body().unwrap(), DecodedBody::Text(content.into()));

        // identity encodings pass through untouched
        let plain = Message::parse("Content-Transfer-Encoding: 8bit\r\n\r\nno codec\r\n");
        k9::assert_equal!(plain.decoded().unwrap(), "no codec\n");
    }

    #[test]
    fn unknown_transfer_encoding_is_identity_without_warnings() {
        let message = concat!(
            "Subject: x\r\n",
            "Content-Transfer-Encoding: x-uuencode\r\n",
            "\r\n",
            "raw payload\r\n"
        );
        let msg = Message::parse(message);
        k9::assert_equal!(msg.body().unwrap(), DecodedBody::Text("raw payload\r\n".into()));
        assert!(msg.warnings().is_empty(), "{:?}", msg.warnings());
        assert!(!msg
            .conformance()
            .contains(MessageConformance::INVALID_MIME_HEADERS));
    }

    #[test]
    fn multipart_parses_and_round_trips() {
        let message = concat!(
            "Subject: This is a test email\r\n",
            "Content-Type: multipart/alternative; boundary=foobar\r\n",
            "Mime-Version: 1.0\r\n",
            "Date: Sun, 2 Oct 2016 07:06:22 -0700\r\n",
            "\r\n",
            "--foobar\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "Plain text rendition in utf-8. Currency sanity check: =E2=82=AC\r\n",
            "--foobar\r\n",
            "Content-Type: text/html\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "PGh0bWw+PGJvZHk+SGVyZSBpcyB0aGUgPGI+SFRNTDwvYj4gcmVuZGl0aW9uLCBp\r\n",
            "biB1cy1hc2NpaS4gQ3VycmVuY3kgc2FuaXR5IGNoZWNrOiAmZXVybzs8L2JvZHk+\r\n",
            "PC9odG1sPgo=\r\n",
            "--foobar--\r\n",
        );

        let msg = Message::parse(message);
        k9::assert_equal!(message, msg.to_message_string());

        let children = msg.parts();
        k9::assert_equal!(children.len(), 2);
        k9::assert_equal!(
            children[0].body().unwrap(),
            DecodedBody::Text("Plain text rendition in utf-8. Currency sanity check: €\r\n".into())
        );
        k9::assert_equal!(
            children[1].body().unwrap(),
            DecodedBody::Text(
                "<html><body>Here is the <b>HTML</b> rendition, in us-ascii. \
                 Currency sanity check: &euro;</body></html>\n"
                    .into()
            )
        );

        k9::assert_equal!(
            msg.decoded().unwrap_err(),
            MailModelError::MultipartBodyDecode
        );
    }

    #[test]
    fn preamble_and_epilogue_are_discarded() {
        let message = concat!(
            "Content-Type: multipart/mixed; boundary=xyz\r\n",
            "\r\n",
            "This preamble should vanish\r\n",
            "--xyz\r\n",
            "\r\n",
            "part one\r\n",
            "--xyz--\r\n",
            "And this epilogue too\r\n",
        );

        let msg = Message::parse(message);
        k9::assert_equal!(msg.parts().len(), 1);
        k9::assert_equal!(msg.parts()[0].raw_body(), "part one\r\n");

        let out = msg.to_message_string();
        assert!(!out.contains("preamble should vanish"));
        assert!(!out.contains("epilogue too"));
    }

    #[test]
    fn multipart_without_boundary_degrades_to_a_leaf() {
        let message = "Content-Type: multipart/mixed\r\nSubject: x\r\n\r\nopaque body\r\n";
        let msg = Message::parse(message);
        assert!(msg.parts().is_empty());
        assert!(msg.warnings().iter().any(|w| w.contains("boundary")), "{:?}", msg.warnings());

        let message = concat!(
            "Content-Type: multipart/mixed; boundary=zzz\r\n",
            "\r\n",
            "the boundary never shows up\r\n"
        );
        let msg = Message::parse(message);
        assert!(msg.parts().is_empty());
        assert!(msg.warnings().iter().any(|w| w.contains("never occurs")));
    }

    #[test]
    fn envelope_is_stripped_and_exposed() {
        let message = concat!(
            "From mikel@test.lindsaar.net Mon Aug 17 00:39:21 2009\r\n",
            "From: Mikel <mikel@test.lindsaar.net>\r\n",
            "Subject: Re: root\r\n",
            "\r\n",
            "Hello\r\n",
        );

        let msg = Message::parse(message);
        k9::assert_equal!(msg.envelope_from().unwrap(), "mikel@test.lindsaar.net");
        k9::assert_equal!(
            msg.envelope_date().unwrap().to_rfc2822(),
            "Mon, 17 Aug 2009 00:39:21 +0000"
        );
        k9::assert_equal!(msg.from_addrs(), vec!["mikel@test.lindsaar.net".to_string()]);
        k9::assert_equal!(msg.decoded().unwrap(), "Hello\n");
    }

    #[test]
    fn envelope_with_unreadable_date_degrades() {
        let message = "From bounce@example.com with no usable date\r\nTo: bob\r\n\r\nhi\r\n";
        let msg = Message::parse(message);
        k9::assert_equal!(msg.envelope_from().unwrap(), "bounce@example.com");
        assert!(msg.envelope_date().is_none());
        assert!(msg.warnings().iter().any(|w| w.contains("mbox envelope")));
        k9::assert_equal!(msg.to_addrs(), vec!["bob".to_string()]);
    }

    #[test]
    fn from_header_is_not_mistaken_for_an_envelope() {
        let msg = Message::parse("From: sender@example.com\r\n\r\nbody\r\n");
        assert!(msg.envelope().is_none());
        k9::assert_equal!(msg.from_addrs(), vec!["sender@example.com".to_string()]);
    }

    #[test]
    fn encoding_injects_defaults_once_and_is_idempotent() {
        let mut msg = Message::new();
        msg.headers_mut().set("From", Some("bob@example.com"));
        msg.headers_mut().set("To", Some("sue@example.com"));
        msg.headers_mut().set_subject("Hello!");
        msg.set_body("This is a test email\r\n");

        assert!(!msg.has_message_id());
        assert!(!msg.has_date());
        assert!(!msg.has_content_type());

        let first = msg.encoded().unwrap();
        assert!(msg.has_message_id());
        assert!(msg.has_date());
        assert!(msg.has_content_type());
        assert!(msg.has_mime_version());

        k9::assert_equal!(first.matches("Message-ID:").count(), 1);
        k9::assert_equal!(first.matches("Date:").count(), 1);
        assert!(first.contains("Content-Type: text/plain;"));
        assert!(first.contains("charset=\"us-ascii\""));
        assert!(first.contains("Content-Transfer-Encoding: 7bit"));
        assert!(first.contains("Mime-Version: 1.0"));

        let second = msg.encoded().unwrap();
        k9::assert_equal!(first, second);
    }

    #[test]
    fn complete_input_encodes_to_itself() {
        let original = concat!(
            "From: Mikel Lindsaar <mikel@test.lindsaar.net>\r\n",
            "To: bob@test.lindsaar.net\r\n",
            "Subject: Re: Test\r\n",
            "Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n",
            "Message-ID: <1234@test.lindsaar.net>\r\n",
            "Mime-Version: 1.0\r\n",
            "Content-Type: text/plain; charset=us-ascii\r\n",
            "Content-Transfer-Encoding: 7bit\r\n",
            "\r\n",
            "This is a reply\r\n",
        );

        let mut msg = Message::parse(original);
        let encoded = msg.encoded().unwrap();
        k9::assert_equal!(encoded.as_str(), original);

        let reparsed = Message::parse(encoded.as_str());
        k9::assert_equal!(reparsed, msg);
    }

    #[test]
    fn equality_ignores_an_absent_message_id() {
        let base = "Subject: hi\r\nTo: bob\r\n\r\nSame body\r\n";
        let with_id = "Subject: hi\r\nTo: bob\r\nMessage-ID: <one@example.com>\r\n\r\nSame body\r\n";
        let with_other_id =
            "Subject: hi\r\nTo: bob\r\nMessage-ID: <two@example.com>\r\n\r\nSame body\r\n";

        let a = Message::parse(base);
        let b = Message::parse(with_id);
        let c = Message::parse(with_other_id);

        k9::assert_equal!(a, b);
        k9::assert_equal!(a, c);
        assert!(b != c);
        k9::assert_equal!(b, Message::parse(with_id));

        let different = Message::parse("Subject: bye\r\nTo: bob\r\n\r\nSame body\r\n");
        assert!(a != different);
    }

    #[test]
    fn add_file_promotes_to_multipart_mixed() {
        let mut msg = Message::parse("Subject: files\r\nTo: bob\r\n\r\nSee attached.\r\n");
        msg.add_file(FileAttachment::new("notes.txt", b"some notes\n".to_vec()))
            .unwrap();
        msg.add_file(FileAttachment::new("pixel.png", vec![0x89, b'P', b'N', b'G']))
            .unwrap();

        let ct = msg.headers().content_type().unwrap().unwrap();
        k9::assert_equal!(ct.value, "multipart/mixed");
        k9::assert_equal!(msg.parts().len(), 3);
        k9::assert_equal!(msg.parts()[0].raw_body(), "See attached.\r\n");

        let attached = msg.attachments();
        k9::assert_equal!(attached.len(), 2);
        k9::assert_equal!(attached[0].file_name().unwrap(), "notes.txt");
        k9::assert_equal!(attached[1].file_name().unwrap(), "pixel.png");
        k9::assert_equal!(
            attached[0].headers().content_type().unwrap().unwrap().value,
            "text/plain"
        );
        k9::assert_equal!(
            attached[1].headers().content_type().unwrap().unwrap().value,
            "image/png"
        );
        k9::assert_equal!(
            attached[0].body().unwrap(),
            DecodedBody::Text("some notes\n".into())
        );
        k9::assert_equal!(
            attached[1].body().unwrap(),
            DecodedBody::Binary(vec![0x89, b'P', b'N', b'G'])
        );
        assert!(msg.has_attachments());

        let out = msg.encoded().unwrap();
        assert!(out.contains("boundary="));
        assert!(out.contains("Content-Disposition: attachment;"));
    }

    #[test]
    fn text_and_html_parts_promote_to_alternative() {
        let mut msg = Message::parse("From: a@b.example\r\nSubject: alt\r\n\r\nplain old body\r\n");
        assert!(msg.html_part().is_none());
        k9::assert_equal!(msg.text_part().unwrap().raw_body(), "plain old body\r\n");

        msg.set_html_part("<b>rich</b> body");
        let ct = msg.headers().content_type().unwrap().unwrap();
        k9::assert_equal!(ct.value, "multipart/alternative");
        k9::assert_equal!(msg.parts().len(), 2);
        k9::assert_equal!(msg.parts()[0].raw_body(), "plain old body\r\n");
        k9::assert_equal!(
            msg.html_part().unwrap().decoded().unwrap(),
            "<b>rich</b> body\n"
        );

        msg.set_text_part("replacement text");
        k9::assert_equal!(msg.parts().len(), 2);
        k9::assert_equal!(
            msg.text_part().unwrap().decoded().unwrap(),
            "replacement text\n"
        );

        // a fresh leaf takes the text straight into its own body
        let mut simple = Message::new();
        simple.set_text_part("just text");
        assert!(simple.parts().is_empty());
        k9::assert_equal!(simple.decoded().unwrap(), "just text\n");
    }

    #[test]
    fn stable_ids_make_encoding_reproducible() {
        let mut msg = Message::new();
        msg.headers_mut().set("To", Some("bob@example.com"));
        msg.set_text_part("plain");
        msg.set_html_part("<i>html</i>");
        msg.set_stable_ids(true);

        let out = msg.encoded().unwrap();
        assert!(out.contains("<stable-message-id@"), "{out}");
        assert!(out.contains("boundary=\"stable-boundary\""), "{out}");
        k9::assert_equal!(out, msg.encoded().unwrap());
    }

    #[test]
    fn rebuild_canonicalizes_structure() {
        let message = concat!(
            "Subject: hello there\n",
            "From: Someone <someone@example.com>\n",
            "\n",
            "I am the body"
        );

        let rebuilt = Message::parse(message).rebuild().unwrap();
        k9::assert_equal!(
            rebuilt.to_message_string(),
            concat!(
                "Content-Type: text/plain;\r\n",
                "\tcharset=\"us-ascii\"\r\n",
                "Subject: hello there\r\n",
                "From: Someone <someone@example.com>\r\n",
                "\r\n",
                "I am the body\r\n",
            )
        );
    }

    #[test]
    fn construct_multipart_with_attachment() {
        let msg = Message::new_multipart(
            "multipart/mixed",
            vec![
                Message::new_text_plain("plain text"),
                Message::new_html("<b>rich</b> text"),
                Message::new_binary(
                    "application/octet-stream",
                    &[0, 1, 2, 3],
                    Some(&AttachmentOptions {
                        file_name: Some("woot.bin".to_string()),
                        inline: false,
                        content_id: Some("woot.id".to_string()),
                    }),
                ),
            ],
            Some("my-boundary"),
        );
        k9::assert_equal!(
            msg.to_message_string(),
            concat!(
                "Content-Type: multipart/mixed;\r\n",
                "\tboundary=\"my-boundary\"\r\n",
                "\r\n",
                "--my-boundary\r\n",
                "Content-Type: text/plain;\r\n",
                "\tcharset=\"us-ascii\"\r\n",
                "\r\n",
                "plain text\r\n",
                "--my-boundary\r\n",
                "Content-Type: text/html;\r\n",
                "\tcharset=\"us-ascii\"\r\n",
                "\r\n",
                "<b>rich</b> text\r\n",
                "--my-boundary\r\n",
                "Content-Disposition: attachment;\r\n",
                "\tfilename=\"woot.bin\"\r\n",
                "Content-ID: <woot.id>\r\n",
                "Content-Type: application/octet-stream;\r\n",
                "\tname=\"woot.bin\"\r\n",
                "Content-Transfer-Encoding: base64\r\n",
                "\r\n",
                "AAECAw==\r\n",
                "--my-boundary--\r\n",
            )
        );
    }

    #[test]
    fn attachments_descend_into_encapsulated_messages() {
        let mut inner = Message::parse("Subject: inner\r\nTo: x@example.com\r\n\r\nInner body\r\n");
        inner
            .add_file(FileAttachment::new("inner.txt", b"nested attachment".to_vec()))
            .unwrap();
        let inner_text = inner.encoded().unwrap();

        let mut outer = Message::parse("Subject: outer\r\nTo: y@example.com\r\n\r\nOuter body\r\n");
        outer
            .add_file(FileAttachment::new("direct.txt", b"direct".to_vec()))
            .unwrap();

        let mut wrapper = Message::new();
        wrapper
            .headers_mut()
            .set("Content-Type", Some("message/rfc822"));
        wrapper.set_body(inner_text);
        outer.parts_mut().push(wrapper);

        let attached = outer.attachments();
        k9::assert_equal!(attached.len(), 2);
        k9::assert_equal!(attached[0].file_name().unwrap(), "direct.txt");
        k9::assert_equal!(attached[1].file_name().unwrap(), "inner.txt");
    }

    #[test]
    fn overlong_lines_are_flagged() {
        let long_line = "x".repeat(100);
        let msg = Message::parse(format!("Subject: ok\r\n\r\n{long_line}\r\n"));
        assert!(msg.conformance().contains(MessageConformance::LINE_TOO_LONG));
    }

    #[test]
    fn to_owned_detaches_from_the_source_buffer() {
        let owned: Message<'static> = {
            let text = String::from("Subject: scoped\r\n\r\nshort lived\r\n");
            let msg = Message::parse(text.as_str());
            msg.to_owned()
        };
        k9::assert_equal!(owned.subject().unwrap(), "scoped");
        k9::assert_equal!(owned.decoded().unwrap(), "short lived\n");
    }

    #[test]
    fn messages_order_by_date() {
        let earlier = Message::parse("Date: Mon, 2 Mar 2020 10:00:00 +0000\r\n\r\n");
        let later = Message::parse("Date: Mon, 2 Mar 2020 11:00:00 +0000\r\n\r\n");
        assert!(earlier < later);

        let undated = Message::parse("Subject: none\r\n\r\n");
        k9::assert_equal!(undated.partial_cmp(&earlier), None);
    }

    #[test]
    fn mbox_envelope_date_with_padded_day() {
        let message = "From sam@example.com Sat Jun  7 05:37:48 2008\r\nTo: x\r\n\r\n.\r\n";
        let msg = Message::parse(message);
        k9::assert_equal!(
            msg.envelope_date().unwrap().to_rfc2822(),
            "Sat, 7 Jun 2008 05:37:48 +0000"
        );
    }
}
