use crate::{
    AddressList, Header, Mailbox, MailboxList, MessageID, MimeParameters, Received, Result,
    SharedString,
};
use chrono::{DateTime, FixedOffset};

/// Implemented by types that know how to render themselves as a
/// header value in wire format
pub trait EncodeHeaderValue {
    fn encode_value(&self) -> SharedString<'static>;
}

/// Which grammar production applies to a well-known field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderKind {
    MailboxList,
    AddressList,
    Mailbox,
    Date,
    MessageId,
    ContentId,
    MessageIdList,
    ContentType,
    TokenWithParameters,
    Keywords,
    Received,
    Unstructured,
}

pub(crate) struct HeaderDef {
    /// canonical name and casing
    pub name: &'static str,
    pub kind: HeaderKind,
    /// Repeatable fields accumulate on assignment; singletons are
    /// replaced in place
    pub repeatable: bool,
}

/// Dispatch table for the well-known fields. Names not listed here are
/// treated as repeatable unstructured text.
const HEADER_DEFS: &[HeaderDef] = &[
    HeaderDef {
        name: "Bcc",
        kind: HeaderKind::AddressList,
        repeatable: false,
    },
    HeaderDef {
        name: "Cc",
        kind: HeaderKind::AddressList,
        repeatable: false,
    },
    HeaderDef {
        name: "Comments",
        kind: HeaderKind::Unstructured,
        repeatable: true,
    },
    HeaderDef {
        name: "Content-Description",
        kind: HeaderKind::Unstructured,
        repeatable: false,
    },
    HeaderDef {
        name: "Content-Disposition",
        kind: HeaderKind::TokenWithParameters,
        repeatable: false,
    },
    HeaderDef {
        name: "Content-ID",
        kind: HeaderKind::ContentId,
        repeatable: false,
    },
    HeaderDef {
        name: "Content-Transfer-Encoding",
        kind: HeaderKind::TokenWithParameters,
        repeatable: false,
    },
    HeaderDef {
        name: "Content-Type",
        kind: HeaderKind::ContentType,
        repeatable: false,
    },
    HeaderDef {
        name: "Date",
        kind: HeaderKind::Date,
        repeatable: false,
    },
    HeaderDef {
        name: "From",
        kind: HeaderKind::MailboxList,
        repeatable: false,
    },
    HeaderDef {
        name: "In-Reply-To",
        kind: HeaderKind::MessageIdList,
        repeatable: false,
    },
    HeaderDef {
        name: "Keywords",
        kind: HeaderKind::Keywords,
        repeatable: true,
    },
    HeaderDef {
        name: "Message-ID",
        kind: HeaderKind::MessageId,
        repeatable: false,
    },
    HeaderDef {
        name: "Mime-Version",
        kind: HeaderKind::Unstructured,
        repeatable: false,
    },
    HeaderDef {
        name: "Received",
        kind: HeaderKind::Received,
        repeatable: true,
    },
    HeaderDef {
        name: "References",
        kind: HeaderKind::MessageIdList,
        repeatable: false,
    },
    HeaderDef {
        name: "Reply-To",
        kind: HeaderKind::AddressList,
        repeatable: false,
    },
    HeaderDef {
        name: "Resent-Bcc",
        kind: HeaderKind::AddressList,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-Cc",
        kind: HeaderKind::AddressList,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-Date",
        kind: HeaderKind::Date,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-From",
        kind: HeaderKind::MailboxList,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-Message-ID",
        kind: HeaderKind::MessageId,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-Sender",
        kind: HeaderKind::Mailbox,
        repeatable: true,
    },
    HeaderDef {
        name: "Resent-To",
        kind: HeaderKind::AddressList,
        repeatable: true,
    },
    HeaderDef {
        name: "Sender",
        kind: HeaderKind::Mailbox,
        repeatable: false,
    },
    HeaderDef {
        name: "Subject",
        kind: HeaderKind::Unstructured,
        repeatable: false,
    },
    HeaderDef {
        name: "To",
        kind: HeaderKind::AddressList,
        repeatable: false,
    },
];

pub(crate) fn header_def(name: &str) -> Option<&'static HeaderDef> {
    HEADER_DEFS
        .iter()
        .find(|def| def.name.eq_ignore_ascii_case(name))
}

/// An ordered collection of headers. Lookups are case-insensitive but
/// the stored names keep whatever casing they arrived with.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderMap<'a> {
    pub(crate) headers: Vec<Header<'a>>,
}

/// Generates a typed getter/setter pair for a well-known field.
/// The getter returns `Ok(None)` when the field is absent and
/// propagates parse errors when it is present but malformed.
macro_rules! typed_header {
    ($header_name:literal, $getter:ident, unstructured) => {
        pastey::paste! {
            pub fn $getter(&self) -> Result<Option<String>> {
                match self.get_first($header_name) {
                    None => Ok(None),
                    Some(header) => Ok(Some(header.as_unstructured()?)),
                }
            }

            pub fn [<set_ $getter>]<V: Into<SharedString<'a>>>(&mut self, value: V) {
                self.replace_or_append(
                    $header_name,
                    Header::new_unstructured($header_name, value),
                );
            }
        }
    };
    ($header_name:literal, $getter:ident, $as_method:ident, $ty:ty) => {
        pastey::paste! {
            pub fn $getter(&self) -> Result<Option<$ty>> {
                match self.get_first($header_name) {
                    None => Ok(None),
                    Some(header) => Ok(Some(header.$as_method()?)),
                }
            }

            pub fn [<set_ $getter>](&mut self, value: $ty) {
                self.replace_or_append($header_name, Header::new($header_name, value));
            }
        }
    };
}

impl<'a> HeaderMap<'a> {
    pub fn new(headers: Vec<Header<'a>>) -> Self {
        Self { headers }
    }

    pub fn get_first(&self, name: &str) -> Option<&Header<'a>> {
        self.iter_named(name).next()
    }

    pub fn get_last(&self, name: &str) -> Option<&Header<'a>> {
        self.iter_named(name).last()
    }

    pub fn iter_named<'b, 'n>(
        &'b self,
        name: &'n str,
    ) -> impl Iterator<Item = &'b Header<'a>> + use<'a, 'b, 'n> {
        self.headers
            .iter()
            .filter(move |header| header.get_name().eq_ignore_ascii_case(name))
    }

    pub fn remove_all_named(&mut self, name: &str) {
        self.headers
            .retain(|header| !header.get_name().eq_ignore_ascii_case(name));
    }

    /// Assign a raw value to the named field. `None` or an empty
    /// string deletes every occurrence of the field; otherwise the
    /// value is stored verbatim (structured interpretation is applied
    /// lazily when a typed accessor is used)
    pub fn set(&mut self, name: &str, value: Option<&str>) {
        match value {
            None | Some("") => self.remove_all_named(name),
            Some(value) => self.replace_or_append(
                name,
                Header::with_name_value(name.to_string(), value.to_string()),
            ),
        }
    }

    fn replace_or_append(&mut self, name: &str, header: Header<'a>) {
        let repeatable = header_def(name).map(|def| def.repeatable).unwrap_or(true);
        if !repeatable {
            if let Some(idx) = self
                .headers
                .iter()
                .position(|h| h.get_name().eq_ignore_ascii_case(name))
            {
                self.headers[idx] = header;
                // surplus occurrences of a singleton are dropped
                while let Some(dup) = self.headers[idx + 1..]
                    .iter()
                    .position(|h| h.get_name().eq_ignore_ascii_case(name))
                {
                    self.headers.remove(idx + 1 + dup);
                }
                return;
            }
        }
        self.headers.push(header);
    }

    pub fn to_owned(&self) -> HeaderMap<'static> {
        HeaderMap {
            headers: self.headers.iter().map(|header| header.to_owned()).collect(),
        }
    }

    typed_header!("From", from, as_mailbox_list, MailboxList);
    typed_header!("Resent-From", resent_from, as_mailbox_list, MailboxList);
    typed_header!("Reply-To", reply_to, as_address_list, AddressList);
    typed_header!("To", to, as_address_list, AddressList);
    typed_header!("Cc", cc, as_address_list, AddressList);
    typed_header!("Bcc", bcc, as_address_list, AddressList);
    typed_header!("Resent-To", resent_to, as_address_list, AddressList);
    typed_header!("Resent-Cc", resent_cc, as_address_list, AddressList);
    typed_header!("Resent-Bcc", resent_bcc, as_address_list, AddressList);
    typed_header!("Sender", sender, as_mailbox, Mailbox);
    typed_header!("Resent-Sender", resent_sender, as_mailbox, Mailbox);
    typed_header!("Date", date, as_date, DateTime<FixedOffset>);
    typed_header!("Resent-Date", resent_date, as_date, DateTime<FixedOffset>);
    typed_header!("Message-ID", message_id, as_message_id, MessageID);
    typed_header!(
        "Resent-Message-ID",
        resent_message_id,
        as_message_id,
        MessageID
    );
    typed_header!("Content-ID", content_id, as_content_id, MessageID);
    typed_header!("In-Reply-To", in_reply_to, as_message_id_list, Vec<MessageID>);
    typed_header!("References", references, as_message_id_list, Vec<MessageID>);
    typed_header!("Content-Type", content_type, as_content_type, MimeParameters);
    typed_header!(
        "Content-Transfer-Encoding",
        content_transfer_encoding,
        as_content_transfer_encoding,
        MimeParameters
    );
    typed_header!(
        "Content-Disposition",
        content_disposition,
        as_content_disposition,
        MimeParameters
    );
    typed_header!("Keywords", keywords, as_keywords, Vec<String>);
    typed_header!("Subject", subject, unstructured);
    typed_header!("Comments", comments, unstructured);
    typed_header!("Content-Description", content_description, unstructured);
    typed_header!("Mime-Version", mime_version, unstructured);

    /// The first Received header, if any; use `iter_named("Received")`
    /// to walk the full trace
    pub fn received(&self) -> Option<Received> {
        self.get_first("Received").map(|header| header.as_received())
    }
}

impl<'a> std::ops::Deref for HeaderMap<'a> {
    type Target = Vec<Header<'a>>;
    fn deref(&self) -> &Vec<Header<'a>> {
        &self.headers
    }
}

impl<'a> std::ops::DerefMut for HeaderMap<'a> {
    fn deref_mut(&mut self) -> &mut Vec<Header<'a>> {
        &mut self.headers
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_but_casing_is_kept() {
        let map = Header::parse_headers("Subject: hi\r\nX-FOO: bar\r\n\r\n").headers;
        k9::assert_equal!(map.get_first("subject").unwrap().get_raw_value(), "hi");
        k9::assert_equal!(map.get_first("x-foo").unwrap().get_name(), "X-FOO");
        assert!(map.get_first("nope").is_none());
    }

    #[test]
    fn assignment_and_deletion_adjust_the_count() {
        let mut map = HeaderMap::default();
        k9::assert_equal!(map.len(), 0);
        map.set("X-Mailer", Some("mailtool"));
        k9::assert_equal!(map.len(), 1);
        map.set("Subject", Some("hi"));
        k9::assert_equal!(map.len(), 2);
        map.set("Subject", None);
        k9::assert_equal!(map.len(), 1);
        map.set("X-Mailer", Some(""));
        k9::assert_equal!(map.len(), 0);
    }

    #[test]
    fn singleton_assignment_replaces_in_place() {
        let mut map = HeaderMap::default();
        map.set("To", Some("mikel@test.lindsaar.net"));
        map.set("X-Other", Some("fish"));
        map.set("To", Some("bob@test.lindsaar.net"));
        k9::assert_equal!(map.len(), 2);
        // the replacement keeps the original position
        k9::assert_equal!(map[0].get_raw_value(), "bob@test.lindsaar.net");
        k9::assert_equal!(
            map.to().unwrap().unwrap().addresses(),
            vec!["bob@test.lindsaar.net".to_string()]
        );
    }

    #[test]
    fn singleton_duplicates_collapse_on_assignment() {
        let mut map =
            Header::parse_headers("Subject: one\r\nX-Pad: x\r\nSubject: two\r\n\r\n").headers;
        k9::assert_equal!(map.iter_named("Subject").count(), 2);
        map.set_subject("three");
        k9::assert_equal!(map.iter_named("Subject").count(), 1);
        k9::assert_equal!(map.subject().unwrap().unwrap(), "three");
    }

    #[test]
    fn repeatable_fields_accumulate() {
        let mut map = HeaderMap::default();
        map.set(
            "Received",
            Some("from a.example by b.example; Tue, 1 Jul 2003 10:52:37 +0200"),
        );
        map.set(
            "Received",
            Some("from b.example by c.example; Tue, 1 Jul 2003 10:53:02 +0200"),
        );
        k9::assert_equal!(map.iter_named("Received").count(), 2);

        let first = map.received().unwrap();
        k9::assert_equal!(first.info, "from a.example by b.example");
        k9::assert_equal!(
            first.date.unwrap().to_rfc2822(),
            "Tue, 1 Jul 2003 10:52:37 +0200"
        );
    }

    #[test]
    fn unknown_names_accumulate() {
        let mut map = HeaderMap::default();
        map.set("X-SES-Tracking", Some("a"));
        map.set("X-SES-Tracking", Some("b"));
        k9::assert_equal!(map.iter_named("x-ses-tracking").count(), 2);
        map.set("X-SES-Tracking", None);
        k9::assert_equal!(map.len(), 0);
    }

    #[test]
    fn typed_accessors_round_trip() {
        let mut map = HeaderMap::default();

        map.set_subject("Hello!");
        k9::assert_equal!(map.subject().unwrap().unwrap(), "Hello!");

        map.set_message_id(MessageID("1234@example.com".to_string()));
        k9::assert_equal!(
            map.get_first("Message-ID").unwrap().get_raw_value(),
            "<1234@example.com>"
        );
        k9::assert_equal!(
            map.message_id().unwrap().unwrap(),
            MessageID("1234@example.com".to_string())
        );

        map.set_date(DateTime::parse_from_rfc2822("Tue, 1 Jul 2003 10:52:37 +0200").unwrap());
        k9::assert_equal!(
            map.date().unwrap().unwrap().to_rfc2822(),
            "Tue, 1 Jul 2003 10:52:37 +0200"
        );

        map.set_content_type(MimeParameters::new("text/plain"));
        k9::assert_equal!(map.content_type().unwrap().unwrap().value, "text/plain");
        assert!(map.content_disposition().unwrap().is_none());
    }

    #[test]
    fn absent_is_not_the_same_as_empty() {
        let map = Header::parse_headers("Other:\r\n\r\n").headers;
        let header = map.get_first("Other").unwrap();
        k9::assert_equal!(header.get_raw_value(), "");
        assert!(map.get_first("Subject").is_none());
    }

    #[test]
    fn keywords_parse_quoted_phrases() {
        let map =
            Header::parse_headers("Keywords: test, \"of the new mail\", system\r\n\r\n").headers;
        k9::assert_equal!(
            map.keywords().unwrap().unwrap(),
            vec![
                "test".to_string(),
                "of the new mail".to_string(),
                "system".to_string()
            ]
        );
    }
}
