use crate::message::{AttachmentOptions, FileAttachment, Message};
use crate::{HeaderMap, MailModelError};

/// Assembles a message from text/html content, inline parts and
/// attachments. Headers set on the builder (it derefs to a HeaderMap)
/// are carried onto the root of the built message. Date and Message-ID
/// are not the builder's concern; they are injected when the built
/// message is encoded.
#[derive(Default)]
pub struct MessageBuilder<'a> {
    text: Option<String>,
    html: Option<String>,
    headers: HeaderMap<'a>,
    inline: Vec<Message<'a>>,
    attached: Vec<Message<'a>>,
    stable_content_ids: bool,
}

impl<'a> MessageBuilder<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_stable_content_ids(&mut self, v: bool) {
        self.stable_content_ids = v;
    }

    pub fn text_plain(&mut self, text: &str) {
        self.text.replace(text.to_string());
    }

    pub fn text_html(&mut self, html: &str) {
        self.html.replace(html.to_string());
    }

    pub fn attach(&mut self, content_type: &str, data: &[u8], opts: Option<&AttachmentOptions>) {
        let is_inline = opts.map(|opt| opt.inline).unwrap_or(false);

        let part = Message::new_binary(content_type, data, opts);

        if is_inline {
            self.inline.push(part);
        } else {
            self.attached.push(part);
        }
    }

    pub fn attach_file(&mut self, file: FileAttachment) {
        let content_type = file.resolved_content_type();
        self.attach(
            &content_type,
            &file.content,
            Some(&AttachmentOptions {
                file_name: Some(file.file_name),
                inline: false,
                content_id: None,
            }),
        );
    }

    /// Attach an already constructed part, for content that none of
    /// the other methods produce
    pub fn attach_part(&mut self, part: Message<'a>) {
        self.attached.push(part);
    }

    pub fn build(self) -> Result<Message<'a>, MailModelError> {
        let text = self.text.as_deref().map(Message::new_text_plain);
        let html = self.html.as_deref().map(Message::new_html);

        let content_node = match (text, html) {
            (Some(t), Some(h)) => Message::new_multipart(
                "multipart/alternative",
                vec![t, h],
                if self.stable_content_ids {
                    Some("ma-boundary")
                } else {
                    None
                },
            ),
            (Some(t), None) => t,
            (None, Some(h)) => h,
            (None, None) => {
                return Err(MailModelError::BuildError(
                    "no text or html part was specified",
                ))
            }
        };

        let content_node = if !self.inline.is_empty() {
            let mut parts = Vec::with_capacity(self.inline.len() + 1);
            parts.push(content_node);
            parts.extend(self.inline.into_iter());
            Message::new_multipart(
                "multipart/related",
                parts,
                if self.stable_content_ids {
                    Some("mr-boundary")
                } else {
                    None
                },
            )
        } else {
            content_node
        };

        let mut root = if !self.attached.is_empty() {
            let mut parts = Vec::with_capacity(self.attached.len() + 1);
            parts.push(content_node);
            parts.extend(self.attached.into_iter());
            Message::new_multipart(
                "multipart/mixed",
                parts,
                if self.stable_content_ids {
                    Some("mm-boundary")
                } else {
                    None
                },
            )
        } else {
            content_node
        };

        root.headers_mut()
            .headers
            .extend(self.headers.headers.into_iter());

        if root.headers().mime_version()?.is_none() {
            root.headers_mut().set_mime_version("1.0");
        }

        root.set_stable_ids(self.stable_content_ids);

        Ok(root)
    }
}

impl<'a> std::ops::Deref for MessageBuilder<'a> {
    type Target = HeaderMap<'a>;
    fn deref(&self) -> &HeaderMap<'a> {
        &self.headers
    }
}

impl<'a> std::ops::DerefMut for MessageBuilder<'a> {
    fn deref_mut(&mut self) -> &mut HeaderMap<'a> {
        &mut self.headers
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn basic() {
        let mut b = MessageBuilder::new();
        b.set_stable_content_ids(true);
        b.set_subject("Hello there!");
        b.text_plain("This is the body!");
        b.text_html("<b>this is html</b>");
        let msg = b.build().unwrap();
        k9::assert_equal!(
            msg.to_message_string(),
            concat!(
                "Content-Type: multipart/alternative;\r\n",
                "\tboundary=\"ma-boundary\"\r\n",
                "Subject: Hello there!\r\n",
                "Mime-Version: 1.0\r\n",
                "\r\n",
                "--ma-boundary\r\n",
                "Content-Type: text/plain;\r\n",
                "\tcharset=\"us-ascii\"\r\n",
                "\r\n",
                "This is the body!\r\n",
                "--ma-boundary\r\n",
                "Content-Type: text/html;\r\n",
                "\tcharset=\"us-ascii\"\r\n",
                "\r\n",
                "<b>this is html</b>\r\n",
                "--ma-boundary--\r\n",
            )
        );
    }

    #[test]
    fn text_only_builds_a_leaf() {
        let mut b = MessageBuilder::new();
        b.text_plain("just the text");
        let msg = b.build().unwrap();
        assert!(msg.parts().is_empty());
        k9::assert_equal!(msg.decoded().unwrap(), "just the text\n");
        k9::assert_equal!(
            msg.headers().mime_version().unwrap().unwrap(),
            "1.0"
        );
    }

    #[test]
    fn nothing_to_build_is_an_error() {
        let err = MessageBuilder::new().build().unwrap_err();
        k9::assert_equal!(
            err.to_string(),
            "builder: no text or html part was specified"
        );
    }

    #[test]
    fn inline_and_attached_parts_nest_related_inside_mixed() {
        let mut b = MessageBuilder::new();
        b.set_stable_content_ids(true);
        b.set_subject("structure");
        b.text_plain("see the inline image");
        b.attach(
            "image/png",
            &[0x89, b'P', b'N', b'G'],
            Some(&AttachmentOptions {
                file_name: None,
                inline: true,
                content_id: Some("img1".to_string()),
            }),
        );
        b.attach_file(FileAttachment::new("doc.pdf", b"%PDF-1.4".to_vec()));

        let msg = b.build().unwrap();
        k9::assert_equal!(msg.mime_type().unwrap(), "multipart/mixed");
        k9::assert_equal!(msg.parts().len(), 2);

        let related = &msg.parts()[0];
        k9::assert_equal!(related.mime_type().unwrap(), "multipart/related");
        k9::assert_equal!(related.parts().len(), 2);
        k9::assert_equal!(
            related.parts()[0].decoded().unwrap(),
            "see the inline image\n"
        );
        k9::assert_equal!(
            related.parts()[1]
                .headers()
                .content_id()
                .unwrap()
                .unwrap()
                .0,
            "img1"
        );

        let attached = &msg.parts()[1];
        k9::assert_equal!(attached.file_name().unwrap(), "doc.pdf");
        k9::assert_equal!(attached.mime_type().unwrap(), "application/pdf");

        let ct = msg.headers().content_type().unwrap().unwrap();
        k9::assert_equal!(ct.get("boundary").unwrap(), "mm-boundary");
        let ct = related.headers().content_type().unwrap().unwrap();
        k9::assert_equal!(ct.get("boundary").unwrap(), "mr-boundary");
    }

    #[test]
    fn attach_part_carries_prebuilt_content() {
        let mut b = MessageBuilder::new();
        b.text_plain("covering note");
        b.attach_part(Message::new_text("text/csv", "a,b\r\n1,2\r\n"));

        let msg = b.build().unwrap();
        k9::assert_equal!(msg.mime_type().unwrap(), "multipart/mixed");
        k9::assert_equal!(
            msg.parts()[1].decoded().unwrap(),
            "a,b\n1,2\n"
        );
    }

    #[test]
    fn built_messages_encode_with_stable_ids() {
        let mut b = MessageBuilder::new();
        b.set_stable_content_ids(true);
        b.set_subject("ids");
        b.text_plain("body");
        let mut msg = b.build().unwrap();

        let out = msg.encoded().unwrap();
        assert!(out.contains("<stable-message-id@"), "{out}");
        k9::assert_equal!(out, msg.encoded().unwrap());
    }
}
