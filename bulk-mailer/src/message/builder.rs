//! Per-recipient message assembly and MIME rendering.

use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::{Address, Message};

use super::template::{render, TemplateValues};
use super::{Attachment, Identity, MessageError, OutboundMessage};
use crate::extract::ValidatedAddress;

/// Builds [`OutboundMessage`]s for one sender.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    sender: Identity,
    values: TemplateValues,
}

impl MessageBuilder {
    pub fn new(sender: Identity, values: TemplateValues) -> Self {
        Self { sender, values }
    }

    pub fn sender(&self) -> &Identity {
        &self.sender
    }

    /// Render `text` against the configured values.
    pub fn render(&self, text: &str) -> String {
        render(text, &self.values)
    }

    /// Build the message for a single recipient.
    ///
    /// Placeholders in both `subject` and `body_template` are substituted.
    /// A missing attachment still yields a complete, sendable message.
    pub fn build(
        &self,
        recipient: &ValidatedAddress,
        subject: &str,
        body_template: &str,
        attachment: Option<&Attachment>,
    ) -> OutboundMessage {
        OutboundMessage {
            sender: self.sender.clone(),
            recipient: recipient.clone(),
            subject: self.render(subject),
            body: self.render(body_template),
            attachment: attachment.cloned(),
        }
    }

    /// Build one message per recipient, in recipient order.
    pub fn build_all(
        &self,
        recipients: &[ValidatedAddress],
        subject: &str,
        body_template: &str,
        attachment: Option<&Attachment>,
    ) -> Vec<OutboundMessage> {
        recipients
            .iter()
            .map(|recipient| self.build(recipient, subject, body_template, attachment))
            .collect()
    }
}

impl OutboundMessage {
    /// Render as a `multipart/mixed` MIME message.
    pub fn to_mime(&self) -> Result<Message, MessageError> {
        let to: Address = self
            .recipient
            .as_str()
            .parse()
            .map_err(|_| MessageError::InvalidAddress(self.recipient.to_string()))?;

        let mut parts = MultiPart::mixed().singlepart(SinglePart::plain(self.body.clone()));

        if let Some(attachment) = &self.attachment {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|_| MessageError::InvalidContentType(attachment.content_type.clone()))?;

            parts = parts.singlepart(
                MimeAttachment::new(attachment.filename.clone())
                    .body(attachment.bytes.to_vec(), content_type),
            );
        }

        Message::builder()
            .from(self.sender.mailbox())
            .to(Mailbox::new(None, to))
            .subject(self.subject.clone())
            .multipart(parts)
            .map_err(|e| MessageError::Build(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailparse::{parse_mail, MailHeaderMap};

    fn builder() -> MessageBuilder {
        let sender = Identity::new("Jane Doe", "jane@example.com").unwrap();
        let values = TemplateValues::new()
            .with("sender_name", "Jane Doe")
            .with("job_title", "Data Engineer");
        MessageBuilder::new(sender, values)
    }

    fn recipient() -> ValidatedAddress {
        ValidatedAddress::parse("Hiring@Company.com").unwrap()
    }

    #[test]
    fn test_build_substitutes_placeholders() {
        let message = builder().build(
            &recipient(),
            "Application for {job_title} Position",
            "Regards, {sender_name}. Ref {unknown}",
            None,
        );

        assert_eq!(message.subject, "Application for Data Engineer Position");
        assert_eq!(message.body, "Regards, Jane Doe. Ref {unknown}");
        assert_eq!(message.recipient(), "Hiring@Company.com");
        assert!(message.attachment.is_none());
    }

    #[test]
    fn test_mime_without_attachment() {
        let message = builder().build(&recipient(), "Hello", "Body text", None);
        let raw = message.to_mime().unwrap().formatted();
        let parsed = parse_mail(&raw).unwrap();

        assert_eq!(parsed.ctype.mimetype, "multipart/mixed");
        assert_eq!(parsed.subparts.len(), 1);
        assert_eq!(parsed.subparts[0].ctype.mimetype, "text/plain");
        assert!(parsed.subparts[0].get_body().unwrap().contains("Body text"));

        let from = parsed.headers.get_first_value("From").unwrap();
        assert!(from.contains("jane@example.com"));
        assert!(from.contains("Jane Doe"));
        assert_eq!(
            parsed.headers.get_first_value("To").unwrap(),
            "Hiring@Company.com"
        );
    }

    #[test]
    fn test_mime_with_attachment() {
        let bytes = vec![0x25, 0x50, 0x44, 0x46, 0x00, 0xFF, 0xFE, 0x0A];
        let attachment = Attachment::new("Jane_CV.pdf", bytes.clone());
        assert_eq!(attachment.content_type, "application/pdf");

        let message = builder().build(&recipient(), "Hello", "See attached", Some(&attachment));
        let raw = message.to_mime().unwrap().formatted();
        let parsed = parse_mail(&raw).unwrap();

        assert_eq!(parsed.subparts.len(), 2);
        let part = &parsed.subparts[1];
        assert_eq!(part.ctype.mimetype, "application/pdf");

        let disposition = part.get_content_disposition();
        assert_eq!(
            disposition.params.get("filename").map(String::as_str),
            Some("Jane_CV.pdf")
        );
        assert_eq!(part.get_body_raw().unwrap(), bytes);
    }

    #[test]
    fn test_bad_content_type_is_reported() {
        let attachment = Attachment::new("cv.pdf", b"x".to_vec()).with_content_type("not a type");
        let message = builder().build(&recipient(), "Hello", "Body", Some(&attachment));

        assert!(matches!(
            message.to_mime(),
            Err(MessageError::InvalidContentType(_))
        ));
    }

    #[test]
    fn test_build_all_keeps_order() {
        let recipients = vec![
            ValidatedAddress::parse("a@x.com").unwrap(),
            ValidatedAddress::parse("b@y.org").unwrap(),
        ];
        let messages = builder().build_all(&recipients, "S", "B", None);

        let order: Vec<&str> = messages.iter().map(|m| m.recipient()).collect();
        assert_eq!(order, vec!["a@x.com", "b@y.org"]);
    }

    #[test]
    fn test_identity_rejects_bad_address() {
        assert!(matches!(
            Identity::new("Nobody", "not-an-address"),
            Err(MessageError::InvalidAddress(_))
        ));
    }
}
