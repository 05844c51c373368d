//! Parses RFC 3464 delivery status reports out of a message
use crate::header::{Header, HeaderParseResult};
use crate::message::Message;
use crate::{MailModelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ReportAction {
    Failed,
    Delayed,
    Delivered,
    Relayed,
    Expanded,
}

impl FromStr for ReportAction {
    type Err = MailModelError;
    fn from_str(input: &str) -> Result<Self> {
        Ok(match input {
            "failed" => Self::Failed,
            "delayed" => Self::Delayed,
            "delivered" => Self::Delivered,
            "relayed" => Self::Relayed,
            "expanded" => Self::Expanded,
            _ => {
                return Err(MailModelError::DeliveryStatusParse(format!(
                    "invalid action type {input}"
                )))
            }
        })
    }
}

/// The `class.subject.detail` status code from RFC 3463, with the
/// optional trailing comment preserved
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct ReportStatus {
    pub class: u8,
    pub subject: u16,
    pub detail: u16,
    pub comment: Option<String>,
}

impl FromStr for ReportStatus {
    type Err = MailModelError;
    fn from_str(input: &str) -> Result<Self> {
        let invalid = || MailModelError::DeliveryStatusParse(format!("invalid Status: {input}"));

        let mut parts: Vec<_> = input.split(' ').collect();

        let mut status = parts[0].split('.');
        let class = status.next().ok_or_else(invalid)?.parse().map_err(|err| {
            MailModelError::DeliveryStatusParse(format!("parsing status.class: {err}"))
        })?;
        let subject = status.next().ok_or_else(invalid)?.parse().map_err(|err| {
            MailModelError::DeliveryStatusParse(format!("parsing status.subject: {err}"))
        })?;
        let detail = status.next().ok_or_else(invalid)?.parse().map_err(|err| {
            MailModelError::DeliveryStatusParse(format!("parsing status.detail: {err}"))
        })?;

        parts.remove(0);
        let comment = if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        };

        Ok(Self {
            class,
            subject,
            detail,
            comment,
        })
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(fmt, "{}.{}.{}", self.class, self.subject, self.detail)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct RemoteMta {
    pub mta_type: String,
    pub name: String,
}

impl FromStr for RemoteMta {
    type Err = MailModelError;

    fn from_str(input: &str) -> Result<Self> {
        let (mta_type, name) = input.split_once(';').ok_or_else(|| {
            MailModelError::DeliveryStatusParse(format!("expected 'name-type; name', got {input}"))
        })?;
        Ok(Self {
            mta_type: mta_type.trim().to_string(),
            name: name.trim().to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct Recipient {
    pub recipient_type: String,
    pub recipient: String,
}
impl FromStr for Recipient {
    type Err = MailModelError;
    fn from_str(input: &str) -> Result<Self> {
        let (recipient_type, recipient) = input.split_once(';').ok_or_else(|| {
            MailModelError::DeliveryStatusParse(format!(
                "expected 'recipient-type; recipient', got {input}"
            ))
        })?;
        Ok(Self {
            recipient_type: recipient_type.trim().to_string(),
            recipient: recipient.trim().to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct DiagnosticCode {
    pub diagnostic_type: String,
    pub diagnostic: String,
}
impl FromStr for DiagnosticCode {
    type Err = MailModelError;
    fn from_str(input: &str) -> Result<Self> {
        let (diagnostic_type, diagnostic) = input.split_once(';').ok_or_else(|| {
            MailModelError::DeliveryStatusParse(format!(
                "expected 'diagnostic-type; diagnostic', got {input}"
            ))
        })?;
        Ok(Self {
            diagnostic_type: diagnostic_type.trim().to_string(),
            diagnostic: diagnostic.trim().to_string(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct PerRecipientReportEntry {
    pub final_recipient: Recipient,
    pub action: ReportAction,
    pub status: ReportStatus,
    pub original_recipient: Option<Recipient>,
    pub remote_mta: Option<RemoteMta>,
    pub diagnostic_code: Option<DiagnosticCode>,
    pub last_attempt_date: Option<DateTime<Utc>>,
    pub final_log_id: Option<String>,
    pub will_retry_until: Option<DateTime<Utc>>,
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl PerRecipientReportEntry {
    fn parse(part: &str) -> Result<Self> {
        let mut extensions = extract_headers(part.as_bytes())?;

        let original_recipient = extract_single("original-recipient", &mut extensions)?;
        let final_recipient = extract_single_req("final-recipient", &mut extensions)?;
        let remote_mta = extract_single("remote-mta", &mut extensions)?;

        let last_attempt_date = extract_single_conv::<DateTimeRfc2822, DateTime<Utc>>(
            "last-attempt-date",
            &mut extensions,
        )?;
        let will_retry_until = extract_single_conv::<DateTimeRfc2822, DateTime<Utc>>(
            "will-retry-until",
            &mut extensions,
        )?;
        let final_log_id = extract_single("final-log-id", &mut extensions)?;

        let action = extract_single_req("action", &mut extensions)?;
        let status = extract_single_req("status", &mut extensions)?;
        let diagnostic_code = extract_single("diagnostic-code", &mut extensions)?;

        Ok(Self {
            final_recipient,
            action,
            status,
            diagnostic_code,
            original_recipient,
            remote_mta,
            last_attempt_date,
            final_log_id,
            will_retry_until,
            extensions,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct PerMessageReportEntry {
    pub original_envelope_id: Option<String>,
    pub reporting_mta: RemoteMta,
    pub dsn_gateway: Option<RemoteMta>,
    pub received_from_mta: Option<RemoteMta>,
    pub arrival_date: Option<DateTime<Utc>>,
    pub extensions: BTreeMap<String, Vec<String>>,
}

impl PerMessageReportEntry {
    fn parse(part: &str) -> Result<Self> {
        let mut extensions = extract_headers(part.as_bytes())?;

        let reporting_mta = extract_single_req("reporting-mta", &mut extensions)?;
        let original_envelope_id = extract_single("original-envelope-id", &mut extensions)?;
        let dsn_gateway = extract_single("dsn-gateway", &mut extensions)?;
        let received_from_mta = extract_single("received-from-mta", &mut extensions)?;

        let arrival_date =
            extract_single_conv::<DateTimeRfc2822, DateTime<Utc>>("arrival-date", &mut extensions)?;

        Ok(Self {
            original_envelope_id,
            reporting_mta,
            dsn_gateway,
            received_from_mta,
            arrival_date,
            extensions,
        })
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct Report {
    pub per_message: PerMessageReportEntry,
    pub per_recipient: Vec<PerRecipientReportEntry>,
    pub original_message: Option<String>,
}

impl Report {
    /// Parse a delivery status report out of raw message bytes.
    /// Returns None when the input is not a multipart/report message
    pub fn parse(input: &[u8]) -> Result<Option<Self>> {
        Self::from_message(&Message::parse(input))
    }

    /// Extract a delivery status report from an already parsed
    /// message. Returns None when the message is not multipart/report;
    /// a multipart/report without a delivery-status part is an error.
    pub fn from_message(mail: &Message) -> Result<Option<Self>> {
        if !mail.is_multipart_report() {
            return Ok(None);
        }

        let mut original_message = None;

        for part in mail.parts() {
            let ct = part.mime_type();
            let ct = ct.as_deref();
            if ct == Some("message/rfc822") || ct == Some("text/rfc822-headers") {
                original_message = Some(part.raw_body().replace("\r\n", "\n"));
            }
        }

        match mail.delivery_status_part() {
            Some(part) => Ok(Some(Self::parse_inner(part, original_message)?)),
            None => Err(MailModelError::DeliveryStatusParse(
                "delivery-status part missing".to_string(),
            )),
        }
    }

    fn parse_inner(part: &Message, original_message: Option<String>) -> Result<Self> {
        let body = part.body()?.to_string_lossy().replace("\r\n", "\n");
        let mut parts = body.trim().split("\n\n");

        let per_message = parts.next().ok_or_else(|| {
            MailModelError::DeliveryStatusParse("missing per-message section".to_string())
        })?;
        let per_message = PerMessageReportEntry::parse(per_message)?;
        let mut per_recipient = vec![];
        while let Some(part) = parts.next() {
            let part = PerRecipientReportEntry::parse(part)?;
            per_recipient.push(part);
        }

        Ok(Self {
            per_message,
            per_recipient,
            original_message,
        })
    }
}

impl<'a> Message<'a> {
    pub fn is_multipart_report(&self) -> bool {
        self.mime_type().as_deref() == Some("multipart/report")
    }

    pub fn is_delivery_status_report(&self) -> bool {
        self.is_multipart_report()
            && self
                .headers()
                .content_type()
                .ok()
                .flatten()
                .and_then(|ct| ct.get("report-type"))
                .as_deref()
                == Some("delivery-status")
    }

    /// The first child with a message/delivery-status (or its
    /// internationalized variant) content type
    pub fn delivery_status_part(&self) -> Option<&Self> {
        self.parts().iter().find(|part| {
            matches!(
                part.mime_type().as_deref(),
                Some("message/delivery-status") | Some("message/global-delivery-status")
            )
        })
    }

    /// The typed report carried by this message, when there is one.
    /// Reports that fail to parse read as absent.
    pub fn delivery_status(&self) -> Option<Report> {
        Report::from_message(self).ok().flatten()
    }

    fn first_recipient_entry(&self) -> Option<PerRecipientReportEntry> {
        self.delivery_status()?.per_recipient.into_iter().next()
    }

    /// True when this message reports a delivery failure
    pub fn bounced(&self) -> bool {
        self.action() == Some(ReportAction::Failed)
    }

    /// True when the reported status is transient (class 4); a
    /// permanent failure or the absence of a report reads as false
    pub fn retryable(&self) -> bool {
        self.error_status()
            .map_or(false, |status| status.class == 4)
    }

    pub fn action(&self) -> Option<ReportAction> {
        self.first_recipient_entry().map(|entry| entry.action)
    }

    pub fn final_recipient(&self) -> Option<Recipient> {
        self.first_recipient_entry()
            .map(|entry| entry.final_recipient)
    }

    pub fn error_status(&self) -> Option<ReportStatus> {
        self.first_recipient_entry().map(|entry| entry.status)
    }

    pub fn diagnostic_code(&self) -> Option<DiagnosticCode> {
        self.first_recipient_entry()
            .and_then(|entry| entry.diagnostic_code)
    }

    pub fn remote_mta(&self) -> Option<RemoteMta> {
        self.first_recipient_entry()
            .and_then(|entry| entry.remote_mta)
    }
}

fn extract_headers(part: &[u8]) -> Result<BTreeMap<String, Vec<String>>> {
    let HeaderParseResult { headers, .. } = Header::parse_headers(part);

    let mut extensions = BTreeMap::new();

    for hdr in headers.iter() {
        let name = hdr.get_name().to_ascii_lowercase();
        extensions
            .entry(name)
            .or_insert_with(std::vec::Vec::new)
            .push(hdr.as_unstructured()?);
    }
    Ok(extensions)
}

struct DateTimeRfc2822(DateTime<Utc>);

impl FromStr for DateTimeRfc2822 {
    type Err = MailModelError;
    fn from_str(input: &str) -> Result<Self> {
        let date = DateTime::parse_from_rfc2822(input)
            .map_err(|err| MailModelError::ChronoError(format!("{input}: {err}")))?;
        Ok(Self(date.into()))
    }
}

impl From<DateTimeRfc2822> for DateTime<Utc> {
    fn from(val: DateTimeRfc2822) -> Self {
        val.0
    }
}

fn extract_single_req<R>(name: &str, extensions: &mut BTreeMap<String, Vec<String>>) -> Result<R>
where
    R: FromStr,
    <R as FromStr>::Err: std::fmt::Display,
{
    extract_single(name, extensions)?.ok_or_else(|| {
        MailModelError::DeliveryStatusParse(format!("required header {name} is not present"))
    })
}

fn extract_single<R>(
    name: &str,
    extensions: &mut BTreeMap<String, Vec<String>>,
) -> Result<Option<R>>
where
    R: FromStr,
    <R as FromStr>::Err: std::fmt::Display,
{
    match extensions.remove(name) {
        Some(mut hdrs) if hdrs.len() == 1 => {
            let value = hdrs.remove(0);
            let converted = value.parse::<R>().map_err(|err| {
                MailModelError::DeliveryStatusParse(format!("failed to convert '{value}': {err}"))
            })?;
            Ok(Some(converted))
        }
        Some(_) => Err(MailModelError::DeliveryStatusParse(format!(
            "header {name} should have only a single value"
        ))),
        None => Ok(None),
    }
}

fn extract_single_conv<R, T>(
    name: &str,
    extensions: &mut BTreeMap<String, Vec<String>>,
) -> Result<Option<T>>
where
    R: FromStr,
    <R as FromStr>::Err: std::fmt::Display,
    R: Into<T>,
{
    Ok(extract_single::<R>(name, extensions)?.map(|v| v.into()))
}
