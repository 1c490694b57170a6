//! Bulk Mailer: recipient sourcing, validation and one-message-per-recipient delivery.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use csv::ReaderBuilder;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Message, SmtpTransport, Transport};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::SmtpSecurity;
use crate::email::{is_valid_email, split_manual};

#[derive(Error, Debug)]
pub enum MailerError {
    #[error("Failed to read uploaded file: {0}")]
    Parse(String),

    #[error("{0}")]
    Validation(String),

    #[error("SMTP session failed: {0}")]
    Session(String),

    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("Sending to {recipient} failed after {sent} of {total} messages were sent: {reason}")]
    Delivery {
        recipient: String,
        sent: usize,
        total: usize,
        reason: String,
    },
}

/// An uploaded recipients file.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStats {
    pub file_total: usize,
    pub valid: usize,
    pub duplicates_removed: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FileEmails {
    pub emails: BTreeSet<String>,
    pub stats: FileStats,
}

/// Extract candidate addresses from an upload, branching on the file extension.
pub fn parse_upload(upload: &Upload) -> Result<FileEmails, MailerError> {
    let extension = Path::new(&upload.filename)
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let candidates = match extension.as_str() {
        "csv" => csv_candidates(&upload.data)?,
        "json" => json_candidates(&upload.data)?,
        _ => {
            log::warn!("Ignoring upload {} with unsupported extension", upload.filename);
            Vec::new()
        }
    };

    let emails: BTreeSet<String> = candidates.iter().filter(|c| is_deliverable(c)).cloned().collect();
    let stats = FileStats {
        file_total: candidates.len(),
        valid: emails.len(),
        duplicates_removed: candidates.len().saturating_sub(emails.len()),
    };

    Ok(FileEmails { emails, stats })
}

fn csv_candidates(data: &[u8]) -> Result<Vec<String>, MailerError> {
    let text = std::str::from_utf8(data).map_err(|e| MailerError::Parse(format!("CSV is not valid UTF-8: {}", e)))?;

    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut cells = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| MailerError::Parse(format!("CSV row {}: {}", index + 1, e)))?;
        cells.extend(record.iter().map(|cell| cell.trim().to_string()));
    }
    Ok(cells)
}

fn json_candidates(data: &[u8]) -> Result<Vec<String>, MailerError> {
    let value: Value = serde_json::from_slice(data).map_err(|e| MailerError::Parse(format!("invalid JSON: {}", e)))?;

    let values: Vec<Value> = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => {
            return Err(MailerError::Parse(
                "JSON must be a list of addresses or an object whose values are addresses".to_string(),
            ))
        }
    };

    values
        .into_iter()
        .enumerate()
        .map(|(index, value)| match value {
            Value::String(s) => Ok(s.trim().to_string()),
            other => Err(MailerError::Parse(format!("entry {} is not a string: {}", index + 1, other))),
        })
        .collect()
}

/// Matches the address pattern and parses as a mailbox, so no recipient can fail mid-run.
fn is_deliverable(candidate: &str) -> bool {
    if !is_valid_email(candidate) {
        return false;
    }
    match candidate.parse::<Mailbox>() {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Dropping recipient {}: {}", candidate, e);
            false
        }
    }
}

/// The merged, validated recipient pool for one run.
#[derive(Debug, Clone, Default)]
pub struct Recipients {
    /// Valid manual entries, as typed (not deduplicated).
    pub manual: Vec<String>,
    pub file: Option<FileEmails>,
    pub all: BTreeSet<String>,
}

pub fn collect_recipients(manual: &str, upload: Option<&Upload>) -> Result<Recipients, MailerError> {
    let manual: Vec<String> = split_manual(manual).into_iter().filter(|c| is_deliverable(c)).collect();
    let file = upload.map(parse_upload).transpose()?;

    let mut all: BTreeSet<String> = manual.iter().cloned().collect();
    if let Some(file) = &file {
        all.extend(file.emails.iter().cloned());
    }

    if all.is_empty() {
        return Err(MailerError::Validation("No valid email addresses were provided.".to_string()));
    }

    Ok(Recipients { manual, file, all })
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub server: String,
    pub port: u16,
    pub security: SmtpSecurity,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// Subject and body shared by every message of a run.
#[derive(Debug, Clone)]
pub struct Draft {
    pub sender: String,
    pub subject: String,
    pub body: String,
}

impl Draft {
    fn sender_mailbox(&self) -> Result<Mailbox, MailerError> {
        self.sender
            .trim()
            .parse()
            .map_err(|e| MailerError::Validation(format!("Invalid sender address {}: {}", self.sender, e)))
    }

    /// Build a message addressed to exactly one recipient.
    pub fn message_for(&self, recipient: &str) -> Result<Message, MailerError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| MailerError::Smtp(format!("invalid recipient address: {}", e)))?;

        Message::builder()
            .from(self.sender_mailbox()?)
            .to(to)
            .subject(self.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(self.body.clone())
            .map_err(|e| MailerError::Smtp(e.to_string()))
    }
}

/// An open, authenticated mail session.
pub trait Outbox {
    fn deliver(&mut self, message: &Message) -> Result<(), MailerError>;
}

/// Opens mail sessions. Login failures surface here, before anything is sent.
pub trait Connector: Send + Sync {
    fn connect(&self, settings: &SmtpSettings) -> Result<Box<dyn Outbox>, MailerError>;
}

pub struct SmtpConnector;

struct SmtpOutbox {
    transport: SmtpTransport,
}

impl Outbox for SmtpOutbox {
    fn deliver(&mut self, message: &Message) -> Result<(), MailerError> {
        self.transport
            .send(message)
            .map(|_| ())
            .map_err(|e| MailerError::Smtp(e.to_string()))
    }
}

impl Connector for SmtpConnector {
    fn connect(&self, settings: &SmtpSettings) -> Result<Box<dyn Outbox>, MailerError> {
        let session = |e: lettre::transport::smtp::Error| MailerError::Session(e.to_string());

        let builder = match settings.security {
            SmtpSecurity::SSL => {
                let tls_params = TlsParameters::new(settings.server.clone()).map_err(session)?;
                SmtpTransport::relay(&settings.server)
                    .map_err(session)?
                    .tls(Tls::Wrapper(tls_params))
            }
            SmtpSecurity::StartTLS => {
                let tls_params = TlsParameters::new(settings.server.clone()).map_err(session)?;
                SmtpTransport::relay(&settings.server)
                    .map_err(session)?
                    .tls(Tls::Required(tls_params))
            }
            SmtpSecurity::None => SmtpTransport::builder_dangerous(&settings.server),
        };

        let mut builder = builder.port(settings.port).timeout(Some(settings.timeout));
        if !settings.username.is_empty() {
            builder = builder.credentials(Credentials::new(settings.username.clone(), settings.password.clone()));
        }
        let transport = builder.build();

        log::info!("Opening SMTP session to {}:{}", settings.server, settings.port);
        match transport.test_connection() {
            Ok(true) => Ok(Box::new(SmtpOutbox { transport })),
            Ok(false) => Err(MailerError::Session(format!(
                "{}:{} did not accept the connection",
                settings.server, settings.port
            ))),
            Err(e) => Err(session(e)),
        }
    }
}

/// Send one message per recipient. The first failure stops the run.
pub fn send_all(outbox: &mut dyn Outbox, draft: &Draft, recipients: &BTreeSet<String>) -> Result<usize, MailerError> {
    let total = recipients.len();

    for (sent, recipient) in recipients.iter().enumerate() {
        let delivered = draft
            .message_for(recipient)
            .and_then(|message| outbox.deliver(&message));

        if let Err(e) = delivered {
            log::error!("Delivery to {} failed: {}", recipient, e);
            return Err(MailerError::Delivery {
                recipient: recipient.clone(),
                sent,
                total,
                reason: e.to_string(),
            });
        }
        log::debug!("Sent {}/{} to {}", sent + 1, total, recipient);
    }

    Ok(total)
}

/// Counts reported back to the form after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub manual_total: usize,
    pub file_total: usize,
    pub valid_from_file: usize,
    pub duplicates_removed: usize,
    pub final_total: usize,
    pub timestamp: String,
}

impl RunSummary {
    pub fn new(recipients: &Recipients, timestamp: String) -> Self {
        let stats = recipients.file.as_ref().map(|f| f.stats).unwrap_or_default();
        Self {
            manual_total: recipients.manual.len(),
            file_total: stats.file_total,
            valid_from_file: stats.valid,
            duplicates_removed: stats.duplicates_removed,
            final_total: recipients.all.len(),
            timestamp,
        }
    }
}

/// Current time as `dd.mm.yyyy HH:MM:SS` at a fixed UTC offset.
pub fn timestamp_now(utc_offset_hours: i32) -> String {
    let offset = utc_offset_hours
        .checked_mul(3600)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());
    Utc::now().with_timezone(&offset).format("%d.%m.%Y %H:%M:%S").to_string()
}

/// Everything a single form submission carries.
#[derive(Debug, Clone)]
pub struct Campaign {
    pub smtp: SmtpSettings,
    pub draft: Draft,
    pub manual_recipients: String,
    pub upload: Option<Upload>,
}

/// Validate, open one session, send to every recipient, then summarize.
pub fn run_campaign(connector: &dyn Connector, campaign: &Campaign, utc_offset_hours: i32) -> Result<RunSummary, MailerError> {
    let recipients = collect_recipients(&campaign.manual_recipients, campaign.upload.as_ref())?;
    campaign.draft.sender_mailbox()?;

    let mut outbox = connector.connect(&campaign.smtp)?;
    let sent = send_all(outbox.as_mut(), &campaign.draft, &recipients.all)?;
    log::info!("Sent {} messages via {}", sent, campaign.smtp.server);

    Ok(RunSummary::new(&recipients, timestamp_now(utc_offset_hours)))
}
