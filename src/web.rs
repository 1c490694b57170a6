//! Web form in front of the bulk mailer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use uuid::Uuid;

use crate::config::{MailerConfig, SmtpSecurity};
use crate::mailer::{self, Campaign, Connector, Draft, MailerError, RunSummary, SmtpConnector, SmtpSettings, Upload};
use crate::page::{self, FormValues, PageView};

const SESSION_COOKIE: &str = "mailer_session";
const FLASH_TTL: Duration = Duration::from_secs(60 * 60);
/// Allowance for the text fields on top of the upload limit.
const FORM_HEADROOM: usize = 64 * 1024;

/// Per-visitor state carried across the post/redirect/get cycle.
#[derive(Debug, Clone)]
struct Flash {
    form: FormValues,
    summary: Option<RunSummary>,
    stored_at: Instant,
}

#[derive(Clone)]
pub struct AppState {
    settings: MailerConfig,
    connector: Arc<dyn Connector>,
    flash: Arc<Mutex<HashMap<String, Flash>>>,
}

impl AppState {
    pub fn new(settings: MailerConfig) -> Self {
        Self::with_connector(settings, Arc::new(SmtpConnector))
    }

    pub fn with_connector(settings: MailerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            settings,
            connector,
            flash: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn flash_store(&self) -> MutexGuard<'_, HashMap<String, Flash>> {
        self.flash.lock().unwrap_or_else(|poisoned| {
            log::warn!("Flash store lock was poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn load_flash(&self, session_id: &str) -> Option<Flash> {
        self.flash_store().get(session_id).cloned()
    }

    fn store_flash(&self, session_id: String, flash: Flash) {
        let mut store = self.flash_store();
        store.retain(|_, entry| entry.stored_at.elapsed() < FLASH_TTL);
        store.insert(session_id, flash);
    }
}

pub fn router(state: AppState) -> Router {
    let limit = state.settings.max_upload_bytes;
    Router::new()
        .route("/", get(show_form).post(submit_form))
        .layer(DefaultBodyLimit::max(limit.saturating_add(FORM_HEADROOM)))
        .with_state(state)
}

pub async fn serve(settings: MailerConfig) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(&settings.bind)
        .await
        .with_context(|| format!("Failed to bind {}", settings.bind))?;
    log::info!("Mailer form listening on http://{}", settings.bind);

    axum::serve(listener, router(AppState::new(settings)))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("Shutting down");
        })
        .await
        .context("Mailer server failed")?;

    Ok(())
}

fn session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| Uuid::parse_str(value).is_ok())
}

async fn show_form(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Html<String> {
    let success = params.get("sent").map(|v| v == "1").unwrap_or(false);
    let flash = session_id(&headers).and_then(|id| state.load_flash(&id));

    let view = match flash {
        Some(flash) => PageView {
            form: flash.form,
            success,
            summary: if success { flash.summary } else { None },
            error: None,
        },
        None => PageView {
            success,
            ..PageView::default()
        },
    };

    Html(page::render(&view))
}

/// Parsed multipart submission.
struct Submission {
    form: FormValues,
    password: String,
    upload: Option<Upload>,
}

fn upload_too_large(max_upload_bytes: usize) -> MailerError {
    MailerError::Validation(format!(
        "Uploaded file is too large. The limit is {} bytes.",
        max_upload_bytes
    ))
}

fn multipart_failure(e: MultipartError, max_upload_bytes: usize) -> MailerError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        upload_too_large(max_upload_bytes)
    } else {
        MailerError::Parse(e.body_text())
    }
}

/// Read every form field. On failure the values read so far come back with the error.
async fn read_submission(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> Result<Submission, (FormValues, MailerError)> {
    let mut form = FormValues::default();
    let mut password = String::new();
    let mut upload = None;
    let mut oversized = false;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err((form, multipart_failure(e, max_upload_bytes))),
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == "file" {
            let filename = field.file_name().unwrap_or_default().to_string();
            let data = match field.bytes().await {
                Ok(data) => data,
                Err(e) => return Err((form, multipart_failure(e, max_upload_bytes))),
            };
            if data.len() > max_upload_bytes {
                log::warn!("Rejecting upload {} of {} bytes", filename, data.len());
                oversized = true;
            } else if !filename.is_empty() {
                // browsers send an empty part when no file was chosen
                upload = Some(Upload {
                    filename,
                    data: data.to_vec(),
                });
            }
            continue;
        }

        let value = match field.text().await {
            Ok(value) => value,
            Err(e) => return Err((form, multipart_failure(e, max_upload_bytes))),
        };
        match name.as_str() {
            "smtp_server" => form.smtp_server = value,
            "smtp_port" => form.smtp_port = value,
            "smtp_security" => form.smtp_security = value,
            "smtp_username" => form.smtp_username = value,
            "sender_email" => form.sender_email = value,
            "password" => password = value,
            "subject" => form.subject = value,
            "message" => form.message = value,
            "recipients" => form.recipients = value,
            other => log::debug!("Ignoring unknown form field {}", other),
        }
    }

    if oversized {
        return Err((form, upload_too_large(max_upload_bytes)));
    }
    Ok(Submission { form, password, upload })
}

fn campaign_from(submission: Submission, settings: &MailerConfig) -> Result<Campaign, MailerError> {
    let Submission { form, password, upload } = submission;

    let port: u16 = form
        .smtp_port
        .trim()
        .parse()
        .map_err(|_| MailerError::Validation(format!("Invalid SMTP port: {}", form.smtp_port)))?;
    if form.smtp_server.trim().is_empty() {
        return Err(MailerError::Validation("SMTP server is required.".to_string()));
    }

    Ok(Campaign {
        smtp: SmtpSettings {
            server: form.smtp_server.trim().to_string(),
            port,
            security: SmtpSecurity::parse(&form.smtp_security),
            username: form.smtp_username.trim().to_string(),
            password,
            timeout: Duration::from_secs(settings.smtp_timeout_secs),
        },
        draft: Draft {
            sender: form.sender_email.trim().to_string(),
            subject: form.subject.clone(),
            body: form.message.clone(),
        },
        manual_recipients: form.recipients.clone(),
        upload,
    })
}

fn error_page(form: FormValues, message: String) -> Response {
    let view = PageView {
        form,
        error: Some(message),
        ..PageView::default()
    };
    Html(page::render(&view)).into_response()
}

async fn submit_form(State(state): State<AppState>, headers: HeaderMap, multipart: Multipart) -> Response {
    let submission = match read_submission(multipart, state.settings.max_upload_bytes).await {
        Ok(submission) => submission,
        Err((form, e)) => {
            log::warn!("Rejected form submission: {}", e);
            return error_page(form, e.to_string());
        }
    };
    let form = submission.form.clone();

    let campaign = match campaign_from(submission, &state.settings) {
        Ok(campaign) => campaign,
        Err(e) => return error_page(form, e.to_string()),
    };

    let connector = state.connector.clone();
    let offset = state.settings.utc_offset_hours;
    let result = tokio::task::spawn_blocking(move || mailer::run_campaign(connector.as_ref(), &campaign, offset)).await;

    let summary = match result {
        Ok(Ok(summary)) => summary,
        Ok(Err(e)) => {
            log::error!("Mailing failed: {}", e);
            return error_page(form, e.to_string());
        }
        Err(e) => {
            log::error!("Mailing task panicked: {}", e);
            return error_page(form, "Internal error while sending.".to_string());
        }
    };

    let id = session_id(&headers).unwrap_or_else(|| Uuid::new_v4().to_string());
    state.store_flash(
        id.clone(),
        Flash {
            form,
            summary: Some(summary),
            stored_at: Instant::now(),
        },
    );

    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id);
    ([(header::SET_COOKIE, cookie)], Redirect::to("/?sent=1")).into_response()
}
