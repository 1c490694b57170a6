use crate::config::SmtpSecurity;
use crate::mailer::RunSummary;

/// Values echoed back into the form. The SMTP password is deliberately absent.
#[derive(Debug, Clone, Default)]
pub struct FormValues {
    pub smtp_server: String,
    pub smtp_port: String,
    pub smtp_security: String,
    pub smtp_username: String,
    pub sender_email: String,
    pub subject: String,
    pub message: String,
    pub recipients: String,
}

#[derive(Debug, Clone, Default)]
pub struct PageView {
    pub form: FormValues,
    pub success: bool,
    pub summary: Option<RunSummary>,
    pub error: Option<String>,
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn input(label: &str, name: &str, kind: &str, value: &str) -> String {
    format!(
        r#"<label>{label}<input type="{kind}" name="{name}" value="{value}"></label>"#,
        label = label,
        kind = kind,
        name = name,
        value = escape(value),
    )
}

fn security_select(current: &str) -> String {
    let current = SmtpSecurity::parse(current);
    let options: String = [
        (SmtpSecurity::StartTLS, "STARTTLS"),
        (SmtpSecurity::SSL, "SSL/TLS"),
        (SmtpSecurity::None, "None"),
    ]
    .iter()
    .map(|(security, label)| {
        let selected = if *security == current { " selected" } else { "" };
        format!(r#"<option value="{}"{}>{}</option>"#, security.as_str(), selected, label)
    })
    .collect();
    format!(r#"<label>Security<select name="smtp_security">{}</select></label>"#, options)
}

fn summary_block(summary: &RunSummary) -> String {
    format!(
        r#"<section class="summary">
<h2>Sent</h2>
<ul>
<li>Manual addresses: {}</li>
<li>Addresses in file: {}</li>
<li>Valid from file: {}</li>
<li>Duplicates removed: {}</li>
<li>Total recipients: {}</li>
<li>Finished at: {}</li>
</ul>
</section>"#,
        summary.manual_total,
        summary.file_total,
        summary.valid_from_file,
        summary.duplicates_removed,
        summary.final_total,
        escape(&summary.timestamp),
    )
}

pub fn render(view: &PageView) -> String {
    let form = &view.form;
    let port = if form.smtp_port.is_empty() { "587" } else { form.smtp_port.as_str() };

    let mut notices = String::new();
    if let Some(error) = &view.error {
        notices.push_str(&format!(r#"<p class="error">{}</p>"#, escape(error)));
    }
    if view.success {
        notices.push_str(r#"<p class="success">Messages sent.</p>"#);
        if let Some(summary) = &view.summary {
            notices.push_str(&summary_block(summary));
        }
    }

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>Bulk mailer</title>
<style>
body {{ font-family: sans-serif; max-width: 42rem; margin: 2rem auto; }}
label {{ display: block; margin: .5rem 0; }}
input, textarea, select {{ display: block; width: 100%; }}
.error {{ color: #b00020; }}
.success {{ color: #1b5e20; }}
</style>
</head>
<body>
<h1>Bulk mailer</h1>
{notices}
<form method="post" action="/" enctype="multipart/form-data">
<fieldset>
<legend>SMTP</legend>
{server}
{port}
{security}
{username}
{sender}
<label>Password<input type="password" name="password"></label>
</fieldset>
<fieldset>
<legend>Message</legend>
{subject}
<label>Message<textarea name="message" rows="8">{message}</textarea></label>
<label>Recipients (comma separated)<textarea name="recipients" rows="3">{recipients}</textarea></label>
<label>Recipients file (.csv or .json)<input type="file" name="file" accept=".csv,.json"></label>
</fieldset>
<button type="submit">Send</button>
</form>
</body>
</html>
"#,
        notices = notices,
        server = input("SMTP server", "smtp_server", "text", &form.smtp_server),
        port = input("Port", "smtp_port", "number", port),
        security = security_select(&form.smtp_security),
        username = input("Username", "smtp_username", "text", &form.smtp_username),
        sender = input("Sender address", "sender_email", "email", &form.sender_email),
        subject = input("Subject", "subject", "text", &form.subject),
        message = escape(&form.message),
        recipients = escape(&form.recipients),
    )
}
