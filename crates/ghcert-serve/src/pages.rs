// ABOUTME: Minimal HTML pages shown to the browser after login.
// ABOUTME: Every interpolated value is escaped.

use axum::http::StatusCode;
use chrono::{DateTime, Utc};

/// Escape text for inclusion in HTML element content or attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 48rem; margin: 3rem auto; padding: 0 1rem; }}
pre {{ background: #f4f4f4; padding: 1rem; white-space: pre-wrap; word-break: break-all; }}
</style>
</head>
<body>
{body}
</body>
</html>
"#,
        title = escape_html(title),
    )
}

/// Page carrying the freshly issued certificate.
pub fn success_page(principal: &str, certificate: &str, valid_before: DateTime<Utc>) -> String {
    let body = format!(
        r#"<h1>Certificate issued</h1>
<p>Signed in as <strong>{principal}</strong>. The certificate is valid until {until}.</p>
<p>If a local ghcert agent is running, the CLI picks the certificate up on its own.
Otherwise paste the text below into the CLI, followed by two empty lines.</p>
<pre id="certificate">{certificate}</pre>
"#,
        principal = escape_html(principal),
        until = valid_before.format("%Y-%m-%d %H:%M:%S UTC"),
        certificate = escape_html(certificate.trim_end()),
    );
    layout("ghcert: certificate issued", &body)
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    let body = format!(
        "<h1>{reason}</h1>\n<p>{message}</p>\n",
        reason = escape_html(status.canonical_reason().unwrap_or("Error")),
        message = escape_html(message),
    );
    layout("ghcert: error", &body)
}
