// ABOUTME: Human and --json rendering of CLI results.
// ABOUTME: CliOutput is the one JSON shape every command prints in machine mode.

use colored::Colorize;
use ghcert_policy::PolicySignature;
use ghcert_ssh::CertInfo;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CliOutput {
    Issued {
        cert_path: PathBuf,
        added_to_agent: bool,
        certificate: CertInfo,
    },
    Status {
        cert_path: PathBuf,
        certificate: CertInfo,
    },
    PolicySigned {
        signature: PolicySignature,
    },
    Error {
        message: String,
    },
}

impl CliOutput {
    pub fn error(err: &anyhow::Error) -> Self {
        CliOutput::Error {
            message: format!("{err:#}"),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!(r#"{{"result":"error","message":"{e}"}}"#))
    }
}

/// `2h 5m`, `4m 10s`, `0s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

pub fn print_cert_info(info: &CertInfo) {
    let state = if info.is_expired {
        "expired".red().bold()
    } else {
        "valid".green().bold()
    };
    println!("  Status:      {state}");
    println!("  Key ID:      {}", info.key_id);
    println!("  Principals:  {}", info.principals.join(", "));
    println!("  Serial:      {}", info.serial);
    println!("  Valid from:  {}", info.valid_after);
    println!("  Valid until: {}", info.valid_before);
    if !info.is_expired {
        println!("  Time left:   {}", format_duration(info.time_left).cyan());
    }
    for (name, value) in &info.extensions {
        if value.is_empty() {
            println!("  Extension:   {}", name.dimmed());
        } else {
            println!("  Extension:   {} = {}", name.dimmed(), value);
        }
    }
    println!("  Key:         {}", info.key_fingerprint.dimmed());
    println!("  Signed by:   {}", info.signing_key_fingerprint.dimmed());
}
