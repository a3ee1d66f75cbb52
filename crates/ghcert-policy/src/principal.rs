// ABOUTME: Derives the certificate principal from identity-provider user info.
// ABOUTME: PrincipalSource is a closed enum; unknown config values fall back to email_prefix.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identity claims returned by the identity provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// Stable subject identifier (`sub`).
    #[serde(default, rename = "sub")]
    pub subject: String,
    #[serde(default)]
    pub email: String,
    /// Login name, `preferred_username` in OIDC terms.
    #[serde(default, rename = "preferred_username")]
    pub username: String,
    #[serde(default)]
    pub name: String,
}

/// Which claim becomes the certificate principal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum PrincipalSource {
    Email,
    Username,
    /// Local part of the username (or email when no username is present).
    #[default]
    EmailPrefix,
}

impl PrincipalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrincipalSource::Email => "email",
            PrincipalSource::Username => "username",
            PrincipalSource::EmailPrefix => "email_prefix",
        }
    }
}

impl fmt::Display for PrincipalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrincipalSource {
    type Err = std::convert::Infallible;

    /// Never fails: only the exact literals `email` and `username` select those
    /// modes; anything else, including the empty string, is `EmailPrefix`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "email" => PrincipalSource::Email,
            "username" => PrincipalSource::Username,
            _ => PrincipalSource::EmailPrefix,
        })
    }
}

impl From<String> for PrincipalSource {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(source) => source,
            Err(never) => match never {},
        }
    }
}

/// Pick the principal for `user` according to `source`.
///
/// Total and deterministic: every input, including empty claims, maps to a
/// defined string. An empty result is rejected later by the authority.
pub fn derive_principal(user: &UserInfo, source: PrincipalSource) -> String {
    match source {
        PrincipalSource::Email => user.email.clone(),
        PrincipalSource::Username => user.username.clone(),
        PrincipalSource::EmailPrefix => {
            let chosen = if user.username.is_empty() {
                &user.email
            } else {
                &user.username
            };
            match chosen.split_once('@') {
                Some((prefix, _)) => prefix.to_string(),
                None => chosen.clone(),
            }
        }
    }
}
