// ABOUTME: User key and certificate file handling for the ghcert CLI.
// ABOUTME: Locates, generates and loads ed25519 keys and writes issued certificates next to them.

use crate::codec::{marshal_certificate, parse_public_key};
use crate::error::{Result, SshError};
use ssh_key::{Algorithm, Certificate, LineEnding, PrivateKey, PublicKey};
use std::path::{Path, PathBuf};
use tracing::info;

/// Get XDG-style config directory (~/.config/ghcert).
///
/// Uses `XDG_CONFIG_HOME` if set, otherwise falls back to `~/.config`.
pub fn xdg_config_dir() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .map(|p| p.join("ghcert"))
}

/// Default key used for certificate logins (~/.config/ghcert/id_ed25519).
pub fn default_key_path() -> Option<PathBuf> {
    xdg_config_dir().map(|p| p.join("id_ed25519"))
}

/// Where OpenSSH looks for the certificate of `key_path`: `<key>-cert.pub`.
pub fn cert_path_for(key_path: &Path) -> PathBuf {
    let mut name = key_path.as_os_str().to_owned();
    name.push("-cert.pub");
    PathBuf::from(name)
}

/// Public half of `key_path`: `<key>.pub`.
pub fn public_key_path_for(key_path: &Path) -> PathBuf {
    let mut name = key_path.as_os_str().to_owned();
    name.push(".pub");
    PathBuf::from(name)
}

/// Load an existing SSH private key from disk.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
pub fn load_key(key_path: &Path) -> Result<PrivateKey> {
    let key_data = std::fs::read_to_string(key_path).map_err(|e| SshError::ReadKey {
        path: key_path.to_path_buf(),
        source: e,
    })?;

    PrivateKey::from_openssh(&key_data).map_err(|e| SshError::ParseKey {
        path: key_path.to_path_buf(),
        source: e,
    })
}

/// Read the `<key>.pub` file that accompanies `key_path`.
pub fn read_public_key(key_path: &Path) -> Result<PublicKey> {
    let pub_path = public_key_path_for(key_path);
    let data = std::fs::read(&pub_path).map_err(|e| SshError::ReadKey {
        path: pub_path.clone(),
        source: e,
    })?;

    parse_public_key(&data).map_err(|e| SshError::InvalidPublicKey {
        path: pub_path,
        source: e,
    })
}

/// Generate a new ed25519 SSH key pair and save to disk.
///
/// Creates the parent directory if needed. Sets Unix permissions to 0600
/// on the private key. Also writes the public key as `<key>.pub`.
///
/// # Errors
/// Returns an error if directory creation, key generation, or file writing fails.
pub fn generate_key(key_path: &Path) -> Result<PrivateKey> {
    info!(path = %key_path.display(), "generating new SSH key");

    if let Some(parent) = key_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SshError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    let private_key = PrivateKey::random(&mut rand::thread_rng(), Algorithm::Ed25519)
        .map_err(SshError::GenerateKey)?;

    let private_key_str = private_key
        .to_openssh(LineEnding::LF)
        .map_err(SshError::SerializeKey)?;

    std::fs::write(key_path, private_key_str.as_bytes()).map_err(|e| SshError::WriteKey {
        path: key_path.to_path_buf(),
        source: e,
    })?;

    // 0600 = rw-------
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(key_path, std::fs::Permissions::from_mode(0o600)).map_err(
            |e| SshError::SetPermissions {
                path: key_path.to_path_buf(),
                source: e,
            },
        )?;
    }

    let pub_key_path = public_key_path_for(key_path);
    let public_key_str = private_key
        .public_key()
        .to_openssh()
        .map_err(SshError::SerializeKey)?;

    std::fs::write(&pub_key_path, format!("{public_key_str}\n")).map_err(|e| {
        SshError::WriteKey {
            path: pub_key_path.clone(),
            source: e,
        }
    })?;

    Ok(private_key)
}

/// Load an existing SSH key or generate a new one if it doesn't exist.
pub fn load_or_generate_key(key_path: &Path) -> Result<PrivateKey> {
    if key_path.exists() {
        load_key(key_path)
    } else {
        generate_key(key_path)
    }
}

/// Write `cert` to `cert_path` in canonical text form with a trailing newline.
pub fn write_certificate(cert_path: &Path, cert: &Certificate) -> Result<()> {
    let text = marshal_certificate(cert)?;

    if let Some(parent) = cert_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SshError::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    std::fs::write(cert_path, format!("{text}\n")).map_err(|e| SshError::WriteKey {
        path: cert_path.to_path_buf(),
        source: e,
    })
}
