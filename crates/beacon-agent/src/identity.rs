//! Stable client identity.
//!
//! The identity is created once, written to a local file and reused on every
//! later start, so a restarted client keeps its place in the registry.

use std::fs;
use std::path::{Path, PathBuf};

use beacon_core::{ClientId, LABEL_SEPARATOR};
use sysinfo::System;
use tracing::info;
use uuid::Uuid;

use crate::error::IdentityError;

/// Label used when the host name cannot be determined.
pub const FALLBACK_LABEL: &str = "client";

/// Default identity file under the user's state directory.
pub fn default_identity_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("beacon")
        .join("client-id.txt")
}

/// Human label for a new identity: the host name, else [`FALLBACK_LABEL`].
pub fn default_label() -> String {
    System::host_name()
        .map(|name| sanitize_label(&name))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_LABEL.to_string())
}

/// Strips the separator so the label part stays unambiguous.
fn sanitize_label(raw: &str) -> String {
    raw.trim().replace(LABEL_SEPARATOR, "-")
}

/// Reads the identity at `path`, creating it on first use.
///
/// A new identity has the shape `<label>@<random hex>`. Parent directories
/// are created as needed. An existing but blank file is an error rather than
/// a silent reset, since replacing it would orphan the old registration.
pub fn load_or_create(path: &Path, label: &str) -> Result<ClientId, IdentityError> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            ClientId::parse(&contents).map_err(|_| IdentityError::Empty {
                path: path.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => create(path, label),
        Err(e) => Err(io_error(path, e)),
    }
}

fn create(path: &Path, label: &str) -> Result<ClientId, IdentityError> {
    let label = match sanitize_label(label) {
        l if l.is_empty() => FALLBACK_LABEL.to_string(),
        l => l,
    };
    let identity = ClientId::from_parts(&label, &Uuid::new_v4().simple().to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_error(path, e))?;
    }
    fs::write(path, identity.as_str()).map_err(|e| io_error(path, e))?;

    info!(client_id = %identity, path = %path.display(), "Created new client identity");
    Ok(identity)
}

fn io_error(path: &Path, err: std::io::Error) -> IdentityError {
    IdentityError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
