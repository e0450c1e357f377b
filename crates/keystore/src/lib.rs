//! ACN Keystore
//!
//! Persistence of the node identity. A peer's identity is an Ed25519
//! keypair; the peer id used in every overlay operation is derived from
//! its public key, so the secret has to survive restarts for the node to
//! keep its place in the network (and for bootstrap entries pointing at
//! it to stay valid).

use std::io;
use std::path::{Path, PathBuf};

use libp2p::identity::Keypair;
use thiserror::Error;
use tracing::info;

/// Default keyfile location; a leading `~` resolves against the user's
/// home directory.
pub const DEFAULT_KEYFILE: &str = "~/.acn/node.key";

/// The keyfile holds the raw Ed25519 seed, nothing else.
const SECRET_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum KeystoreError {
    #[error("cannot read keyfile {path}: {source}")]
    Read {
        path: PathBuf,
        source: io::Error,
    },

    #[error("cannot write keyfile {path}: {source}")]
    Write {
        path: PathBuf,
        source: io::Error,
    },

    #[error("keyfile {path} does not hold a raw Ed25519 secret: {reason}")]
    BadKey { path: PathBuf, reason: String },
}

/// Load the node identity from `keyfile`, generating and persisting a
/// fresh one on first run.
pub fn load_or_generate_keypair(keyfile: &Path) -> Result<Keypair, KeystoreError> {
    let path = resolve_keyfile(keyfile);
    match std::fs::read(&path) {
        Ok(secret) => decode_identity(&path, secret),
        Err(e) if e.kind() == io::ErrorKind::NotFound => generate_identity(&path),
        Err(source) => Err(KeystoreError::Read { path, source }),
    }
}

fn decode_identity(path: &Path, secret: Vec<u8>) -> Result<Keypair, KeystoreError> {
    if secret.len() != SECRET_LEN {
        return Err(KeystoreError::BadKey {
            path: path.to_path_buf(),
            reason: format!("expected {} bytes, found {}", SECRET_LEN, secret.len()),
        });
    }
    let keypair = Keypair::ed25519_from_bytes(secret).map_err(|e| KeystoreError::BadKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    info!(peer_id = %keypair.public().to_peer_id(), ?path, "loaded node identity");
    Ok(keypair)
}

fn generate_identity(path: &Path) -> Result<Keypair, KeystoreError> {
    let keypair = Keypair::generate_ed25519();
    let secret = keypair
        .clone()
        .try_into_ed25519()
        .expect("freshly generated key is Ed25519")
        .secret();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| KeystoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    std::fs::write(path, secret.as_ref()).map_err(|source| KeystoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;

    info!(peer_id = %keypair.public().to_peer_id(), ?path, "generated new node identity");
    Ok(keypair)
}

/// Expand a leading `~` against `$HOME` (`%USERPROFILE%` on Windows).
fn resolve_keyfile(path: &Path) -> PathBuf {
    let home = std::env::var_os(if cfg!(windows) { "USERPROFILE" } else { "HOME" });
    match (path.strip_prefix("~"), home) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_keyfile(name: &str) -> PathBuf {
        std::env::temp_dir().join("acn_keystore_tests").join(name)
    }

    #[test]
    fn test_identity_survives_reload() {
        let keyfile = temp_keyfile("identity.key");
        let _ = std::fs::remove_file(&keyfile);

        let first = load_or_generate_keypair(&keyfile).unwrap();
        assert!(keyfile.exists());
        let second = load_or_generate_keypair(&keyfile).unwrap();

        // Same secret on disk, same peer id on the overlay.
        assert_eq!(
            first.public().to_peer_id(),
            second.public().to_peer_id()
        );

        let _ = std::fs::remove_file(&keyfile);
    }

    #[test]
    fn test_truncated_keyfile_rejected() {
        let keyfile = temp_keyfile("truncated.key");
        std::fs::create_dir_all(keyfile.parent().unwrap()).unwrap();
        std::fs::write(&keyfile, [7u8; 16]).unwrap();

        let err = load_or_generate_keypair(&keyfile).unwrap_err();
        assert!(matches!(err, KeystoreError::BadKey { .. }));

        let _ = std::fs::remove_file(&keyfile);
    }

    #[test]
    fn test_tilde_resolves_to_home() {
        if std::env::var_os("HOME").is_none() && !cfg!(windows) {
            return;
        }
        let resolved = resolve_keyfile(Path::new(DEFAULT_KEYFILE));
        assert!(!resolved.starts_with("~"));
        assert!(resolved.ends_with(".acn/node.key"));
    }

    #[test]
    fn test_absolute_path_untouched() {
        let path = Path::new("/var/lib/acn/node.key");
        assert_eq!(resolve_keyfile(path), path);
    }
}
