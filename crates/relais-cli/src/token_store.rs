//! Persistent auth token, one file per user.
//!
//! The agent core only ever reads the token (at startup, via the CLI);
//! `relais set-token` is the single writer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const APP_DIR: &str = "relais";
const TOKEN_FILE: &str = "token";

fn token_path() -> Result<PathBuf> {
    let base = dirs::data_dir().context("could not determine the user data directory")?;
    Ok(base.join(APP_DIR).join(TOKEN_FILE))
}

fn write_token(path: &Path, token: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, token).with_context(|| format!("writing {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restricting permissions on {}", path.display()))?;
    }
    Ok(())
}

fn read_token(path: &Path) -> Option<String> {
    let token = fs::read_to_string(path).ok()?;
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Store the token with owner-only permissions. Returns the file path.
pub fn save_token(token: &str) -> Result<PathBuf> {
    let path = token_path()?;
    write_token(&path, token)?;
    Ok(path)
}

/// Load the stored token, if any.
pub fn load_token() -> Option<String> {
    read_token(&token_path().ok()?)
}
