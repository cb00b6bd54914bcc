//! Signed-in session
//!
//! Holds the bearer token and the current user. Every REST call and the
//! channel handshake read the token from here; with no token they are
//! skipped rather than failing.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::{User, UserId, UNKNOWN_NAME};

/// Authentication token and identity of the current user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    token: Option<String>,
    user: Option<User>,
}

impl Session {
    /// Create a signed-in session
    pub fn new(token: impl Into<String>, user: User) -> Self {
        Self {
            token: Some(token.into()),
            user: Some(user),
        }
    }

    /// Session with no token (every authenticated call becomes a no-op)
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.user.as_ref().map(|u| u.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// Name announced to peers in typing notifications
    pub fn display_name(&self) -> String {
        self.user
            .as_ref()
            .map(User::display_name)
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    /// Load a stored session; a missing file yields an anonymous session
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::anonymous());
        }

        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read session file: {:?}", path))?;
        serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse session file: {:?}", path))
    }

    /// Persist the session
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize session")?;
        fs::write(path, json).with_context(|| format!("Failed to write session file: {:?}", path))?;
        Ok(())
    }

    /// Forget the stored session
    pub fn logout(path: &Path) -> Result<()> {
        if path.exists() {
            fs::remove_file(path)
                .with_context(|| format!("Failed to remove session file: {:?}", path))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ada() -> User {
        User {
            id: 1,
            email: "ada@example.com".to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
        }
    }

    #[test]
    fn test_anonymous_session() {
        let session = Session::anonymous();
        assert!(!session.is_authenticated());
        assert!(session.token().is_none());
        assert!(session.user_id().is_none());
        assert_eq!(session.display_name(), UNKNOWN_NAME);
    }

    #[test]
    fn test_signed_in_session() {
        let session = Session::new("tok", ada());
        assert!(session.is_authenticated());
        assert_eq!(session.token(), Some("tok"));
        assert_eq!(session.user_id(), Some(1));
        assert_eq!(session.display_name(), "Ada Lovelace");
    }

    #[test]
    fn test_session_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("session.json");

        Session::new("tok", ada()).save(&path).unwrap();
        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded, Session::new("tok", ada()));

        Session::logout(&path).unwrap();
        assert!(!path.exists());
        assert_eq!(Session::load(&path).unwrap(), Session::anonymous());

        // Logging out twice is fine
        Session::logout(&path).unwrap();
    }

    #[test]
    fn test_corrupt_session_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        assert!(Session::load(&path).is_err());
    }
}
