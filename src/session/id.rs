use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{DUPLICATE_SEPARATOR, PTY_SESSION_PREFIX, SESSION_ID_SAFE_CHAR};

/// Backend identifier of one PTY process, derived from a terminal path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// `/ws/main/api#1712` becomes `pty--ws-main-api-1712`.
    pub fn from_path(path: &str) -> Self {
        let sanitized: String = path
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => SESSION_ID_SAFE_CHAR,
                c if c == DUPLICATE_SEPARATOR => SESSION_ID_SAFE_CHAR,
                c => c,
            })
            .collect();
        Self(format!("{PTY_SESSION_PREFIX}{sanitized}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Path of a duplicated terminal. Duplicating a duplicate duplicates its base.
pub fn duplicate_path(path: &str, discriminator: i64) -> String {
    format!("{}{DUPLICATE_SEPARATOR}{discriminator}", base_path(path))
}

/// The directory a session runs in, i.e. the path without its discriminator.
pub fn base_path(path: &str) -> &str {
    match path.split_once(DUPLICATE_SEPARATOR) {
        Some((base, _)) => base,
        None => path,
    }
}

pub fn is_duplicate(path: &str) -> bool {
    path.contains(DUPLICATE_SEPARATOR)
}

/// Discriminator of a duplicated path, used to order duplicates.
pub fn discriminator(path: &str) -> Option<i64> {
    path.split_once(DUPLICATE_SEPARATOR)
        .and_then(|(_, disc)| disc.parse().ok())
}

/// True when `path` is `prefix` itself or lives under it, duplicates included.
pub fn is_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    match path.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || rest.starts_with(DUPLICATE_SEPARATOR),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_sanitizes_separators() {
        assert_eq!(SessionId::from_path("/ws/main").as_str(), "pty--ws-main");
        assert_eq!(
            SessionId::from_path("/ws/main/api#1712").as_str(),
            "pty--ws-main-api-1712"
        );
        assert_eq!(
            SessionId::from_path("C:\\repo\\web").as_str(),
            "pty-C--repo-web"
        );
    }

    #[test]
    fn test_duplicates_are_independent_sessions() {
        let dup = duplicate_path("/ws/api", 42);
        assert_eq!(dup, "/ws/api#42");
        assert_ne!(SessionId::from_path(&dup), SessionId::from_path("/ws/api"));
        assert_eq!(base_path(&dup), "/ws/api");
        assert!(is_duplicate(&dup));
        assert_eq!(discriminator(&dup), Some(42));
    }

    #[test]
    fn test_duplicate_of_duplicate_uses_base() {
        assert_eq!(duplicate_path("/ws/api#1", 2), "/ws/api#2");
    }

    #[test]
    fn test_is_under_matches_whole_components() {
        assert!(is_under("/ws/feature", "/ws/feature"));
        assert!(is_under("/ws/feature/api", "/ws/feature/"));
        assert!(is_under("/ws/feature#9", "/ws/feature"));
        assert!(!is_under("/ws/feature-two", "/ws/feature"));
        assert!(!is_under("/ws", "/ws/feature"));
    }
}
