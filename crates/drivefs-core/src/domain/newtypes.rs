//! Domain newtypes with validation
//!
//! This module provides strongly-typed wrappers for identifiers, paths and
//! versioning tokens. Each newtype ensures data validity at construction time.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// Remote identifiers
// ============================================================================

/// Globally unique remote identifier of an entry
///
/// Stable across renames and moves. Opaque to drivefs apart from being
/// non-empty and free of path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(String);

impl ResourceId {
    /// Create a new ResourceId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains a `/`
    pub fn new(id: impl Into<String>) -> Result<Self, DomainError> {
        let id = id.into();
        if id.is_empty() {
            return Err(DomainError::InvalidResourceId(
                "Resource ID cannot be empty".to_string(),
            ));
        }
        if id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(DomainError::InvalidResourceId(format!(
                "Resource ID contains invalid characters: {id}"
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.0
    }
}

/// Content-versioning token of a file revision
///
/// Changes whenever the remote content changes. Together with the
/// [`ResourceId`] it keys a content cache record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns error if the hash is empty or not a plain token
    pub fn new(hash: impl Into<String>) -> Result<Self, DomainError> {
        let hash = hash.into();
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("Hash cannot be empty".to_string()));
        }
        if !hash
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '=' | '-' | '_'))
        {
            return Err(DomainError::InvalidHash(format!(
                "Hash contains invalid characters: {hash}"
            )));
        }
        Ok(Self(hash))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

/// A point in the remote change history
///
/// Changestamps increase monotonically on the remote side. `0` means
/// "nothing known yet".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Changestamp(i64);

impl Changestamp {
    /// The changestamp of an empty, never-loaded tree
    pub const ZERO: Changestamp = Changestamp(0);

    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// The changestamp right after this one, where a delta feed starts
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Display for Changestamp {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Drive paths
// ============================================================================

/// An absolute path in the synchronized namespace (must start with `/`)
///
/// Paths are derived from the entry tree, never stored canonically on an
/// entry. `"/"` is the root directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DrivePath(String);

impl DrivePath {
    /// Create a new DrivePath
    ///
    /// A trailing slash is dropped (except for the root).
    ///
    /// # Errors
    /// Returns error if the path is relative, contains empty components
    /// or traversal components
    pub fn new(path: impl Into<String>) -> Result<Self, DomainError> {
        let mut path = path.into();
        if !path.starts_with('/') {
            return Err(DomainError::InvalidPath(format!(
                "Drive path must start with '/': {path}"
            )));
        }
        if path.len() > 1 && path.ends_with('/') {
            path.pop();
        }
        if path.len() > 1 && path.contains("//") {
            return Err(DomainError::InvalidPath(format!(
                "Drive path contains empty components: {path}"
            )));
        }
        if path.split('/').any(|c| c == "." || c == "..") {
            return Err(DomainError::InvalidPath(format!(
                "Drive path contains traversal: {path}"
            )));
        }
        Ok(Self(path))
    }

    /// The root path `"/"`
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if the component is empty or contains a separator
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component == ".." {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component}"
            )));
        }
        if self.is_root() {
            Self::new(format!("/{component}"))
        } else {
            Self::new(format!("{}/{component}", self.0))
        }
    }

    /// The parent directory path, `None` for the root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// The last path component, `None` for the root
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// Iterate over the path components below the root
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }
}

impl Display for DrivePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DrivePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for DrivePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<DrivePath> for String {
    fn from(path: DrivePath) -> Self {
        path.0
    }
}
