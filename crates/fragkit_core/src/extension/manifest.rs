//! Extension identity declaration and validation.

use crate::event::envelope::EventSource;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

static EXTENSION_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9]+(?:[._-][A-Za-z0-9]+)*$").expect("valid extension name regex")
});
static SEMVER_TRIPLET_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\.\d+\.\d+$").expect("valid semver regex"));

/// Identity of one extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionManifest {
    /// Stable name, also used (lowercased) as the event namespace segment.
    pub name: String,
    /// `major.minor.patch`.
    pub version: String,
    pub description: String,
    pub author: String,
}

impl ExtensionManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: String::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Validates declaration-level invariants.
    pub fn validate(&self) -> Result<(), ManifestValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ManifestValidationError::EmptyName);
        }
        if !EXTENSION_NAME_RE.is_match(name) {
            return Err(ManifestValidationError::InvalidName(self.name.clone()));
        }

        let version = self.version.trim();
        if version.is_empty() {
            return Err(ManifestValidationError::EmptyVersion);
        }
        if !SEMVER_TRIPLET_RE.is_match(version) {
            return Err(ManifestValidationError::InvalidVersion(
                self.version.clone(),
            ));
        }
        Ok(())
    }

    /// Identity stamped on events this extension emits.
    pub fn source(&self) -> EventSource {
        EventSource {
            name: self.name.clone(),
            version: self.version.clone(),
        }
    }
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestValidationError {
    EmptyName,
    InvalidName(String),
    EmptyVersion,
    InvalidVersion(String),
}

impl Display for ManifestValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "extension name must not be empty"),
            Self::InvalidName(value) => write!(f, "extension name is invalid: {value}"),
            Self::EmptyVersion => write!(f, "extension version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "extension version is invalid: {value} (expected major.minor.patch)"
            ),
        }
    }
}

impl Error for ManifestValidationError {}
