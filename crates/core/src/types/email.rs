//! Golfer email addresses.
//!
//! Addresses arrive from sign-in forms, the auth provider and the demo
//! account list. They are stored as entered (after trimming) and compared
//! case-insensitively.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Why a string was rejected as an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("email address is blank")]
    Blank,

    #[error("email address exceeds {max} characters")]
    TooLong { max: usize },

    #[error("email address must contain exactly one '@'")]
    Separator,

    #[error("email address is missing the part {0} the '@'")]
    MissingPart(&'static str),

    #[error("email address contains whitespace")]
    Whitespace,
}

/// A structurally valid email address.
///
/// Only the shape is checked here; whether the mailbox exists is the auth
/// provider's call.
///
/// ```
/// use fairway_core::Email;
///
/// let email = Email::parse("  Ben@Fairway.golf ").unwrap();
/// assert_eq!(email.as_str(), "Ben@Fairway.golf");
/// assert!(email.matches("ben@fairway.golf"));
///
/// assert!(Email::parse("ben at fairway.golf").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// RFC 5321 path limit.
    pub const MAX_LENGTH: usize = 254;

    /// Trim and validate an address.
    ///
    /// # Errors
    ///
    /// Returns [`EmailError`] when the trimmed input is blank, too long,
    /// contains whitespace, or does not split into a non-empty local part
    /// and domain around a single `@`.
    pub fn parse(input: &str) -> Result<Self, EmailError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(EmailError::Blank);
        }
        if trimmed.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(EmailError::Whitespace);
        }

        let (local, domain) = trimmed.split_once('@').ok_or(EmailError::Separator)?;
        if domain.contains('@') {
            return Err(EmailError::Separator);
        }
        if local.is_empty() {
            return Err(EmailError::MissingPart("before"));
        }
        if domain.is_empty() {
            return Err(EmailError::MissingPart("after"));
        }

        Ok(Self(trimmed.to_owned()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Case-insensitive comparison against raw user input.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        self.0.eq_ignore_ascii_case(input.trim())
    }
}

impl TryFrom<String> for Email {
    type Error = EmailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
