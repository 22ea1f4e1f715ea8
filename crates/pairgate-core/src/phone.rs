//! Phone number normalization.
//!
//! Callers may type numbers with spaces, dashes, parentheses or a leading
//! `+`. Everything that is not an ASCII digit is stripped and the remaining
//! digits must form a full international number.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shortest accepted number, country code included.
pub const MIN_DIGITS: usize = 10;

/// Longest accepted number (E.164 upper bound).
pub const MAX_DIGITS: usize = 15;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneNumberError {
    #[error("Phone number is required")]
    Missing,

    #[error("Invalid phone number format. Use 10-15 digits including country code")]
    Invalid { digits: usize },
}

/// A normalized phone number: digits only, 10 to 15 of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Normalize raw user input.
    pub fn parse(raw: &str) -> Result<Self, PhoneNumberError> {
        if raw.trim().is_empty() {
            return Err(PhoneNumberError::Missing);
        }

        let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
        if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            return Err(PhoneNumberError::Invalid {
                digits: digits.len(),
            });
        }

        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PhoneNumber {
    type Err = PhoneNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod parse {
        use super::*;

        #[test]
        fn accepts_plain_digits() {
            let number = PhoneNumber::parse("94771234567").unwrap();
            assert_eq!(number.as_str(), "94771234567");
        }

        #[test]
        fn strips_formatting() {
            let number = PhoneNumber::parse("+94 (77) 123-4567").unwrap();
            assert_eq!(number.as_str(), "94771234567");
        }

        #[test]
        fn accepts_bounds() {
            assert!(PhoneNumber::parse("1234567890").is_ok());
            assert!(PhoneNumber::parse("123456789012345").is_ok());
        }

        #[test]
        fn rejects_too_short() {
            assert_eq!(
                PhoneNumber::parse("123"),
                Err(PhoneNumberError::Invalid { digits: 3 })
            );
            assert!(PhoneNumber::parse("123456789").is_err());
        }

        #[test]
        fn rejects_too_long() {
            assert_eq!(
                PhoneNumber::parse("1234567890123456"),
                Err(PhoneNumberError::Invalid { digits: 16 })
            );
        }

        #[test]
        fn rejects_empty_and_blank() {
            assert_eq!(PhoneNumber::parse(""), Err(PhoneNumberError::Missing));
            assert_eq!(PhoneNumber::parse("   "), Err(PhoneNumberError::Missing));
        }

        #[test]
        fn rejects_input_without_digits() {
            assert_eq!(
                PhoneNumber::parse("call me"),
                Err(PhoneNumberError::Invalid { digits: 0 })
            );
        }

        #[test]
        fn from_str_matches_parse() {
            let number: PhoneNumber = "94-771-234-567".parse().unwrap();
            assert_eq!(number.to_string(), "94771234567");
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn invalid_message_mentions_format() {
            let err = PhoneNumberError::Invalid { digits: 3 };
            assert!(err.to_string().starts_with("Invalid phone number format"));
        }

        #[test]
        fn missing_message() {
            assert_eq!(
                PhoneNumberError::Missing.to_string(),
                "Phone number is required"
            );
        }
    }
}
