use crate::error::KeyError;
use lazy_static::lazy_static;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

lazy_static! {
    /// Customer IDs: alphanumerics and hyphens, 3-50 characters
    static ref CUSTOMER_ID_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9-]{3,50}$").unwrap();

    /// Image IDs: alphanumerics, hyphens and underscores, 10-100 characters
    static ref IMAGE_ID_PATTERN: Regex = Regex::new(r"^[a-zA-Z0-9_-]{10,100}$").unwrap();
}

/// Maximum number of base-36 digits in the random token of an image ID
const TOKEN_MAX_LEN: usize = 13;

/// Lifecycle type of a stored image. Immutable once a record is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ImageType {
    /// Image uploaded by the customer
    Uploaded,
    /// Recognition result saved by the customer
    SavedResult,
}

impl ImageType {
    /// Wire name (`UPLOADED`, `SAVED_RESULT`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Uploaded => "UPLOADED",
            ImageType::SavedResult => "SAVED_RESULT",
        }
    }

    /// Prefix used when generating image IDs
    pub fn id_prefix(&self) -> &'static str {
        match self {
            ImageType::Uploaded => "uploaded",
            ImageType::SavedResult => "saved_result",
        }
    }

    /// Folder under the customer prefix holding this type's objects
    pub fn folder(&self) -> &'static str {
        match self {
            ImageType::Uploaded => "uploaded",
            ImageType::SavedResult => "saved-result",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageType {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "UPLOADED" => Ok(ImageType::Uploaded),
            "SAVED_RESULT" => Ok(ImageType::SavedResult),
            _ => Err(KeyError::UnknownImageType(s.to_string())),
        }
    }
}

/// Source of the current time in epoch milliseconds
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock pinned to a single instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

/// Components of an image ID.
///
/// Parsing is deliberately loose: `type_name` is the uppercased first segment
/// whether or not it names a known [`ImageType`], and `timestamp` is `None`
/// when the second segment has no leading digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedImageId {
    #[serde(rename = "type")]
    pub type_name: String,
    pub timestamp: Option<i64>,
    pub random: String,
}

impl ParsedImageId {
    /// Strict view of `type_name`
    pub fn image_type(&self) -> Option<ImageType> {
        self.type_name.parse().ok()
    }
}

/// Generate a fresh image ID from the wall clock and the thread RNG
pub fn generate_image_id(image_type: ImageType) -> String {
    generate_image_id_with(image_type, &SystemClock, &mut rand::thread_rng())
}

/// Generate an image ID `{type}-{millis}-{token}` from the given clock and RNG.
///
/// Uniqueness is probabilistic; the metadata store's conditional insert is
/// what rejects a collision.
pub fn generate_image_id_with<C, R>(image_type: ImageType, clock: &C, rng: &mut R) -> String
where
    C: Clock + ?Sized,
    R: Rng + ?Sized,
{
    format!(
        "{}-{}-{}",
        image_type.id_prefix(),
        clock.now_millis(),
        random_token(rng)
    )
}

/// Base-36 digits of a uniform fraction, truncated to `TOKEN_MAX_LEN`
fn random_token<R: Rng + ?Sized>(rng: &mut R) -> String {
    let mut fraction: f64 = rng.gen();
    let mut token = String::with_capacity(TOKEN_MAX_LEN);

    while token.len() < TOKEN_MAX_LEN && fraction > 0.0 {
        fraction *= 36.0;
        let digit = fraction.floor();
        fraction -= digit;
        token.push(std::char::from_digit(digit as u32, 36).unwrap_or('0'));
    }

    token
}

/// Split an image ID into type, timestamp and random token
pub fn parse_image_id(image_id: &str) -> Result<ParsedImageId, KeyError> {
    let parts: Vec<&str> = image_id.split('-').collect();
    if parts.len() < 3 {
        return Err(KeyError::InvalidFormat(image_id.to_string()));
    }

    Ok(ParsedImageId {
        type_name: parts[0].to_uppercase(),
        timestamp: parse_int_prefix(parts[1]),
        random: parts[2..].join("-"),
    })
}

/// Integer prefix of `s`: leading whitespace, optional sign, then digits
fn parse_int_prefix(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

pub fn validate_customer_id(customer_id: &str) -> bool {
    CUSTOMER_ID_PATTERN.is_match(customer_id)
}

pub fn validate_image_id(image_id: &str) -> bool {
    IMAGE_ID_PATTERN.is_match(image_id)
}
