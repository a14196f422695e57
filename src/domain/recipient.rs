//! Payout recipient formats: UPI virtual payment addresses and mobile numbers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use utoipa::ToSchema;

/// `localpart@provider`, e.g. `user.name-1@okbank`
static UPI_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._-]{2,256}@[a-zA-Z][a-zA-Z0-9]{2,64}$").expect("valid UPI regex")
});

/// Ten-digit Indian mobile number, leading digit 6-9
static PHONE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[6-9][0-9]{9}$").expect("valid phone regex"));

/// Destination type of an outbound payout
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecipientType {
    Upi,
    Phone,
}

impl RecipientType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upi => "upi",
            Self::Phone => "phone",
        }
    }
}

impl std::str::FromStr for RecipientType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upi" => Ok(Self::Upi),
            "phone" => Ok(Self::Phone),
            _ => Err(format!("Invalid recipient type: {}", s)),
        }
    }
}

impl std::fmt::Display for RecipientType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Canonical form used for storage and provider calls.
///
/// UPI ids are case-insensitive; phone numbers may arrive with a `+91`/`91`/`0`
/// prefix or embedded spaces and dashes.
pub fn normalize(kind: RecipientType, value: &str) -> String {
    let trimmed = value.trim();
    match kind {
        RecipientType::Upi => trimmed.to_lowercase(),
        RecipientType::Phone => {
            let digits: String = trimmed
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
                .collect();
            let digits = digits.strip_prefix("+91").unwrap_or(&digits);
            if digits.len() == 12 && digits.starts_with("91") {
                digits[2..].to_string()
            } else if digits.len() == 11 && digits.starts_with('0') {
                digits[1..].to_string()
            } else {
                digits.to_string()
            }
        }
    }
}

/// Check a recipient value, returning the user-facing message on failure
pub fn validate(kind: RecipientType, value: &str) -> Result<String, String> {
    if value.trim().is_empty() {
        return Err(match kind {
            RecipientType::Upi => "UPI ID is required".to_string(),
            RecipientType::Phone => "Phone number is required".to_string(),
        });
    }
    let normalized = normalize(kind, value);
    match kind {
        RecipientType::Upi if UPI_ID.is_match(&normalized) => Ok(normalized),
        RecipientType::Upi => Err(format!(
            "Invalid UPI ID format '{}': expected name@provider (e.g. user@bank)",
            value.trim()
        )),
        RecipientType::Phone if PHONE.is_match(&normalized) => Ok(normalized),
        RecipientType::Phone => Err(format!(
            "Invalid phone number '{}': expected a 10-digit mobile number starting with 6-9",
            value.trim()
        )),
    }
}

/// Mask a recipient for display, keeping enough to recognise it
pub fn mask(kind: RecipientType, value: &str) -> String {
    match kind {
        RecipientType::Phone => {
            let keep = value.len().saturating_sub(4);
            format!("{}{}", "*".repeat(keep), &value[keep..])
        }
        RecipientType::Upi => match value.split_once('@') {
            Some((local, provider)) if local.len() > 2 => {
                format!("{}{}@{}", &local[..2], "*".repeat(local.len() - 2), provider)
            }
            _ => value.to_string(),
        },
    }
}

/// Display string for a recipient: the supplied name, else the masked value
pub fn display_name(kind: RecipientType, value: &str, name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => format!("{} ({})", name, mask(kind, value)),
        None => mask(kind, value),
    }
}
