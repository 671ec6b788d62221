//! Customer and photo records plus input validation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

/// Number of digits a stored customer phone must have
pub const PHONE_DIGITS: usize = 10;

/// Input rejected before any store is touched
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Name is required")]
    MissingName,

    #[error("Phone number must be exactly 10 digits")]
    InvalidPhone,

    #[error("Customer has no phone number to send to")]
    MissingPhone,

    #[error("Invalid measurement for {field}: {message}")]
    InvalidMeasurement { field: String, message: String },
}

/// Stored customer record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Customer fields as submitted by the form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInput {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Validated customer fields, blanks collapsed to `None`
#[derive(Debug, Clone, PartialEq)]
pub struct CustomerFields {
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
}

impl CustomerInput {
    /// Validate the submission and normalize blank optionals to `None`
    pub fn validate(self) -> Result<CustomerFields, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::MissingName);
        }

        let phone = non_blank(self.phone);
        if let Some(ref phone) = phone {
            if !is_valid_phone(phone) {
                return Err(ValidationError::InvalidPhone);
            }
        }

        Ok(CustomerFields {
            name: name.to_string(),
            phone,
            email: non_blank(self.email),
            address: non_blank(self.address),
            notes: non_blank(self.notes),
        })
    }
}

/// A phone is exactly ten ASCII digits, nothing else
pub fn is_valid_phone(phone: &str) -> bool {
    phone.len() == PHONE_DIGITS && phone.bytes().all(|b| b.is_ascii_digit())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Stored photo record; `file_path` is the blob key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomerImage {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub file_path: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// Photo row with its public URL resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageWithUrl {
    #[serde(flatten)]
    pub image: CustomerImage,
    pub url: String,
}

/// Photo row joined with its owner's name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct CustomerImageWithOwner {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub customer_name: String,
    pub file_path: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
}

/// Gallery entry with its public URL resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryImage {
    #[serde(flatten)]
    pub image: CustomerImageWithOwner,
    pub url: String,
}
