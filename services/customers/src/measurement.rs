//! Measurement profile and its ordered field registry.
//!
//! Every numeric column is declared exactly once in the `measurement_fields!`
//! invocation below. The stored record, the submitted input, the SQL column
//! list and the summary registry are all generated from that one list, so they
//! cannot drift apart. Values are inches; `None` means "not measured" and zero
//! is a legitimate value.

use crate::models::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// One numeric measurement column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasurementField {
    /// Column and JSON key
    pub key: &'static str,
    /// Label used in the summary text
    pub label: &'static str,
}

/// Column holding the free-text design notes
pub const NOTES_FIELD: MeasurementField = MeasurementField {
    key: "custom_notes",
    label: "custom notes",
};

macro_rules! measurement_fields {
    ($($key:ident => $label:literal),+ $(,)?) => {
        /// Stored measurement profile, at most one per customer
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
        pub struct Measurement {
            pub id: Uuid,
            pub customer_id: Uuid,
            $(pub $key: Option<f64>,)+
            pub custom_notes: Option<String>,
            pub created_at: DateTime<Utc>,
            pub updated_at: DateTime<Utc>,
        }

        /// Measurement values as submitted by the form
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct MeasurementInput {
            $(
                #[serde(default)]
                pub $key: Option<f64>,
            )+
            #[serde(default)]
            pub custom_notes: Option<String>,
        }

        /// Numeric columns in declaration order
        pub const MEASUREMENT_FIELDS: &[MeasurementField] = &[
            $(MeasurementField { key: stringify!($key), label: $label },)+
        ];

        impl Measurement {
            /// Numeric values aligned with [`MEASUREMENT_FIELDS`]
            pub fn values(&self) -> Vec<Option<f64>> {
                vec![$(self.$key),+]
            }
        }

        impl MeasurementInput {
            /// Numeric values aligned with [`MEASUREMENT_FIELDS`]
            pub fn values(&self) -> Vec<Option<f64>> {
                vec![$(self.$key),+]
            }
        }
    };
}

measurement_fields! {
    neck => "neck",
    shoulder_width => "shoulder width",
    chest => "chest",
    bust => "bust",
    waist => "waist",
    hip => "hip",
    sleeve_length => "sleeve length",
    arm_circumference => "arm circumference",
    back_length => "back length",
    front_length => "front length",
    inseam => "inseam",
    outseam => "outseam",
    thigh => "thigh",
    knee => "knee",
    calf => "calf",
    wrist => "wrist",
    under_bust => "under bust",
    seat => "seat",
    short_sleeve_length => "short sleeve length",
    bicep => "bicep",
    elbow => "elbow",
    forearm => "forearm",
    armhole => "armhole",
    back_width => "back width",
    front_width => "front width",
    shoulder_to_waist => "shoulder to waist",
    shoulder_to_bust => "shoulder to bust",
    bust_point_distance => "bust point distance",
    top_length => "top length",
    blouse_length => "blouse length",
    kurta_length => "kurta length",
    ankle => "ankle",
    crotch_depth => "crotch depth",
    rise => "rise",
    trouser_length => "trouser length",
    skirt_length => "skirt length",
    gown_length => "gown length",
    height => "height",
    head_circumference => "head circumference",
    collar => "collar",
}

impl Measurement {
    /// Populated numeric fields in declaration order
    pub fn filled_fields(&self) -> impl Iterator<Item = (&'static MeasurementField, f64)> {
        MEASUREMENT_FIELDS
            .iter()
            .zip(self.values())
            .filter_map(|(field, value)| value.map(|v| (field, v)))
    }
}

impl MeasurementInput {
    /// Reject values no tape measure produces and collapse blank notes
    pub fn validate(mut self) -> Result<Self, ValidationError> {
        for (field, value) in MEASUREMENT_FIELDS.iter().zip(self.values()) {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(ValidationError::InvalidMeasurement {
                        field: field.key.to_string(),
                        message: format!("{v} is not a valid length"),
                    });
                }
            }
        }

        self.custom_notes = self
            .custom_notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        Ok(self)
    }
}
