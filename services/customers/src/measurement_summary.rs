use crate::measurement::{Measurement, NOTES_FIELD};
use crate::models::Customer;

/// Text sent when a customer has nothing measured yet
pub const NO_MEASUREMENTS_PLACEHOLDER: &str = "(No measurements saved)";

/// Render the populated measurement fields as `label: value` lines
///
/// Lines follow registry order. Unset numbers and blank notes are skipped;
/// identity and audit columns are not part of the registry at all.
pub fn summarize(measurement: Option<&Measurement>) -> String {
    let Some(measurement) = measurement else {
        return NO_MEASUREMENTS_PLACEHOLDER.to_string();
    };

    let mut lines: Vec<String> = measurement
        .filled_fields()
        .map(|(field, value)| format!("{}: {}", field.label, format_value(value)))
        .collect();

    if let Some(notes) = measurement
        .custom_notes
        .as_deref()
        .filter(|n| !n.is_empty())
    {
        lines.push(format!("{}: {}", NOTES_FIELD.label, notes));
    }

    if lines.is_empty() {
        NO_MEASUREMENTS_PLACEHOLDER.to_string()
    } else {
        lines.join("\n")
    }
}

/// Compose the WhatsApp text body for a customer
pub fn compose_message(customer: &Customer, measurement_block: &str) -> String {
    let mut message = format!("Customer: {}\n", customer.name);
    if let Some(phone) = customer.phone.as_deref() {
        message.push_str(&format!("Phone: {}\n", phone));
    }
    message.push_str("\nMeasurements:\n");
    message.push_str(measurement_block);
    message
}

// f64 Display already prints 30.0 as "30" and 30.25 as "30.25"
fn format_value(value: f64) -> String {
    value.to_string()
}
