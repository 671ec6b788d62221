//! Customer summary dispatch over WhatsApp.
//!
//! A send is one text message followed by one image message per stored photo,
//! all sequential. A failed text message stops the send. A failed image
//! message does not: the remaining images are still sent and every failure is
//! listed in the [`DispatchReport`].

use crate::image_lifecycle::ImageLifecycleManager;
use crate::measurement_summary::{compose_message, summarize};
use crate::messaging::{MessagingClient, MessagingError, OutboundMessage};
use crate::models::ValidationError;
use crate::record_store::{RecordStore, StoreError};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Country code assumed for every stored number
// Numbers from other countries will be misaddressed; changing this needs a
// per-customer country field.
pub const DEFAULT_COUNTRY_CODE: &str = "91";

/// Errors that end a send before all messages were attempted
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Text message failed: {0}")]
    TextMessage(#[source] MessagingError),
}

/// Result of one image message
#[derive(Debug, Serialize)]
pub struct ImageDelivery {
    pub url: String,
    /// `None` when delivered, otherwise the failure
    pub error: Option<String>,
}

/// Outcome of a send whose text message went through
#[derive(Debug, Serialize)]
pub struct DispatchReport {
    pub customer_id: Uuid,
    /// Normalized destination number
    pub to: String,
    pub images: Vec<ImageDelivery>,
}

impl DispatchReport {
    /// True only if the text and every image were delivered
    pub fn is_success(&self) -> bool {
        self.images.iter().all(|i| i.error.is_none())
    }

    /// URLs of the images that were not delivered, in send order
    pub fn failed_images(&self) -> Vec<&str> {
        self.images
            .iter()
            .filter(|i| i.error.is_some())
            .map(|i| i.url.as_str())
            .collect()
    }
}

/// Strip everything but digits and make sure the country code leads
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();

    if digits.starts_with(DEFAULT_COUNTRY_CODE) {
        digits
    } else {
        format!("{DEFAULT_COUNTRY_CODE}{digits}")
    }
}

/// Composes and sends customer summaries
pub struct NotificationDispatcher {
    records: Arc<dyn RecordStore>,
    images: Arc<ImageLifecycleManager>,
    messaging: Arc<dyn MessagingClient>,
}

impl NotificationDispatcher {
    pub fn new(
        records: Arc<dyn RecordStore>,
        images: Arc<ImageLifecycleManager>,
        messaging: Arc<dyn MessagingClient>,
    ) -> Self {
        Self {
            records,
            images,
            messaging,
        }
    }

    /// Send the customer's details, measurements and photos
    #[instrument(skip(self))]
    pub async fn send(&self, customer_id: Uuid) -> Result<DispatchReport, DispatchError> {
        let customer = self
            .records
            .get_customer(customer_id)
            .await?
            .ok_or(DispatchError::CustomerNotFound(customer_id))?;

        let to = customer
            .phone
            .as_deref()
            .filter(|p| p.chars().any(|c| c.is_ascii_digit()))
            .map(normalize_phone)
            .ok_or(ValidationError::MissingPhone)?;

        let measurement = self.records.get_measurement(customer_id).await?;
        let body = compose_message(&customer, &summarize(measurement.as_ref()));

        let urls: Vec<String> = self
            .records
            .list_images(customer_id)
            .await?
            .iter()
            .map(|image| self.images.resolve_url(&image.file_path))
            .collect();

        if let Err(e) = self.messaging.send(&OutboundMessage::text(&to, body)).await {
            error!(error = %e, "Text message failed, skipping images");
            metrics::counter!("customers.messages.failed").increment(1);
            return Err(DispatchError::TextMessage(e));
        }
        metrics::counter!("customers.messages.sent").increment(1);

        let mut deliveries = Vec::with_capacity(urls.len());
        for url in urls {
            let error = match self.messaging.send(&OutboundMessage::image(&to, &url)).await {
                Ok(()) => {
                    metrics::counter!("customers.messages.sent").increment(1);
                    None
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "Image message failed, continuing");
                    metrics::counter!("customers.messages.failed").increment(1);
                    Some(e.to_string())
                }
            };
            deliveries.push(ImageDelivery { url, error });
        }

        let report = DispatchReport {
            customer_id,
            to,
            images: deliveries,
        };

        info!(
            images = report.images.len(),
            failed = report.failed_images().len(),
            "Customer summary dispatched"
        );

        Ok(report)
    }
}
