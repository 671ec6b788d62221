//! Customer and measurement operations.
//!
//! Inputs are validated before any store is touched. Deleting a customer
//! cascades in application code: photos (blob then row), then the
//! measurement, then the customer row. A failed photo removal stops the
//! cascade with the customer still present, so the delete can be repeated.

use crate::image_lifecycle::{ImageLifecycleManager, LifecycleError};
use crate::measurement::{Measurement, MeasurementInput};
use crate::models::{Customer, CustomerInput, ValidationError};
use crate::record_store::{RecordStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Customer {0} not found")]
    CustomerNotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

pub struct CustomerService {
    records: Arc<dyn RecordStore>,
    images: Arc<ImageLifecycleManager>,
}

impl CustomerService {
    pub fn new(records: Arc<dyn RecordStore>, images: Arc<ImageLifecycleManager>) -> Self {
        Self { records, images }
    }

    #[instrument(skip(self, input))]
    pub async fn create(&self, input: CustomerInput) -> Result<Customer, ServiceError> {
        let fields = input.validate()?;
        let customer = self.records.create_customer(&fields).await?;

        info!(customer_id = %customer.id, "Customer created");
        Ok(customer)
    }

    /// Overwrite the editable fields; last write wins
    #[instrument(skip(self, input))]
    pub async fn update(&self, id: Uuid, input: CustomerInput) -> Result<Customer, ServiceError> {
        let fields = input.validate()?;

        match self.records.update_customer(id, &fields).await {
            Ok(customer) => Ok(customer),
            Err(StoreError::NotFound { .. }) => Err(ServiceError::CustomerNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Customer, ServiceError> {
        self.records
            .get_customer(id)
            .await?
            .ok_or(ServiceError::CustomerNotFound(id))
    }

    /// Newest first; `search` matches name (any case) or phone substrings
    pub async fn list(&self, search: Option<&str>) -> Result<Vec<Customer>, ServiceError> {
        let search = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from);

        Ok(self.records.list_customers(search).await?)
    }

    /// Remove the customer with all photos and the measurement
    #[instrument(skip(self))]
    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        self.get(id).await?;

        let images = self.images.delete_all(id).await?;
        let had_measurement = self.records.delete_measurement(id).await?;

        if !self.records.delete_customer(id).await? {
            return Err(ServiceError::CustomerNotFound(id));
        }

        info!(
            customer_id = %id,
            images,
            had_measurement,
            "Customer deleted"
        );
        Ok(())
    }

    pub async fn get_measurement(
        &self,
        customer_id: Uuid,
    ) -> Result<Option<Measurement>, ServiceError> {
        self.get(customer_id).await?;
        Ok(self.records.get_measurement(customer_id).await?)
    }

    /// Insert or replace the customer's single measurement profile
    #[instrument(skip(self, input))]
    pub async fn save_measurement(
        &self,
        customer_id: Uuid,
        input: MeasurementInput,
    ) -> Result<Measurement, ServiceError> {
        let input = input.validate()?;
        self.get(customer_id).await?;

        Ok(self.records.upsert_measurement(customer_id, &input).await?)
    }
}
