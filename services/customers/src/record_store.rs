use crate::config::DatabaseConfig;
use crate::measurement::{Measurement, MeasurementInput, MEASUREMENT_FIELDS, NOTES_FIELD};
use crate::models::{Customer, CustomerFields, CustomerImage, CustomerImageWithOwner};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Relational store failures
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Typed access to customers, measurements and photo rows
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Check the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    async fn create_customer(&self, fields: &CustomerFields) -> Result<Customer, StoreError>;

    /// Overwrite every editable column; last write wins
    async fn update_customer(
        &self,
        id: Uuid,
        fields: &CustomerFields,
    ) -> Result<Customer, StoreError>;

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError>;

    /// Newest first, optionally filtered by name or phone substring
    async fn list_customers(&self, search: Option<String>) -> Result<Vec<Customer>, StoreError>;

    /// Delete the customer row only; returns whether a row existed
    async fn delete_customer(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn get_measurement(&self, customer_id: Uuid) -> Result<Option<Measurement>, StoreError>;

    /// Insert or replace the single measurement row of a customer
    async fn upsert_measurement(
        &self,
        customer_id: Uuid,
        input: &MeasurementInput,
    ) -> Result<Measurement, StoreError>;

    async fn delete_measurement(&self, customer_id: Uuid) -> Result<bool, StoreError>;

    async fn insert_image(
        &self,
        customer_id: Uuid,
        file_path: &str,
        file_name: &str,
    ) -> Result<CustomerImage, StoreError>;

    async fn get_image(&self, id: Uuid) -> Result<Option<CustomerImage>, StoreError>;

    /// Photos of one customer, most recent first
    async fn list_images(&self, customer_id: Uuid) -> Result<Vec<CustomerImage>, StoreError>;

    /// Photos of every customer with the owner's name, most recent first
    async fn list_gallery(&self) -> Result<Vec<CustomerImageWithOwner>, StoreError>;

    async fn delete_image(&self, id: Uuid) -> Result<bool, StoreError>;
}

/// PostgreSQL-backed record store
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Create a new record store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations").run(&self.pool).await?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    #[instrument(skip(self, fields))]
    async fn create_customer(&self, fields: &CustomerFields) -> Result<Customer, StoreError> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            INSERT INTO customers (id, name, phone, email, address, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            RETURNING id, name, phone, email, address, notes, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&fields.name)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.address)
        .bind(&fields.notes)
        .fetch_one(&self.pool)
        .await?;

        debug!(customer_id = %customer.id, "Customer created");
        Ok(customer)
    }

    #[instrument(skip(self, fields))]
    async fn update_customer(
        &self,
        id: Uuid,
        fields: &CustomerFields,
    ) -> Result<Customer, StoreError> {
        sqlx::query_as::<_, Customer>(
            r#"
            UPDATE customers
            SET name = $2, phone = $3, email = $4, address = $5, notes = $6
            WHERE id = $1
            RETURNING id, name, phone, email, address, notes, created_at
            "#,
        )
        .bind(id)
        .bind(&fields.name)
        .bind(&fields.phone)
        .bind(&fields.email)
        .bind(&fields.address)
        .bind(&fields.notes)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound {
            entity: "Customer",
            id,
        })
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, StoreError> {
        let customer = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, name, phone, email, address, notes, created_at
            FROM customers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(customer)
    }

    #[instrument(skip(self))]
    async fn list_customers(&self, search: Option<String>) -> Result<Vec<Customer>, StoreError> {
        let pattern = search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        let customers = sqlx::query_as::<_, Customer>(
            r#"
            SELECT id, name, phone, email, address, notes, created_at
            FROM customers
            WHERE $1::text IS NULL
               OR name ILIKE $1 ESCAPE '\'
               OR phone LIKE $1 ESCAPE '\'
            ORDER BY created_at DESC
            "#,
        )
        .bind(pattern)
        .fetch_all(&self.pool)
        .await?;

        Ok(customers)
    }

    #[instrument(skip(self))]
    async fn delete_customer(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM customers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_measurement(&self, customer_id: Uuid) -> Result<Option<Measurement>, StoreError> {
        let measurement =
            sqlx::query_as::<_, Measurement>("SELECT * FROM measurements WHERE customer_id = $1")
                .bind(customer_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(measurement)
    }

    #[instrument(skip(self, input))]
    async fn upsert_measurement(
        &self,
        customer_id: Uuid,
        input: &MeasurementInput,
    ) -> Result<Measurement, StoreError> {
        let mut query = sqlx::query_as::<_, Measurement>(upsert_measurement_sql())
            .bind(Uuid::new_v4())
            .bind(customer_id);

        for value in input.values() {
            query = query.bind(value);
        }

        let measurement = query
            .bind(&input.custom_notes)
            .fetch_one(&self.pool)
            .await?;

        debug!(customer_id = %customer_id, "Measurement saved");
        Ok(measurement)
    }

    async fn delete_measurement(&self, customer_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM measurements WHERE customer_id = $1")
            .bind(customer_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn insert_image(
        &self,
        customer_id: Uuid,
        file_path: &str,
        file_name: &str,
    ) -> Result<CustomerImage, StoreError> {
        let image = sqlx::query_as::<_, CustomerImage>(
            r#"
            INSERT INTO customer_images (id, customer_id, file_path, file_name, created_at)
            VALUES ($1, $2, $3, $4, NOW())
            RETURNING id, customer_id, file_path, file_name, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(customer_id)
        .bind(file_path)
        .bind(file_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(image)
    }

    async fn get_image(&self, id: Uuid) -> Result<Option<CustomerImage>, StoreError> {
        let image = sqlx::query_as::<_, CustomerImage>(
            r#"
            SELECT id, customer_id, file_path, file_name, created_at
            FROM customer_images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(image)
    }

    async fn list_images(&self, customer_id: Uuid) -> Result<Vec<CustomerImage>, StoreError> {
        let images = sqlx::query_as::<_, CustomerImage>(
            r#"
            SELECT id, customer_id, file_path, file_name, created_at
            FROM customer_images
            WHERE customer_id = $1
            ORDER BY created_at DESC, file_path DESC
            "#,
        )
        .bind(customer_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(images)
    }

    async fn list_gallery(&self) -> Result<Vec<CustomerImageWithOwner>, StoreError> {
        let images = sqlx::query_as::<_, CustomerImageWithOwner>(
            r#"
            SELECT i.id, i.customer_id, c.name AS customer_name,
                   i.file_path, i.file_name, i.created_at
            FROM customer_images i
            JOIN customers c ON c.id = i.customer_id
            ORDER BY i.created_at DESC, i.file_path DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(images)
    }

    #[instrument(skip(self))]
    async fn delete_image(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM customer_images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Build the measurement upsert from the field registry
///
/// Parameters: `$1` id, `$2` customer id, one per registry field, then notes.
fn upsert_measurement_sql() -> &'static str {
    static SQL: OnceLock<String> = OnceLock::new();

    SQL.get_or_init(|| {
        let columns: Vec<&str> = MEASUREMENT_FIELDS
            .iter()
            .map(|f| f.key)
            .chain(std::iter::once(NOTES_FIELD.key))
            .collect();

        let placeholders: Vec<String> = (0..columns.len()).map(|i| format!("${}", i + 3)).collect();

        let updates: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect();

        format!(
            "INSERT INTO measurements (id, customer_id, {columns}, created_at, updated_at) \
             VALUES ($1, $2, {placeholders}, NOW(), NOW()) \
             ON CONFLICT (customer_id) DO UPDATE SET {updates}, updated_at = NOW() \
             RETURNING *",
            columns = columns.join(", "),
            placeholders = placeholders.join(", "),
            updates = updates.join(", "),
        )
    })
}

/// Turn free text into a `LIKE` substring pattern with wildcards escaped
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}
