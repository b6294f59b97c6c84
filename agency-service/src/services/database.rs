//! Database service for agency-service: connection pool plus the directory,
//! device-registry, verification-store and change-log operations. The ledger,
//! pipeline and comment services run their own queries on this pool.

use crate::models::{
    BusinessInfo, ChangeLogEntry, ClientProfile, DeviceToken, FieldDelta, PendingVerification,
    Service, User,
};
use crate::services::metrics::DB_QUERY_DURATION;
use chrono::{DateTime, Utc};
use service_core::error::{is_unique_violation, AppError};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "agency-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Pool that defers connecting until the first query runs.
    pub fn connect_lazy(database_url: &str) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(database_url)?;
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Directory Operations
    // -------------------------------------------------------------------------

    /// Get a user by ID.
    #[instrument(skip(self), fields(user_id = user_id))]
    pub async fn get_user(&self, user_id: i64) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, role, is_active, created_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(user)
    }

    /// Get a user by email address.
    #[instrument(skip(self, email))]
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_user_by_email"])
            .start_timer();

        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, email, full_name, role, is_active, created_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(user)
    }

    /// Get the client profile attached to a user.
    #[instrument(skip(self), fields(user_id = user_id))]
    pub async fn get_client_profile(&self, user_id: i64) -> Result<Option<ClientProfile>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_client_profile"])
            .start_timer();

        let profile = sqlx::query_as::<_, ClientProfile>(
            r#"
            SELECT id, user_id, company_name, gstin, address, client_code, created_at
            FROM client_profiles
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(profile)
    }

    /// Client codes already claimed by any profile.
    #[instrument(skip(self))]
    pub async fn taken_client_codes(&self) -> Result<Vec<String>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["taken_client_codes"])
            .start_timer();

        let codes = sqlx::query_scalar::<_, String>(
            "SELECT client_code FROM client_profiles WHERE client_code IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(codes)
    }

    /// Persist a derived client code onto a profile. Returns false when the
    /// code was claimed by another profile in the meantime.
    #[instrument(skip(self), fields(profile_id = profile_id, code = code))]
    pub async fn try_claim_client_code(
        &self,
        profile_id: i64,
        code: &str,
    ) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["try_claim_client_code"])
            .start_timer();

        let result = sqlx::query(
            "UPDATE client_profiles SET client_code = $2 WHERE id = $1 AND client_code IS NULL",
        )
        .bind(profile_id)
        .bind(code)
        .execute(&self.pool)
        .await;

        timer.observe_duration();

        match result {
            Ok(done) => {
                if done.rows_affected() > 0 {
                    info!(profile_id = profile_id, code = code, "Client code claimed");
                }
                Ok(done.rows_affected() > 0)
            }
            Err(ref e) if is_unique_violation(e, None) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Get a catalog service by ID.
    #[instrument(skip(self), fields(service_id = service_id))]
    pub async fn get_service(&self, service_id: i64) -> Result<Option<Service>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_service"])
            .start_timer();

        let service = sqlx::query_as::<_, Service>(
            r#"
            SELECT id, code, name, hsn_code, category, is_pipeline, pipeline_config, created_at
            FROM services
            WHERE id = $1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(service)
    }

    /// Get an issuing-business record by ID.
    #[instrument(skip(self), fields(business_info_id = business_info_id))]
    pub async fn get_business_info(
        &self,
        business_info_id: i64,
    ) -> Result<Option<BusinessInfo>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_business_info"])
            .start_timer();

        let record = sqlx::query_as::<_, BusinessInfo>(
            r#"
            SELECT id, name, address, gstin, bank_account_name, bank_account_number,
                bank_ifsc, bank_branch, is_active, created_at
            FROM business_info
            WHERE id = $1
            "#,
        )
        .bind(business_info_id)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(record)
    }

    /// Latest active issuing-business record, the default sender snapshot.
    #[instrument(skip(self))]
    pub async fn latest_active_business_info(&self) -> Result<Option<BusinessInfo>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["latest_active_business_info"])
            .start_timer();

        let record = sqlx::query_as::<_, BusinessInfo>(
            r#"
            SELECT id, name, address, gstin, bank_account_name, bank_account_number,
                bank_ifsc, bank_branch, is_active, created_at
            FROM business_info
            WHERE is_active = TRUE
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(record)
    }

    // -------------------------------------------------------------------------
    // Device Registry Operations
    // -------------------------------------------------------------------------

    /// Register a device token for a user. Any other user's live row holding
    /// the same token is archived first, then the caller's registration is
    /// inserted or refreshed.
    #[instrument(skip(self, token), fields(user_id = user_id, platform = platform))]
    pub async fn register_device(
        &self,
        user_id: i64,
        token: &str,
        platform: &str,
    ) -> Result<DeviceToken, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["register_device"])
            .start_timer();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE device_tokens
            SET archived = TRUE, updated_at = now()
            WHERE token = $1 AND user_id <> $2 AND NOT archived
            "#,
        )
        .bind(token)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let device = sqlx::query_as::<_, DeviceToken>(
            r#"
            INSERT INTO device_tokens (user_id, token, platform)
            VALUES ($1, $2, $3)
            ON CONFLICT (token) WHERE NOT archived
            DO UPDATE SET platform = EXCLUDED.platform, updated_at = now()
            RETURNING id, user_id, token, platform, archived, created_at, updated_at
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(platform)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        timer.observe_duration();

        info!(device_id = device.id, user_id = user_id, "Device registered");

        Ok(device)
    }

    /// Non-archived tokens for a set of users.
    #[instrument(skip(self, user_ids), fields(user_count = user_ids.len()))]
    pub async fn active_tokens_for_users(&self, user_ids: &[i64]) -> Result<Vec<String>, AppError> {
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let timer = DB_QUERY_DURATION
            .with_label_values(&["active_tokens_for_users"])
            .start_timer();

        let tokens = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT token
            FROM device_tokens
            WHERE user_id = ANY($1) AND NOT archived
            "#,
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(tokens)
    }

    // -------------------------------------------------------------------------
    // Verification Store Operations
    // -------------------------------------------------------------------------

    /// Get a pending verification by lookup key, expired rows included.
    #[instrument(skip(self, lookup_key))]
    pub async fn get_verification(
        &self,
        lookup_key: &str,
    ) -> Result<Option<PendingVerification>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_verification"])
            .start_timer();

        let row = sqlx::query_as::<_, PendingVerification>(
            r#"
            SELECT id, lookup_key, payload, code_hash, attempts, request_count,
                window_started_at, expires_at, created_at
            FROM pending_verifications
            WHERE lookup_key = $1
            "#,
        )
        .bind(lookup_key)
        .fetch_optional(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(row)
    }

    /// Insert or refresh a pending verification. A fresh code resets the
    /// attempt counter; the request counter advances within its window and
    /// restarts once the window has lapsed.
    #[instrument(skip(self, lookup_key, payload, code_hash))]
    pub async fn upsert_verification(
        &self,
        lookup_key: &str,
        payload: &serde_json::Value,
        code_hash: &str,
        expires_at: DateTime<Utc>,
        window: Duration,
    ) -> Result<PendingVerification, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_verification"])
            .start_timer();

        let window_secs = window.as_secs() as f64;
        let row = sqlx::query_as::<_, PendingVerification>(
            r#"
            INSERT INTO pending_verifications (lookup_key, payload, code_hash, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (lookup_key) DO UPDATE SET
                payload = EXCLUDED.payload,
                code_hash = EXCLUDED.code_hash,
                expires_at = EXCLUDED.expires_at,
                attempts = 0,
                request_count = CASE
                    WHEN pending_verifications.window_started_at < now() - make_interval(secs => $5)
                        THEN 1
                    ELSE pending_verifications.request_count + 1
                END,
                window_started_at = CASE
                    WHEN pending_verifications.window_started_at < now() - make_interval(secs => $5)
                        THEN now()
                    ELSE pending_verifications.window_started_at
                END
            RETURNING id, lookup_key, payload, code_hash, attempts, request_count,
                window_started_at, expires_at, created_at
            "#,
        )
        .bind(lookup_key)
        .bind(payload)
        .bind(code_hash)
        .bind(expires_at)
        .bind(window_secs)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(row)
    }

    /// Count a failed confirmation attempt; returns the new attempt total.
    #[instrument(skip(self), fields(verification_id = verification_id))]
    pub async fn increment_verification_attempts(
        &self,
        verification_id: i64,
    ) -> Result<i32, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["increment_verification_attempts"])
            .start_timer();

        let attempts = sqlx::query_scalar::<_, i32>(
            "UPDATE pending_verifications SET attempts = attempts + 1 WHERE id = $1 RETURNING attempts",
        )
        .bind(verification_id)
        .fetch_one(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(attempts)
    }

    /// Consume a verification row.
    #[instrument(skip(self), fields(verification_id = verification_id))]
    pub async fn delete_verification(&self, verification_id: i64) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_verification"])
            .start_timer();

        sqlx::query("DELETE FROM pending_verifications WHERE id = $1")
            .bind(verification_id)
            .execute(&self.pool)
            .await?;

        timer.observe_duration();

        Ok(())
    }

    // -------------------------------------------------------------------------
    // Change Log Operations
    // -------------------------------------------------------------------------

    /// History for one entity, oldest first.
    #[instrument(skip(self), fields(entity_type = entity_type, entity_id = entity_id))]
    pub async fn list_changes(
        &self,
        entity_type: &str,
        entity_id: i64,
    ) -> Result<Vec<ChangeLogEntry>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_changes"])
            .start_timer();

        let entries = sqlx::query_as::<_, ChangeLogEntry>(
            r#"
            SELECT id, entity_type, entity_id, actor_id, changes, created_at
            FROM change_log
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY id
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        timer.observe_duration();

        Ok(entries)
    }
}

/// Append one change-log row on any executor, so callers can write it inside
/// their own transaction. Empty diffs are skipped.
pub async fn record_change<'e, E>(
    executor: E,
    entity_type: &str,
    entity_id: i64,
    actor_id: Option<i64>,
    deltas: &[FieldDelta],
) -> Result<(), AppError>
where
    E: sqlx::PgExecutor<'e>,
{
    if deltas.is_empty() {
        return Ok(());
    }

    let changes = serde_json::to_value(deltas)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to encode diff: {}", e)))?;

    sqlx::query(
        r#"
        INSERT INTO change_log (entity_type, entity_id, actor_id, changes)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(entity_type)
    .bind(entity_id)
    .bind(actor_id)
    .bind(changes)
    .execute(executor)
    .await?;

    Ok(())
}
