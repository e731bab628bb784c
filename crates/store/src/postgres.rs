use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    FailedEvent, FailedEventStatus, Payment, PaymentId, PaymentStatus, Reservation, ReservationId,
    ReservationStatus, ReservationTransition, Result, StoreError, UserId, Wallet,
    WalletDebit, WalletId,
    store::{FailedEventStore, PaymentStore, ReservationStore, WalletStore},
};

const WALLET_COLUMNS: &str = "id, owner, balance, currency, version, updated_at";
const RESERVATION_COLUMNS: &str = "id, payment_id, owner, amount, currency, status, \
     release_reason, gateway_ref, created_at, expires_at, updated_at";
const PAYMENT_COLUMNS: &str =
    "id, owner, service_id, amount, currency, description, status, created_at, updated_at";
const FAILED_EVENT_COLUMNS: &str = "message_id, original_event, event_kind, payment_id, \
     error_message, source, retry_count, status, created_at";

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_wallet(row: PgRow) -> Result<Wallet> {
        Ok(Wallet {
            id: WalletId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner: UserId::new(row.try_get::<String, _>("owner")?),
            balance: row.try_get("balance")?,
            currency: row.try_get("currency")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_reservation(row: PgRow) -> Result<Reservation> {
        Ok(Reservation {
            id: ReservationId::from_uuid(row.try_get::<Uuid, _>("id")?),
            payment_id: PaymentId::from_uuid(row.try_get::<Uuid, _>("payment_id")?),
            owner: UserId::new(row.try_get::<String, _>("owner")?),
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            status: row
                .try_get::<String, _>("status")?
                .parse::<ReservationStatus>()?,
            release_reason: row.try_get("release_reason")?,
            gateway_ref: row.try_get("gateway_ref")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            owner: UserId::new(row.try_get::<String, _>("owner")?),
            service_id: row.try_get("service_id")?,
            amount: row.try_get("amount")?,
            currency: row.try_get("currency")?,
            description: row.try_get("description")?,
            status: row
                .try_get::<String, _>("status")?
                .parse::<PaymentStatus>()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_failed_event(row: PgRow) -> Result<FailedEvent> {
        let retry_count: i32 = row.try_get("retry_count")?;
        Ok(FailedEvent {
            message_id: row.try_get("message_id")?,
            original_event: row.try_get("original_event")?,
            event_kind: row.try_get("event_kind")?,
            payment_id: row
                .try_get::<Option<Uuid>, _>("payment_id")?
                .map(PaymentId::from_uuid),
            error_message: row.try_get("error_message")?,
            source: row.try_get("source")?,
            retry_count: u32::try_from(retry_count).map_err(|_| {
                StoreError::InvalidData(format!("negative retry count {retry_count}"))
            })?,
            status: FailedEventStatus::Failed,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Maps a unique-constraint violation to `Duplicate`.
fn duplicate_or(e: sqlx::Error, entity: &'static str, id: String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Duplicate { entity, id };
    }
    StoreError::Database(e)
}

#[async_trait]
impl WalletStore for PostgresStore {
    async fn insert_wallet(&self, wallet: Wallet) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, owner, balance, currency, version, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(wallet.id.as_uuid())
        .bind(wallet.owner.as_str())
        .bind(wallet.balance)
        .bind(&wallet.currency)
        .bind(wallet.version)
        .bind(wallet.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "wallet", wallet.id.to_string()))?;
        Ok(())
    }

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_wallet).transpose()
    }

    async fn find_wallet_by_owner(&self, owner: &UserId) -> Result<Option<Wallet>> {
        let sql = format!("SELECT {WALLET_COLUMNS} FROM wallets WHERE owner = $1 LIMIT 1");
        let row = sqlx::query(&sql)
            .bind(owner.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_wallet).transpose()
    }

    async fn debit_wallet(&self, debit: WalletDebit) -> Result<Wallet> {
        let sql = format!(
            r#"
            UPDATE wallets
            SET balance = balance - $3, version = version + 1, updated_at = $4
            WHERE id = $1 AND version = $2 AND balance >= $3
            RETURNING {WALLET_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(debit.wallet_id.as_uuid())
            .bind(debit.expected_version)
            .bind(debit.amount)
            .bind(debit.at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Self::row_to_wallet(row);
        }

        // Nothing matched; re-read to report which condition failed.
        let current = self
            .get_wallet(debit.wallet_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "wallet",
                id: debit.wallet_id.to_string(),
            })?;

        if current.version != debit.expected_version {
            return Err(StoreError::ConcurrencyConflict {
                wallet_id: current.id,
                expected: debit.expected_version,
                actual: current.version,
            });
        }
        Err(StoreError::InsufficientBalance {
            wallet_id: current.id,
            balance: current.balance,
            requested: debit.amount,
        })
    }
}

#[async_trait]
impl ReservationStore for PostgresStore {
    async fn insert_reservation(&self, reservation: Reservation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO reservations (id, payment_id, owner, amount, currency, status,
                release_reason, gateway_ref, created_at, expires_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(reservation.id.as_uuid())
        .bind(reservation.payment_id.as_uuid())
        .bind(reservation.owner.as_str())
        .bind(reservation.amount)
        .bind(&reservation.currency)
        .bind(reservation.status.as_str())
        .bind(&reservation.release_reason)
        .bind(&reservation.gateway_ref)
        .bind(reservation.created_at)
        .bind(reservation.expires_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "reservation", reservation.id.to_string()))?;
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        let sql = format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_reservation).transpose()
    }

    async fn reservations_for_payment(&self, payment_id: PaymentId) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE payment_id = $1 ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(payment_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn expired_reservations(&self, now: DateTime<Utc>) -> Result<Vec<Reservation>> {
        let sql = format!(
            "SELECT {RESERVATION_COLUMNS} FROM reservations \
             WHERE status = 'active' AND expires_at <= $1 ORDER BY expires_at ASC"
        );
        let rows = sqlx::query(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn stranded_releases(&self, reason: &str) -> Result<Vec<Reservation>> {
        let sql = format!(
            r#"
            SELECT {RESERVATION_COLUMNS} FROM reservations r
            WHERE status = 'released' AND release_reason = $1
              AND EXISTS (
                  SELECT 1 FROM payments p
                  WHERE p.id = r.payment_id AND p.status = 'pending'
              )
              AND NOT EXISTS (
                  SELECT 1 FROM reservations o
                  WHERE o.payment_id = r.payment_id AND o.status IN ('active', 'confirmed')
              )
            ORDER BY updated_at ASC
            "#
        );
        let rows = sqlx::query(&sql).bind(reason).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_reservation).collect()
    }

    async fn transition_reservation(
        &self,
        transition: ReservationTransition,
    ) -> Result<Reservation> {
        let sql = format!(
            r#"
            UPDATE reservations
            SET status = $3,
                release_reason = COALESCE($4, release_reason),
                gateway_ref = COALESCE($5, gateway_ref),
                updated_at = $6
            WHERE id = $1 AND status = $2
            RETURNING {RESERVATION_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(transition.reservation_id.as_uuid())
            .bind(transition.from.as_str())
            .bind(transition.to.as_str())
            .bind(&transition.release_reason)
            .bind(&transition.gateway_ref)
            .bind(transition.at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Self::row_to_reservation(row);
        }

        let current = self
            .get_reservation(transition.reservation_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "reservation",
                id: transition.reservation_id.to_string(),
            })?;
        Err(StoreError::StatusConflict {
            entity: "reservation",
            id: current.id.to_string(),
            expected: transition.from.to_string(),
            actual: current.status.to_string(),
        })
    }
}

#[async_trait]
impl PaymentStore for PostgresStore {
    async fn insert_payment(&self, payment: Payment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, owner, service_id, amount, currency, description, status,
                created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.owner.as_str())
        .bind(&payment.service_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.description)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| duplicate_or(e, "payment", payment.id.to_string()))?;
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_payment).transpose()
    }

    async fn transition_payment(
        &self,
        id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let sql = format!(
            r#"
            UPDATE payments SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .bind(from.as_str())
            .bind(to.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return Self::row_to_payment(row);
        }

        let current = self
            .get_payment(id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "payment",
                id: id.to_string(),
            })?;
        Err(StoreError::StatusConflict {
            entity: "payment",
            id: id.to_string(),
            expected: from.to_string(),
            actual: current.status.to_string(),
        })
    }
}

#[async_trait]
impl FailedEventStore for PostgresStore {
    async fn insert_failed_event(&self, event: FailedEvent) -> Result<bool> {
        let retry_count = i32::try_from(event.retry_count).unwrap_or(i32::MAX);
        let result = sqlx::query(
            r#"
            INSERT INTO failed_events (message_id, original_event, event_kind, payment_id,
                error_message, source, retry_count, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(&event.message_id)
        .bind(&event.original_event)
        .bind(&event.event_kind)
        .bind(event.payment_id.map(|id| id.as_uuid()))
        .bind(&event.error_message)
        .bind(&event.source)
        .bind(retry_count)
        .bind(event.status.as_str())
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_failed_event(&self, message_id: &str) -> Result<Option<FailedEvent>> {
        let sql = format!("SELECT {FAILED_EVENT_COLUMNS} FROM failed_events WHERE message_id = $1");
        let row = sqlx::query(&sql)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_failed_event).transpose()
    }

    async fn list_failed_events(&self) -> Result<Vec<FailedEvent>> {
        let sql = format!("SELECT {FAILED_EVENT_COLUMNS} FROM failed_events ORDER BY created_at ASC");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_failed_event).collect()
    }
}
