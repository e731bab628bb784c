//! Payment registry: intake records and their advisory status.

use chrono::Utc;
use common::{PaymentId, UserId};
use rust_decimal::Decimal;
use store::{Payment, PaymentStatus, PaymentStore, StoreError};

use crate::error::{LedgerError, Result};
use crate::wallet::ensure_storable;

/// A payment request as received at intake.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub owner: UserId,
    pub service_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
}

impl NewPayment {
    fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(LedgerError::Validation("user_id is required".to_string()));
        }
        if self.service_id.trim().is_empty() {
            return Err(LedgerError::Validation("service_id is required".to_string()));
        }
        if self.amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        ensure_storable(self.amount)?;
        if self.currency.trim().is_empty() {
            return Err(LedgerError::Validation("currency is required".to_string()));
        }
        Ok(())
    }
}

/// Creates payments and records their final status.
///
/// Payment status is bookkeeping only; reservations and wallets are the
/// authority on where the funds are.
#[derive(Clone)]
pub struct PaymentRegistry<S: PaymentStore> {
    store: S,
}

impl<S: PaymentStore> PaymentRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validates and stores a new pending payment.
    #[tracing::instrument(skip(self))]
    pub async fn create(&self, request: NewPayment) -> Result<Payment> {
        request.validate()?;

        let now = Utc::now();
        let payment = Payment {
            id: PaymentId::new(),
            owner: request.owner,
            service_id: request.service_id,
            amount: request.amount,
            currency: request.currency,
            description: request.description,
            status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payment(payment.clone()).await?;

        tracing::info!(payment_id = %payment.id, amount = %payment.amount, "payment created");
        Ok(payment)
    }

    pub async fn get(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or(LedgerError::PaymentNotFound(id))
    }

    /// Marks a pending payment completed. No-op if it already is.
    pub async fn mark_completed(&self, id: PaymentId) -> Result<Payment> {
        self.finish(id, PaymentStatus::Completed).await
    }

    /// Marks a pending payment failed. No-op if it already is.
    pub async fn mark_failed(&self, id: PaymentId) -> Result<Payment> {
        self.finish(id, PaymentStatus::Failed).await
    }

    #[tracing::instrument(skip(self))]
    async fn finish(&self, id: PaymentId, status: PaymentStatus) -> Result<Payment> {
        let payment = self.get(id).await?;
        if payment.status == status {
            return Ok(payment);
        }
        if payment.status.is_terminal() {
            return Err(invalid_transition(&payment, status));
        }

        match self
            .store
            .transition_payment(id, PaymentStatus::Pending, status, Utc::now())
            .await
        {
            Ok(updated) => {
                tracing::info!(%status, "payment finished");
                Ok(updated)
            }
            Err(StoreError::StatusConflict { .. }) => {
                let current = self.get(id).await?;
                if current.status == status {
                    Ok(current)
                } else {
                    Err(invalid_transition(&current, status))
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn invalid_transition(payment: &Payment, target: PaymentStatus) -> LedgerError {
    LedgerError::InvalidTransition {
        entity: "payment",
        id: payment.id.to_string(),
        status: payment.status.to_string(),
        action: match target {
            PaymentStatus::Completed => "complete",
            PaymentStatus::Failed => "fail",
            PaymentStatus::Pending => "reopen",
        },
    }
}
