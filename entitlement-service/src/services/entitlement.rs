//! Entitlement evaluation: does a user hold paid, unexpired access right now.
//!
//! Status is cached on the transaction so that plain `status == paid` filters
//! stay usable. Staleness is bounded from two sides: a lapsed record is
//! flipped to `expired` when it is read through [`EntitlementEvaluator::check_access`],
//! and [`EntitlementEvaluator::expire_overdue_transactions`] sweeps the rest.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use super::metrics;
use super::repository::TransactionRepository;
use crate::error::{EntitlementError, Result};
use crate::models::{Transaction, TransactionStatus};

const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Outcome of evaluating one transaction at one instant.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessDecision {
    pub has_access: bool,
    /// The window closed and the record was (or should be) moved to `expired`.
    pub lapsed: bool,
    /// Copy of the input with its status brought in line with `has_access`.
    pub transaction: Transaction,
}

/// Pure evaluation. Never touches a store; the caller decides whether to
/// persist the expiry carried in the returned record.
pub fn evaluate_access(mut transaction: Transaction, now: DateTime<Utc>) -> AccessDecision {
    let has_access = transaction.has_access(now);
    let lapsed = transaction.access_lapsed(now);
    if lapsed {
        transaction.status = TransactionStatus::Expired;
        transaction.updated_at = now;
    }
    AccessDecision {
        has_access,
        lapsed,
        transaction,
    }
}

/// Whole days of access left, rounded up. Zero unless the transaction is
/// paid and carries an end date in the future.
pub fn remaining_days(transaction: &Transaction, now: DateTime<Utc>) -> u32 {
    if transaction.status != TransactionStatus::Paid {
        return 0;
    }
    let Some(end) = transaction.access_end_date else {
        return 0;
    };
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    let days = (millis + MILLIS_PER_DAY - 1) / MILLIS_PER_DAY;
    u32::try_from(days).unwrap_or(u32::MAX)
}

/// Entitlement view of a single user, for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessSummary {
    pub user_id: String,
    pub has_access: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_end_date: Option<DateTime<Utc>>,
    pub remaining_days: u32,
    /// Transactions found lapsed during this check.
    pub expired_transactions: usize,
}

#[derive(Clone)]
pub struct EntitlementEvaluator {
    transactions: Arc<dyn TransactionRepository>,
}

impl EntitlementEvaluator {
    pub fn new(transactions: Arc<dyn TransactionRepository>) -> Self {
        Self { transactions }
    }

    /// Evaluate `transaction` at `now`. With `persist`, a lapsed record is
    /// expired in the store through a conditional update by id that only
    /// matches while it is still paid and overdue. When another writer got
    /// there first the stored record is returned unchanged.
    pub async fn check_access(
        &self,
        transaction: Transaction,
        now: DateTime<Utc>,
        persist: bool,
    ) -> Result<AccessDecision> {
        let mut decision = evaluate_access(transaction, now);

        if decision.lapsed {
            metrics::record_access_check("lapsed");
            if persist {
                let id = decision.transaction.id.clone();
                match self.transactions.expire_lapsed_transaction(&id, now).await? {
                    Some(updated) => {
                        tracing::info!(
                            transaction_id = %id,
                            user_id = %updated.user_id,
                            access_end_date = ?updated.access_end_date,
                            "Access window lapsed, transaction expired"
                        );
                        metrics::record_expired("lazy", 1);
                        decision.transaction = updated;
                    }
                    None => {
                        let stored = self
                            .transactions
                            .find_transaction_by_id(&id)
                            .await?
                            .ok_or_else(|| EntitlementError::not_found("transaction", &id))?;

                        tracing::debug!(
                            transaction_id = %id,
                            status = %stored.status,
                            "Transaction no longer overdue in store, nothing to expire"
                        );
                        decision.has_access = stored.has_access(now);
                        decision.lapsed = stored.status == TransactionStatus::Expired;
                        decision.transaction = stored;
                    }
                }
            }
        } else if decision.has_access {
            metrics::record_access_check("granted");
        } else {
            metrics::record_access_check("denied");
        }

        Ok(decision)
    }

    /// Evaluate every paid transaction of `user_id` and report the one
    /// granting access furthest into the future.
    pub async fn check_user_access(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        persist: bool,
    ) -> Result<AccessSummary> {
        let candidates = self
            .transactions
            .find_transactions_for_user(user_id, Some(TransactionStatus::Paid))
            .await?;

        let mut active: Option<Transaction> = None;
        let mut expired_transactions = 0;

        for transaction in candidates {
            let decision = self.check_access(transaction, now, persist).await?;
            if decision.lapsed {
                expired_transactions += 1;
                continue;
            }
            if decision.has_access {
                let later = match &active {
                    Some(current) => decision.transaction.access_end_date > current.access_end_date,
                    None => true,
                };
                if later {
                    active = Some(decision.transaction);
                }
            }
        }

        tracing::debug!(
            user_id = %user_id,
            has_access = active.is_some(),
            expired_transactions,
            "Evaluated user access"
        );

        Ok(match active {
            Some(tx) => AccessSummary {
                user_id: user_id.to_string(),
                has_access: true,
                remaining_days: remaining_days(&tx, now),
                transaction_id: Some(tx.id),
                product_id: Some(tx.product_id),
                product_name: tx.product_name,
                access_end_date: tx.access_end_date,
                expired_transactions,
            },
            None => AccessSummary {
                user_id: user_id.to_string(),
                has_access: false,
                transaction_id: None,
                product_id: None,
                product_name: None,
                access_end_date: None,
                remaining_days: 0,
                expired_transactions,
            },
        })
    }

    /// Bulk backstop for records nobody reads. Errors propagate; a partially
    /// applied sweep is picked up again on the next run.
    pub async fn expire_overdue_transactions(&self, now: DateTime<Utc>) -> Result<u64> {
        let modified = self.transactions.expire_overdue_transactions(now).await?;
        if modified > 0 {
            tracing::info!(expired = modified, "Expired overdue transactions");
            metrics::record_expired("sweep", modified);
        } else {
            tracing::debug!("No overdue transactions to expire");
        }
        Ok(modified)
    }

    pub fn remaining_days(&self, transaction: &Transaction, now: DateTime<Utc>) -> u32 {
        remaining_days(transaction, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTransaction, TransactionDefaults};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 8, 0, 0).unwrap()
    }

    fn paid(end: Option<DateTime<Utc>>) -> Transaction {
        let mut tx = NewTransaction {
            user_id: "user_1".to_string(),
            stripe_session_id: "cs_1".to_string(),
            product_id: "prod_1".to_string(),
            amount: 2900,
            ..Default::default()
        }
        .into_transaction(None, &TransactionDefaults::default(), t0());
        tx.status = TransactionStatus::Paid;
        tx.access_start_date = Some(t0());
        tx.access_end_date = end;
        tx
    }

    #[test]
    fn one_second_past_end_is_lapsed() {
        let now = t0() + Duration::days(30);
        let decision = evaluate_access(paid(Some(now - Duration::seconds(1))), now);

        assert!(!decision.has_access);
        assert!(decision.lapsed);
        assert_eq!(decision.transaction.status, TransactionStatus::Expired);
    }

    #[test]
    fn one_second_before_end_has_access() {
        let now = t0() + Duration::days(30);
        let decision = evaluate_access(paid(Some(now + Duration::seconds(1))), now);

        assert!(decision.has_access);
        assert!(!decision.lapsed);
        assert_eq!(decision.transaction.status, TransactionStatus::Paid);
    }

    #[test]
    fn paid_without_end_date_has_no_access_and_is_not_lapsed() {
        let decision = evaluate_access(paid(None), t0());
        assert!(!decision.has_access);
        assert!(!decision.lapsed);
        assert_eq!(decision.transaction.status, TransactionStatus::Paid);
    }

    #[test]
    fn non_paid_statuses_never_grant_access() {
        for status in [
            TransactionStatus::Pending,
            TransactionStatus::Failed,
            TransactionStatus::Canceled,
            TransactionStatus::Expired,
        ] {
            let mut tx = paid(Some(t0() + Duration::days(10)));
            tx.status = status;
            let decision = evaluate_access(tx, t0());
            assert!(!decision.has_access);
            assert!(!decision.lapsed);
            assert_eq!(decision.transaction.status, status);
        }
    }

    #[test]
    fn remaining_days_rounds_up() {
        let tx = paid(Some(t0() + Duration::days(2) + Duration::hours(1)));
        assert_eq!(remaining_days(&tx, t0()), 3);

        let tx = paid(Some(t0() + Duration::days(2)));
        assert_eq!(remaining_days(&tx, t0()), 2);

        let tx = paid(Some(t0() + Duration::seconds(1)));
        assert_eq!(remaining_days(&tx, t0()), 1);
    }

    #[test]
    fn remaining_days_is_zero_when_not_applicable() {
        assert_eq!(remaining_days(&paid(None), t0()), 0);
        assert_eq!(remaining_days(&paid(Some(t0())), t0()), 0);
        assert_eq!(
            remaining_days(&paid(Some(t0() - Duration::days(4))), t0()),
            0
        );

        let mut pending = paid(Some(t0() + Duration::days(4)));
        pending.status = TransactionStatus::Pending;
        assert_eq!(remaining_days(&pending, t0()), 0);
    }

    #[test]
    fn remaining_days_never_negative_across_offsets() {
        let end = t0();
        for offset_hours in -72..=72 {
            let now = end + Duration::hours(offset_hours);
            for status in [
                TransactionStatus::Pending,
                TransactionStatus::Paid,
                TransactionStatus::Expired,
            ] {
                let mut tx = paid(Some(end));
                tx.status = status;
                let days = remaining_days(&tx, now);
                if now >= end || status != TransactionStatus::Paid {
                    assert_eq!(days, 0);
                } else {
                    assert!(days >= 1);
                }
            }
        }
    }
}
