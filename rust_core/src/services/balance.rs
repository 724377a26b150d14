//! Account balance and transaction ledger.
//!
//! The only mutation path for `user_profiles.account_balance_cents`.
//! Every operation locks the profile row, writes the new balance, and
//! appends a ledger row carrying balance_before / balance_after, all
//! inside one transaction. Replaying the ledger reconstructs the
//! balance exactly.

use anyhow::{bail, Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};

use crate::models::{AccountTransaction, TransactionStatus, TransactionType};
use crate::utils::money::Money;

/// Minimum withdrawal amount.
pub const MIN_WITHDRAWAL: Money = Money::from_cents(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WithdrawalOutcome {
    Accepted {
        transaction_id: i64,
        balance_after: Money,
    },
    InsufficientFunds {
        available: Money,
    },
    BelowMinimum {
        minimum: Money,
    },
}

struct LockedProfile {
    balance: Money,
    low_balance_threshold: Money,
    alert_sent: bool,
}

/// Lock the profile row for update, creating it on first touch.
async fn lock_profile(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
) -> Result<LockedProfile> {
    sqlx::query("INSERT INTO user_profiles (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await
        .context("failed to ensure user profile")?;

    let row = sqlx::query(
        r#"
        SELECT account_balance_cents, low_balance_threshold_cents, low_balance_alert_sent
        FROM user_profiles WHERE user_id = $1 FOR UPDATE
        "#,
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await
    .context("failed to lock user profile")?;

    Ok(LockedProfile {
        balance: Money::from_cents(row.try_get("account_balance_cents")?),
        low_balance_threshold: Money::from_cents(row.try_get("low_balance_threshold_cents")?),
        alert_sent: row.try_get("low_balance_alert_sent")?,
    })
}

async fn insert_transaction(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    transaction_type: TransactionType,
    amount: Money,
    balance_before: Money,
    balance_after: Money,
    status: TransactionStatus,
    description: &str,
    related_payment_id: Option<i64>,
    related_payout_id: Option<i64>,
) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO account_transactions
            (user_id, transaction_type, amount_cents, balance_before_cents,
             balance_after_cents, status, description, related_payment_id, related_payout_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(transaction_type.as_str())
    .bind(amount.cents())
    .bind(balance_before.cents())
    .bind(balance_after.cents())
    .bind(status.as_str())
    .bind(description)
    .bind(related_payment_id)
    .bind(related_payout_id)
    .fetch_one(&mut **tx)
    .await
    .context("failed to append ledger row")?;

    Ok(row.try_get("id")?)
}

/// Add funds within an open transaction (winnings, refunds).
///
/// Clears the low-balance alert flag so the next dip re-alerts.
pub async fn credit_on(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: Money,
    description: &str,
    related_payout_id: Option<i64>,
) -> Result<i64> {
    let profile = lock_profile(tx, user_id).await?;
    let balance_after = profile.balance + amount;

    sqlx::query(
        r#"
        UPDATE user_profiles
        SET account_balance_cents = $1, low_balance_alert_sent = FALSE
        WHERE user_id = $2
        "#,
    )
    .bind(balance_after.cents())
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .context("failed to credit balance")?;

    let id = insert_transaction(
        tx,
        user_id,
        TransactionType::Deposit,
        amount,
        profile.balance,
        balance_after,
        TransactionStatus::Completed,
        description,
        None,
        related_payout_id,
    )
    .await?;

    info!(user_id, %amount, %balance_after, "balance credited");
    Ok(id)
}

/// Deduct funds within an open transaction (entry fees).
///
/// Returns Ok(None) when the balance is insufficient; nothing is
/// written in that case. Crossing the low-balance threshold sets the
/// alert flag; delivery of the alert itself is external.
pub async fn debit_on(
    tx: &mut Transaction<'_, Postgres>,
    user_id: i64,
    amount: Money,
    description: &str,
    related_payment_id: Option<i64>,
) -> Result<Option<i64>> {
    let profile = lock_profile(tx, user_id).await?;
    if profile.balance < amount {
        warn!(
            user_id,
            available = %profile.balance,
            requested = %amount,
            "insufficient balance for debit"
        );
        return Ok(None);
    }

    let balance_after = profile.balance - amount;
    let trip_alert = balance_after < profile.low_balance_threshold && !profile.alert_sent;

    sqlx::query(
        r#"
        UPDATE user_profiles
        SET account_balance_cents = $1,
            low_balance_alert_sent = low_balance_alert_sent OR $2
        WHERE user_id = $3
        "#,
    )
    .bind(balance_after.cents())
    .bind(trip_alert)
    .bind(user_id)
    .execute(&mut **tx)
    .await
    .context("failed to debit balance")?;

    if trip_alert {
        info!(user_id, %balance_after, "low balance alert flagged");
    }

    let id = insert_transaction(
        tx,
        user_id,
        TransactionType::Payment,
        amount,
        profile.balance,
        balance_after,
        TransactionStatus::Completed,
        description,
        related_payment_id,
        None,
    )
    .await?;

    info!(user_id, %amount, %balance_after, "balance debited");
    Ok(Some(id))
}

/// Standalone credit in its own transaction.
pub async fn credit(
    pool: &PgPool,
    user_id: i64,
    amount: Money,
    description: &str,
    related_payout_id: Option<i64>,
) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let id = credit_on(&mut tx, user_id, amount, description, related_payout_id).await?;
    tx.commit().await?;
    Ok(id)
}

/// Standalone debit in its own transaction.
pub async fn debit(
    pool: &PgPool,
    user_id: i64,
    amount: Money,
    description: &str,
    related_payment_id: Option<i64>,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let id = debit_on(&mut tx, user_id, amount, description, related_payment_id).await?;
    if id.is_some() {
        tx.commit().await?;
    }
    Ok(id)
}

/// Start a withdrawal. The funds leave the balance immediately; the
/// ledger row stays pending until external settlement completes.
pub async fn withdraw(
    pool: &PgPool,
    user_id: i64,
    amount: Money,
    method: &str,
) -> Result<WithdrawalOutcome> {
    if amount < MIN_WITHDRAWAL {
        return Ok(WithdrawalOutcome::BelowMinimum {
            minimum: MIN_WITHDRAWAL,
        });
    }

    let mut tx = pool.begin().await?;
    let profile = lock_profile(&mut tx, user_id).await?;
    if profile.balance < amount {
        return Ok(WithdrawalOutcome::InsufficientFunds {
            available: profile.balance,
        });
    }

    let balance_after = profile.balance - amount;
    sqlx::query("UPDATE user_profiles SET account_balance_cents = $1 WHERE user_id = $2")
        .bind(balance_after.cents())
        .bind(user_id)
        .execute(&mut *tx)
        .await
        .context("failed to deduct withdrawal")?;

    let transaction_id = insert_transaction(
        &mut tx,
        user_id,
        TransactionType::Withdrawal,
        amount,
        profile.balance,
        balance_after,
        TransactionStatus::Pending,
        &format!("Withdrawal to {}", method),
        None,
        None,
    )
    .await?;
    tx.commit().await?;

    info!(user_id, %amount, method, "withdrawal initiated");
    Ok(WithdrawalOutcome::Accepted {
        transaction_id,
        balance_after,
    })
}

/// Current balance; zero for users without a profile row.
pub async fn get_balance(pool: &PgPool, user_id: i64) -> Result<Money> {
    let row = sqlx::query("SELECT account_balance_cents FROM user_profiles WHERE user_id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await
        .context("failed to read balance")?;

    Ok(match row {
        Some(row) => Money::from_cents(row.try_get("account_balance_cents")?),
        None => Money::zero(),
    })
}

/// Fold a user's ordered ledger and verify it reconstructs the balance.
///
/// Failed and cancelled rows are skipped; pending withdrawals count
/// because the funds already left the balance. Errors on any break in
/// the before/after chain.
pub fn replay_balance(transactions: &[AccountTransaction]) -> Result<Money> {
    let mut running = Money::zero();
    for t in transactions {
        if matches!(
            t.status,
            TransactionStatus::Failed | TransactionStatus::Cancelled
        ) {
            continue;
        }
        if t.balance_before != running {
            bail!(
                "ledger discontinuity at transaction {}: expected balance {}, recorded {}",
                t.id,
                running,
                t.balance_before
            );
        }
        running = running + t.transaction_type.signed_delta(t.amount);
        if t.balance_after != running {
            bail!(
                "ledger mismatch at transaction {}: computed {}, recorded {}",
                t.id,
                running,
                t.balance_after
            );
        }
    }
    Ok(running)
}
