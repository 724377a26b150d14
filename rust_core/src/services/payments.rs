//! Payment intake and pot accounting.
//!
//! A completed entry payment splits 80/10/10 into the weekly pool, the
//! season pot, and the company fee. Splits are computed in cents with
//! the leftover assigned to the weekly pool, so every split conserves
//! the collected amount exactly. Payment transport and signature
//! verification happen upstream; this module records outcomes.

use anyhow::{Context, Result};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;

use crate::models::Week;
use crate::services::balance;
use crate::utils::money::Money;

pub const WEEKLY_POOL_PCT: i64 = 80;
pub const SEASON_POT_PCT: i64 = 10;
pub const COMPANY_FEE_PCT: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectionSplit {
    pub weekly_pool: Money,
    pub season_pot: Money,
    pub company_fee: Money,
}

impl CollectionSplit {
    pub fn zero() -> Self {
        Self {
            weekly_pool: Money::zero(),
            season_pot: Money::zero(),
            company_fee: Money::zero(),
        }
    }

    pub fn total(&self) -> Money {
        self.weekly_pool + self.season_pot + self.company_fee
    }
}

/// Split a collected amount 80/10/10.
///
/// The pot and fee shares floor to the cent; the weekly pool takes the
/// rest, so `split.total() == amount` always holds.
pub fn split_collection(amount: Money) -> CollectionSplit {
    let season_pot = amount.percent_floor(SEASON_POT_PCT);
    let company_fee = amount.percent_floor(COMPANY_FEE_PCT);
    CollectionSplit {
        weekly_pool: amount - season_pot - company_fee,
        season_pot,
        company_fee,
    }
}

/// Season-end prize split: 50/35/15, remainder cents to first place.
pub fn season_pot_prizes(total: Money) -> (Money, Money, Money) {
    let second = total.percent_floor(35);
    let third = total.percent_floor(15);
    let first = total - second - third;
    (first, second, third)
}

/// A completed entry payment from the payment processor.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    pub user_id: i64,
    pub team_id: i64,
    pub week_id: i64,
    pub amount: Money,
    pub external_payment_id: String,
}

#[derive(Debug, Clone)]
pub struct PaymentReport {
    pub payment_id: i64,
    /// The payment was already recorded; the pools were not touched
    pub duplicate: bool,
    pub split: CollectionSplit,
}

/// Record a completed payment and fund the pools.
///
/// Idempotent per (user, team, week): a repeat of an already-paid
/// entry is reported as a duplicate and changes nothing.
pub async fn record_completed_payment(
    pool: &PgPool,
    week: &Week,
    event: &PaymentEvent,
) -> Result<PaymentReport> {
    let mut tx = pool.begin().await?;
    let report = record_completed_payment_on(&mut tx, week, event).await?;
    tx.commit().await?;
    Ok(report)
}

async fn record_completed_payment_on(
    tx: &mut Transaction<'_, Postgres>,
    week: &Week,
    event: &PaymentEvent,
) -> Result<PaymentReport> {
    let existing = sqlx::query(
        r#"
        SELECT id, payment_status FROM weekly_payments
        WHERE user_id = $1 AND team_id = $2 AND week_id = $3
        FOR UPDATE
        "#,
    )
    .bind(event.user_id)
    .bind(event.team_id)
    .bind(event.week_id)
    .fetch_optional(&mut **tx)
    .await
    .context("failed to look up payment")?;

    let payment_id = match existing {
        Some(row) => {
            let id: i64 = row.try_get("id")?;
            let status: String = row.try_get("payment_status")?;
            if status == "paid" {
                info!(
                    payment_id = id,
                    external_id = %event.external_payment_id,
                    "payment already recorded, skipping"
                );
                return Ok(PaymentReport {
                    payment_id: id,
                    duplicate: true,
                    split: CollectionSplit::zero(),
                });
            }
            sqlx::query(
                r#"
                UPDATE weekly_payments
                SET amount_cents = $1, payment_status = 'paid',
                    external_payment_id = $2, paid_at = NOW()
                WHERE id = $3
                "#,
            )
            .bind(event.amount.cents())
            .bind(&event.external_payment_id)
            .bind(id)
            .execute(&mut **tx)
            .await
            .context("failed to mark payment paid")?;
            id
        }
        None => {
            let row = sqlx::query(
                r#"
                INSERT INTO weekly_payments
                    (user_id, team_id, week_id, amount_cents, payment_status,
                     external_payment_id, paid_at)
                VALUES ($1, $2, $3, $4, 'paid', $5, NOW())
                RETURNING id
                "#,
            )
            .bind(event.user_id)
            .bind(event.team_id)
            .bind(event.week_id)
            .bind(event.amount.cents())
            .bind(&event.external_payment_id)
            .fetch_one(&mut **tx)
            .await
            .context("failed to insert payment")?;
            row.try_get("id")?
        }
    };

    let split = split_collection(event.amount);

    sqlx::query(
        r#"
        INSERT INTO weekly_prize_pools
            (team_id, week_id, total_collected_cents, weekly_pool_cents,
             season_pot_contribution_cents, company_fee_cents)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (team_id, week_id) DO UPDATE SET
            total_collected_cents =
                weekly_prize_pools.total_collected_cents + EXCLUDED.total_collected_cents,
            weekly_pool_cents =
                weekly_prize_pools.weekly_pool_cents + EXCLUDED.weekly_pool_cents,
            season_pot_contribution_cents =
                weekly_prize_pools.season_pot_contribution_cents
                + EXCLUDED.season_pot_contribution_cents,
            company_fee_cents =
                weekly_prize_pools.company_fee_cents + EXCLUDED.company_fee_cents
        "#,
    )
    .bind(event.team_id)
    .bind(event.week_id)
    .bind(event.amount.cents())
    .bind(split.weekly_pool.cents())
    .bind(split.season_pot.cents())
    .bind(split.company_fee.cents())
    .execute(&mut **tx)
    .await
    .context("failed to fund prize pool")?;

    sqlx::query(
        r#"
        INSERT INTO season_pots (team_id, season_year, total_accumulated_cents)
        VALUES ($1, $2, $3)
        ON CONFLICT (team_id, season_year) DO UPDATE SET
            total_accumulated_cents =
                season_pots.total_accumulated_cents + EXCLUDED.total_accumulated_cents
        "#,
    )
    .bind(event.team_id)
    .bind(week.season_year)
    .bind(split.season_pot.cents())
    .execute(&mut **tx)
    .await
    .context("failed to fund season pot")?;

    sqlx::query(
        r#"
        INSERT INTO user_profiles (user_id, total_lifetime_paid_cents)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET
            total_lifetime_paid_cents =
                user_profiles.total_lifetime_paid_cents + EXCLUDED.total_lifetime_paid_cents
        "#,
    )
    .bind(event.user_id)
    .bind(event.amount.cents())
    .execute(&mut **tx)
    .await
    .context("failed to update lifetime paid")?;

    info!(
        payment_id,
        user_id = event.user_id,
        team_id = event.team_id,
        week_id = event.week_id,
        amount = %event.amount,
        weekly = %split.weekly_pool,
        season = %split.season_pot,
        fee = %split.company_fee,
        "payment recorded"
    );

    Ok(PaymentReport {
        payment_id,
        duplicate: false,
        split,
    })
}

/// Pay an entry fee from the account balance.
///
/// Returns Ok(None) when the balance is insufficient; nothing is
/// written in that case.
pub async fn pay_entry_from_balance(
    pool: &PgPool,
    week: &Week,
    user_id: i64,
    team_id: i64,
    amount: Money,
) -> Result<Option<PaymentReport>> {
    let mut tx = pool.begin().await?;

    let Some(transaction_id) = balance::debit_on(
        &mut tx,
        user_id,
        amount,
        &format!("Week {} entry fee", week.week_number),
        None,
    )
    .await?
    else {
        return Ok(None);
    };

    let event = PaymentEvent {
        user_id,
        team_id,
        week_id: week.id,
        amount,
        external_payment_id: format!("balance-txn-{}", transaction_id),
    };
    let report = record_completed_payment_on(&mut tx, week, &event).await?;

    sqlx::query("UPDATE account_transactions SET related_payment_id = $1 WHERE id = $2")
        .bind(report.payment_id)
        .bind(transaction_id)
        .execute(&mut *tx)
        .await
        .context("failed to link ledger row to payment")?;

    tx.commit().await?;
    Ok(Some(report))
}

#[derive(Debug, Clone, Copy)]
pub struct SeasonPotReport {
    pub team_id: i64,
    pub season_year: i32,
    pub total: Money,
    pub first_place: Money,
    pub second_place: Money,
    pub third_place: Money,
    pub already_finalized: bool,
}

/// Lock in the season-end prize amounts for a team's pot.
pub async fn finalize_season_pot(
    pool: &PgPool,
    team_id: i64,
    season_year: i32,
) -> Result<SeasonPotReport> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT total_accumulated_cents, first_place_cents, second_place_cents,
               third_place_cents, is_finalized
        FROM season_pots
        WHERE team_id = $1 AND season_year = $2
        FOR UPDATE
        "#,
    )
    .bind(team_id)
    .bind(season_year)
    .fetch_optional(&mut *tx)
    .await
    .context("failed to lock season pot")?;

    let Some(row) = row else {
        // No pot was ever funded: report zeroes without creating a row
        return Ok(SeasonPotReport {
            team_id,
            season_year,
            total: Money::zero(),
            first_place: Money::zero(),
            second_place: Money::zero(),
            third_place: Money::zero(),
            already_finalized: false,
        });
    };

    let total = Money::from_cents(row.try_get("total_accumulated_cents")?);
    if row.try_get::<bool, _>("is_finalized")? {
        return Ok(SeasonPotReport {
            team_id,
            season_year,
            total,
            first_place: Money::from_cents(row.try_get("first_place_cents")?),
            second_place: Money::from_cents(row.try_get("second_place_cents")?),
            third_place: Money::from_cents(row.try_get("third_place_cents")?),
            already_finalized: true,
        });
    }

    let (first, second, third) = season_pot_prizes(total);
    sqlx::query(
        r#"
        UPDATE season_pots
        SET first_place_cents = $1, second_place_cents = $2,
            third_place_cents = $3, is_finalized = TRUE
        WHERE team_id = $4 AND season_year = $5
        "#,
    )
    .bind(first.cents())
    .bind(second.cents())
    .bind(third.cents())
    .bind(team_id)
    .bind(season_year)
    .execute(&mut *tx)
    .await
    .context("failed to finalize season pot")?;
    tx.commit().await?;

    info!(team_id, season_year, %total, "season pot finalized");
    Ok(SeasonPotReport {
        team_id,
        season_year,
        total,
        first_place: first,
        second_place: second,
        third_place: third,
        already_finalized: false,
    })
}
