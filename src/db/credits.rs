use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// Atomic per-account credit balance. The ledger knows nothing about jobs;
/// the lifecycle controller is responsible for calling `deduct` exactly once
/// per generation attempt (keyed off the job's `credits_consumed` flag) and
/// `refund` exactly once per failed attempt that had a deduction.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Conditional decrement: returns false when the balance is
    /// insufficient. Never lets a balance go negative and never runs as a
    /// read-then-write pair.
    async fn deduct(&self, user_id: &str, amount: i64) -> Result<bool, sqlx::Error>;

    /// Unconditional increment. Always succeeds for a known user.
    async fn refund(&self, user_id: &str, amount: i64) -> Result<(), sqlx::Error>;

    async fn balance(&self, user_id: &str) -> Result<i64, sqlx::Error>;

    /// Seed or top up an account (subscription collaborator entry point).
    async fn grant(&self, user_id: &str, amount: i64) -> Result<(), sqlx::Error>;
}

/// Postgres-backed [`CreditLedger`].
#[derive(Clone)]
pub struct PgCreditLedger {
    pool: PgPool,
}

impl PgCreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CreditLedger for PgCreditLedger {
    async fn deduct(&self, user_id: &str, amount: i64) -> Result<bool, sqlx::Error> {
        // The sufficiency check and the decrement are one statement, so two
        // concurrent generation attempts cannot both pass the check.
        let result = sqlx::query(
            r#"
            UPDATE user_credits
            SET balance = balance - $1, updated_at = NOW()
            WHERE user_id = $2 AND balance >= $1
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn refund(&self, user_id: &str, amount: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE user_credits
            SET balance = balance + $1, updated_at = NOW()
            WHERE user_id = $2
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn balance(&self, user_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT balance FROM user_credits WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(r) => r.try_get("balance")?,
            None => 0,
        })
    }

    async fn grant(&self, user_id: &str, amount: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO user_credits (user_id, balance)
            VALUES ($1, $2)
            ON CONFLICT (user_id)
            DO UPDATE SET balance = user_credits.balance + $2, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(amount)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
