//! PostgreSQL transaction store

use super::{TransactionStats, TransactionStore, UNRECONCILED};
use crate::config::DatabaseConfig;
use crate::error::{EngineError, EngineResult};
use crate::providers::ProviderKind;
use crate::transaction::{Leg, Received, Transaction, TransactionUpdate};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info};
use uuid::Uuid;

/// Transaction store backed by the shared PostgreSQL database
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    /// Connect a pool sized from configuration
    pub async fn new(config: &DatabaseConfig) -> EngineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Create the transaction table for development databases. Production
    /// schemas are owned by the platform's migrations.
    pub async fn bootstrap_schema(&self) -> EngineResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_transactions (
                id UUID PRIMARY KEY,
                status VARCHAR(20) NOT NULL DEFAULT 'new',
                status_code VARCHAR(40),
                status_message TEXT,
                provider VARCHAR(20),
                rate_type VARCHAR(10) NOT NULL,
                direction VARCHAR(10) NOT NULL,
                from_currency VARCHAR(20) NOT NULL,
                from_network VARCHAR(20) NOT NULL,
                to_currency VARCHAR(20) NOT NULL,
                to_network VARCHAR(20) NOT NULL,
                amount NUMERIC(38, 10) NOT NULL,
                to_address TEXT NOT NULL,
                to_tag TEXT,
                refund_address TEXT,
                refund_tag TEXT,
                final_from_currency VARCHAR(20),
                final_from_network VARCHAR(20),
                final_from_amount NUMERIC(38, 10),
                final_from_address TEXT,
                final_from_tag TEXT,
                final_to_currency VARCHAR(20),
                final_to_network VARCHAR(20),
                final_to_amount NUMERIC(38, 10),
                final_to_address TEXT,
                final_to_tag TEXT,
                final_back_currency VARCHAR(20),
                final_back_network VARCHAR(20),
                final_back_amount NUMERIC(38, 10),
                final_back_address TEXT,
                final_back_tag TEXT,
                transaction_id TEXT,
                transaction_token TEXT,
                registered_at TIMESTAMPTZ,
                expires_at TIMESTAMPTZ,
                received_from_id TEXT,
                received_from_amount NUMERIC(38, 10),
                received_from_confirmations INTEGER,
                received_to_id TEXT,
                received_to_amount NUMERIC(38, 10),
                received_to_confirmations INTEGER,
                received_back_id TEXT,
                received_back_amount NUMERIC(38, 10),
                received_back_confirmations INTEGER,
                emergency_choice VARCHAR(10) NOT NULL DEFAULT 'none',
                emergency_address TEXT,
                emergency_tag TEXT,
                is_emergency_handled BOOLEAN NOT NULL DEFAULT FALSE,
                made_emergency_action BOOLEAN NOT NULL DEFAULT FALSE,
                is_status_shown BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_exchange_transactions_status_provider
            ON exchange_transactions (status, provider)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Transaction schema ready");
        Ok(())
    }
}

/// NEW -> HANDLED claim. The status change re-arms the notification flag.
const CLAIM_NEW_SQL: &str = r#"
    UPDATE exchange_transactions
    SET status = 'handled', is_status_shown = FALSE, updated_at = NOW()
    WHERE id IN (
        SELECT id FROM exchange_transactions
        WHERE status = 'new'
        ORDER BY created_at
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    RETURNING *
"#;

fn parse_column<T>(row: &PgRow, column: &str) -> EngineResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e| EngineError::Internal(format!("column {}: {}", column, e)))
}

fn parse_optional<T>(row: &PgRow, column: &str) -> EngineResult<Option<T>>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|r| r.parse())
        .transpose()
        .map_err(|e| EngineError::Internal(format!("column {}: {}", column, e)))
}

fn leg_from_row(row: &PgRow, prefix: &str) -> Result<Leg, sqlx::Error> {
    Ok(Leg {
        currency: row.try_get(format!("{}_currency", prefix).as_str())?,
        network: row.try_get(format!("{}_network", prefix).as_str())?,
        amount: row.try_get(format!("{}_amount", prefix).as_str())?,
        address: row.try_get(format!("{}_address", prefix).as_str())?,
        tag: row.try_get(format!("{}_tag", prefix).as_str())?,
    })
}

fn received_from_row(row: &PgRow, prefix: &str) -> Result<Received, sqlx::Error> {
    Ok(Received {
        id: row.try_get(format!("{}_id", prefix).as_str())?,
        amount: row.try_get(format!("{}_amount", prefix).as_str())?,
        confirmations: row.try_get(format!("{}_confirmations", prefix).as_str())?,
    })
}

fn transaction_from_row(row: &PgRow) -> EngineResult<Transaction> {
    Ok(Transaction {
        id: row.try_get("id")?,
        status: parse_column(row, "status")?,
        status_code: parse_optional(row, "status_code")?,
        status_message: row.try_get("status_message")?,
        provider: parse_optional(row, "provider")?,
        rate_type: parse_column(row, "rate_type")?,
        direction: parse_column(row, "direction")?,
        from_currency: row.try_get("from_currency")?,
        from_network: row.try_get("from_network")?,
        to_currency: row.try_get("to_currency")?,
        to_network: row.try_get("to_network")?,
        amount: row.try_get("amount")?,
        to_address: row.try_get("to_address")?,
        to_tag: row.try_get("to_tag")?,
        refund_address: row.try_get("refund_address")?,
        refund_tag: row.try_get("refund_tag")?,
        final_from: leg_from_row(row, "final_from")?,
        final_to: leg_from_row(row, "final_to")?,
        final_back: leg_from_row(row, "final_back")?,
        transaction_id: row.try_get("transaction_id")?,
        transaction_token: row.try_get("transaction_token")?,
        registered_at: row.try_get("registered_at")?,
        expires_at: row.try_get("expires_at")?,
        received_from: received_from_row(row, "received_from")?,
        received_to: received_from_row(row, "received_to")?,
        received_back: received_from_row(row, "received_back")?,
        emergency_choice: parse_column(row, "emergency_choice")?,
        emergency_address: row.try_get("emergency_address")?,
        emergency_tag: row.try_get("emergency_tag")?,
        is_emergency_handled: row.try_get("is_emergency_handled")?,
        made_emergency_action: row.try_get("made_emergency_action")?,
        is_status_shown: row.try_get("is_status_shown")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_leg(qb: &mut QueryBuilder<'_, Postgres>, prefix: &str, leg: &Leg) {
    qb.push(format!(", {}_currency = ", prefix))
        .push_bind(leg.currency.clone());
    qb.push(format!(", {}_network = ", prefix))
        .push_bind(leg.network.clone());
    qb.push(format!(", {}_amount = ", prefix))
        .push_bind(leg.amount);
    qb.push(format!(", {}_address = ", prefix))
        .push_bind(leg.address.clone());
    qb.push(format!(", {}_tag = ", prefix))
        .push_bind(leg.tag.clone());
}

fn push_received(qb: &mut QueryBuilder<'_, Postgres>, prefix: &str, received: &Received) {
    qb.push(format!(", {}_id = ", prefix))
        .push_bind(received.id.clone());
    qb.push(format!(", {}_amount = ", prefix))
        .push_bind(received.amount);
    qb.push(format!(", {}_confirmations = ", prefix))
        .push_bind(received.confirmations);
}

fn unreconciled_list() -> String {
    UNRECONCILED
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn get(&self, id: Uuid) -> EngineResult<Transaction> {
        let row = sqlx::query("SELECT * FROM exchange_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        transaction_from_row(&row)
    }

    async fn update(&self, id: Uuid, update: &TransactionUpdate) -> EngineResult<Transaction> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE exchange_transactions SET updated_at = NOW()");

        if let Some(status) = update.status {
            qb.push(", status = ").push_bind(status.as_str());
        }
        if let Some(code) = update.status_code {
            qb.push(", status_code = ").push_bind(code.as_str());
        }
        if let Some(message) = &update.status_message {
            qb.push(", status_message = ").push_bind(message.clone());
        }
        if let Some(provider) = update.provider {
            qb.push(", provider = ").push_bind(provider.as_str());
        }
        if let Some(leg) = &update.final_from {
            push_leg(&mut qb, "final_from", leg);
        }
        if let Some(leg) = &update.final_to {
            push_leg(&mut qb, "final_to", leg);
        }
        if let Some(leg) = &update.final_back {
            push_leg(&mut qb, "final_back", leg);
        }
        if let Some(transaction_id) = &update.transaction_id {
            qb.push(", transaction_id = COALESCE(transaction_id, ")
                .push_bind(transaction_id.clone())
                .push(")");
        }
        if let Some(token) = &update.transaction_token {
            qb.push(", transaction_token = ").push_bind(token.clone());
        }
        if let Some(at) = update.registered_at {
            qb.push(", registered_at = ").push_bind(at);
        }
        if let Some(at) = update.expires_at {
            qb.push(", expires_at = ").push_bind(at);
        }
        if let Some(received) = &update.received_from {
            push_received(&mut qb, "received_from", received);
        }
        if let Some(received) = &update.received_to {
            push_received(&mut qb, "received_to", received);
        }
        if let Some(received) = &update.received_back {
            push_received(&mut qb, "received_back", received);
        }
        if let Some(choice) = update.emergency_choice {
            qb.push(", emergency_choice = ").push_bind(choice.as_str());
        }
        if let Some(flag) = update.made_emergency_action {
            qb.push(", made_emergency_action = ").push_bind(flag);
        }
        if let Some(flag) = update.is_emergency_handled {
            qb.push(", is_emergency_handled = ").push_bind(flag);
        }
        if let Some(flag) = update.is_status_shown {
            qb.push(", is_status_shown = ").push_bind(flag);
        }

        qb.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

        let row = qb
            .build()
            .fetch_optional(&self.pool)
            .await?
            .ok_or(EngineError::TransactionNotFound(id))?;

        debug!(transaction = %id, "Transaction updated");
        transaction_from_row(&row)
    }

    async fn claim_new(&self, limit: i64) -> EngineResult<Vec<Transaction>> {
        let rows = sqlx::query(CLAIM_NEW_SQL)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list_for_reconciliation(&self, provider: ProviderKind) -> EngineResult<Vec<Transaction>> {
        let sql = format!(
            r#"
            SELECT * FROM exchange_transactions
            WHERE provider = $1
              AND transaction_id IS NOT NULL
              AND status NOT IN ({})
            ORDER BY updated_at
            "#,
            unreconciled_list()
        );
        let rows = sqlx::query(&sql)
            .bind(provider.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list_resumable(&self) -> EngineResult<Vec<Transaction>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM exchange_transactions
            WHERE status NOT IN ('new', 'done', 'error')
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn stats(&self) -> EngineResult<TransactionStats> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM exchange_transactions GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut stats = TransactionStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count = row.try_get::<i64, _>("count")? as u64;
            stats.total += count;
            stats.by_status.insert(status, count);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> EngineResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
