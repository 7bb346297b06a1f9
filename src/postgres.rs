//! PostgreSQL sink.
//!
//! Writes to the `ledgers`, `transactions`, `operations`, `contract_events`
//! and `ingestion_state` tables. The schema is managed outside this crate.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row};

use crate::models::{ContractEvent, Ledger, LedgerBatch, Operation, Transaction};
use crate::sink::{LedgerSink, SinkError};

/// Connection options for the Postgres sink.
#[derive(Debug, Clone)]
pub struct PostgresOptions {
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for PostgresOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            connect_timeout_secs: 30,
        }
    }
}

/// Cheaply cloneable, wraps a connection pool.
#[derive(Clone)]
pub struct PostgresSink {
    pool: PgPool,
}

fn storage(err: sqlx::Error) -> SinkError {
    SinkError::Storage(err.to_string())
}

impl PostgresSink {
    pub async fn connect(database_url: &str) -> Result<Self, SinkError> {
        Self::connect_with_options(database_url, PostgresOptions::default()).await
    }

    pub async fn connect_with_options(database_url: &str, opts: PostgresOptions) -> Result<Self, SinkError> {
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .min_connections(opts.min_connections)
            .acquire_timeout(Duration::from_secs(opts.connect_timeout_secs))
            .connect(database_url)
            .await
            .map_err(|err| SinkError::Storage(format!("postgres connect: {}", err)))?;

        log::info!("postgres sink connected");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

type PgTransaction = sqlx::Transaction<'static, Postgres>;

async fn store_ledger(tx: &mut PgTransaction, ledger: &Ledger) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ledgers (sequence, hash, previous_hash, transaction_count,
            operation_count, closed_at, total_coins, fee_pool, base_fee,
            base_reserve, max_tx_set_size, protocol_version, ledger_header)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
         ON CONFLICT (sequence) DO NOTHING",
    )
    .bind(i64::from(ledger.sequence))
    .bind(&ledger.hash)
    .bind(&ledger.previous_hash)
    .bind(i64::from(ledger.transaction_count))
    .bind(i64::from(ledger.operation_count))
    .bind(ledger.closed_at)
    .bind(ledger.total_coins)
    .bind(ledger.fee_pool)
    .bind(i64::from(ledger.base_fee))
    .bind(i64::from(ledger.base_reserve))
    .bind(i64::from(ledger.max_tx_set_size))
    .bind(i64::from(ledger.protocol_version))
    .bind(Json(ledger))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn store_transaction(tx: &mut PgTransaction, transaction: &Transaction) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO transactions (id, hash, ledger, index, source_account, fee_paid,
            operation_count, created_at, memo_type, memo_value, successful,
            envelope_xdr, result_xdr, result_meta_xdr)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&transaction.id)
    .bind(&transaction.hash)
    .bind(i64::from(transaction.ledger))
    .bind(i64::from(transaction.index))
    .bind(&transaction.source_account)
    .bind(transaction.fee_paid)
    .bind(i64::from(transaction.operation_count))
    .bind(transaction.created_at)
    .bind(&transaction.memo_type)
    .bind(&transaction.memo_value)
    .bind(transaction.successful)
    .bind(&transaction.envelope_xdr)
    .bind(&transaction.result_xdr)
    .bind(&transaction.result_meta_xdr)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn store_operation(tx: &mut PgTransaction, op: &Operation) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO operations (id, transaction_id, index, type, source_account, details)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&op.id)
    .bind(&op.transaction_id)
    .bind(i64::from(op.index))
    .bind(op.op_type.as_str())
    .bind(&op.source_account)
    .bind(Json(&op.details))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn store_event(tx: &mut PgTransaction, event: &ContractEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO contract_events (id, contract_id, ledger, transaction_hash,
            event_type, topics, data, in_successful_tx)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&event.id)
    .bind(event.contract_id.as_deref().unwrap_or_default())
    .bind(i64::from(event.ledger))
    .bind(&event.transaction_hash)
    .bind(event.event_type.as_str())
    .bind(Json(&event.topics))
    .bind(Json(&event.data))
    .bind(event.in_successful_tx)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn update_ingestion_state(tx: &mut PgTransaction, last_ledger: u32) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO ingestion_state (id, last_ledger, updated_at)
         VALUES (1, $1, $2)
         ON CONFLICT (id) DO UPDATE SET
            last_ledger = EXCLUDED.last_ledger,
            updated_at = EXCLUDED.updated_at",
    )
    .bind(i64::from(last_ledger))
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[async_trait]
impl LedgerSink for PostgresSink {
    async fn load_checkpoint(&self) -> Result<u32, SinkError> {
        let row = sqlx::query("SELECT last_ledger FROM ingestion_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        match row {
            Some(row) => {
                let last_ledger: i64 = row.try_get("last_ledger").map_err(storage)?;
                u32::try_from(last_ledger)
                    .map_err(|_| SinkError::Storage(format!("last_ledger {} out of range", last_ledger)))
            }
            None => Ok(0),
        }
    }

    async fn persist(&self, batch: &LedgerBatch) -> Result<(), SinkError> {
        // dropping the transaction on an early return rolls it back
        let mut tx = self.pool.begin().await.map_err(storage)?;

        store_ledger(&mut tx, &batch.ledger).await.map_err(storage)?;
        for transaction in &batch.transactions {
            store_transaction(&mut tx, transaction).await.map_err(storage)?;
        }
        for op in &batch.operations {
            store_operation(&mut tx, op).await.map_err(storage)?;
        }
        for event in &batch.events {
            store_event(&mut tx, event).await.map_err(storage)?;
        }
        update_ingestion_state(&mut tx, batch.sequence()).await.map_err(storage)?;

        tx.commit().await.map_err(storage)?;

        log::debug!("committed ledger {}", batch.sequence());
        Ok(())
    }
}
