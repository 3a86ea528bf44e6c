//! SQLite-backed store of transaction attempts
//!
//! Every broadcast attempt becomes a row; rows are never deleted. Status is
//! the only mutable column, so the table doubles as the audit trail of each
//! send request.

use crate::error::{SenderError, SenderResult};
use crate::tx::TxType;

use chrono::{DateTime, Utc};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::to_checksum;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::{debug, info};

/// Lifecycle status of one attempt.
///
/// The integer values are stable; downstream consumers read them raw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    Pending = 1,
    Replaced = 2,
    ConfirmedSuccess = 3,
    ConfirmedFailed = 4,
}

impl TxStatus {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(TxStatus::Pending),
            2 => Some(TxStatus::Replaced),
            3 => Some(TxStatus::ConfirmedSuccess),
            4 => Some(TxStatus::ConfirmedFailed),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Replaced => "replaced",
            TxStatus::ConfirmedSuccess => "confirmed_success",
            TxStatus::ConfirmedFailed => "confirmed_failed",
        }
    }

    fn is_terminal(self) -> bool {
        matches!(self, TxStatus::ConfirmedSuccess | TxStatus::ConfirmedFailed)
    }
}

/// Which upstream service an attempt belongs to. Treated opaquely here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderType {
    Unknown = 0,
    CommitBatch = 1,
    FinalizeBatch = 2,
    L1GasOracle = 3,
    L2GasOracle = 4,
}

impl SenderType {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            1 => SenderType::CommitBatch,
            2 => SenderType::FinalizeBatch,
            3 => SenderType::L1GasOracle,
            4 => SenderType::L2GasOracle,
            _ => SenderType::Unknown,
        }
    }
}

/// The quadruple that segregates one sender's rows from another's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub sender_type: SenderType,
    pub service: String,
    pub name: String,
    pub address: Address,
}

/// One signed broadcast, as persisted.
///
/// `raw_tx` carries the signed RLP so a resubmission can recover the payload
/// after a restart without any in-memory state.
#[derive(Debug, Clone)]
pub struct TxAttempt {
    pub hash: H256,
    pub context_id: String,
    pub identity: SenderIdentity,
    pub tx_type: TxType,
    pub nonce: u64,
    pub gas_price: U256,
    pub gas_tip_cap: U256,
    pub gas_fee_cap: U256,
    pub gas_limit: u64,
    pub submit_block_number: u64,
    pub status: TxStatus,
    pub raw_tx: Bytes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Store for the `pending_transactions` table
pub struct PendingStore {
    pool: SqlitePool,
}

impl PendingStore {
    /// Open (and create if missing) the database at `url`.
    pub async fn connect(url: &str) -> SenderResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| SenderError::Config(format!("invalid database url {}: {}", url, e)))?
            .create_if_missing(true);

        // SQLite serializes writers; one pooled connection also keeps
        // in-memory databases alive for their whole lifetime.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> SenderResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pending_transactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                hash TEXT NOT NULL UNIQUE,
                context_id TEXT NOT NULL,
                sender_type INTEGER NOT NULL,
                sender_service TEXT NOT NULL,
                sender_name TEXT NOT NULL,
                sender_address TEXT NOT NULL,
                tx_type INTEGER NOT NULL,
                nonce BIGINT NOT NULL,
                gas_price TEXT NOT NULL,
                gas_tip_cap TEXT NOT NULL,
                gas_fee_cap TEXT NOT NULL,
                gas_limit BIGINT NOT NULL,
                submit_block_number BIGINT NOT NULL,
                status INTEGER NOT NULL,
                raw_tx BLOB NOT NULL,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pending_sender_status
            ON pending_transactions (sender_type, status)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_pending_context
            ON pending_transactions (context_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Store migrations complete");
        Ok(())
    }

    /// Insert a fresh attempt. Fails on a duplicate hash.
    pub async fn insert(&self, attempt: &TxAttempt) -> SenderResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_transactions
                (hash, context_id, sender_type, sender_service, sender_name, sender_address,
                 tx_type, nonce, gas_price, gas_tip_cap, gas_fee_cap, gas_limit,
                 submit_block_number, status, raw_tx, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(hash_text(attempt.hash))
        .bind(&attempt.context_id)
        .bind(attempt.identity.sender_type.as_i64())
        .bind(&attempt.identity.service)
        .bind(&attempt.identity.name)
        .bind(to_checksum(&attempt.identity.address, None))
        .bind(attempt.tx_type.as_u8() as i64)
        .bind(attempt.nonce as i64)
        .bind(attempt.gas_price.to_string())
        .bind(attempt.gas_tip_cap.to_string())
        .bind(attempt.gas_fee_cap.to_string())
        .bind(attempt.gas_limit as i64)
        .bind(attempt.submit_block_number as i64)
        .bind(attempt.status.as_i64())
        .bind(attempt.raw_tx.to_vec())
        .bind(attempt.created_at)
        .bind(attempt.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(hash = %hash_text(attempt.hash), context_id = %attempt.context_id, "attempt inserted");
        Ok(())
    }

    /// Move an attempt to `status`, enforcing legal lifecycle transitions.
    pub async fn mark_status(&self, hash: H256, status: TxStatus) -> SenderResult<()> {
        let current = self
            .get_status(hash)
            .await?
            .ok_or_else(|| SenderError::TxNotFound {
                hash: hash_text(hash),
            })?;

        if current == status {
            return Ok(());
        }
        let legal = match current {
            TxStatus::Pending => true,
            TxStatus::Replaced => status.is_terminal(),
            _ => false,
        };
        if !legal {
            return Err(SenderError::InvalidStatusTransition {
                from: current.name(),
                to: status.name(),
            });
        }

        sqlx::query("UPDATE pending_transactions SET status = $1, updated_at = $2 WHERE hash = $3")
            .bind(status.as_i64())
            .bind(Utc::now())
            .bind(hash_text(hash))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn get_status(&self, hash: H256) -> SenderResult<Option<TxStatus>> {
        let row = sqlx::query("SELECT status FROM pending_transactions WHERE hash = $1")
            .bind(hash_text(hash))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let raw: i64 = r.get("status");
                Ok(Some(TxStatus::from_i64(raw).ok_or_else(|| {
                    decode_err(format!("unknown status value {}", raw))
                })?))
            }
            None => Ok(None),
        }
    }

    /// Outstanding attempts for one identity: Replaced rows first, then
    /// Pending, each in insertion order, so the most recent Pending is last.
    pub async fn list_pending_or_replaced(
        &self,
        identity: &SenderIdentity,
        limit: u64,
    ) -> SenderResult<Vec<TxAttempt>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM pending_transactions
            WHERE sender_type = $1 AND sender_service = $2 AND sender_name = $3
              AND sender_address = $4 AND status IN (1, 2)
            ORDER BY status DESC, id ASC
            LIMIT $5
            "#,
        )
        .bind(identity.sender_type.as_i64())
        .bind(&identity.service)
        .bind(&identity.name)
        .bind(to_checksum(&identity.address, None))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn get_by_context(&self, context_id: &str) -> SenderResult<Vec<TxAttempt>> {
        let rows =
            sqlx::query("SELECT * FROM pending_transactions WHERE context_id = $1 ORDER BY id ASC")
                .bind(context_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_attempt).collect()
    }

    pub async fn count_by_context(&self, context_id: &str) -> SenderResult<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pending_transactions WHERE context_id = $1")
            .bind(context_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    /// Highest nonce ever persisted for this identity, for nonce recovery at
    /// startup.
    pub async fn max_nonce(&self, identity: &SenderIdentity) -> SenderResult<Option<u64>> {
        let row = sqlx::query(
            r#"
            SELECT MAX(nonce) AS max_nonce FROM pending_transactions
            WHERE sender_type = $1 AND sender_service = $2 AND sender_name = $3
              AND sender_address = $4
            "#,
        )
        .bind(identity.sender_type.as_i64())
        .bind(&identity.service)
        .bind(&identity.name)
        .bind(to_checksum(&identity.address, None))
        .fetch_one(&self.pool)
        .await?;

        let max: Option<i64> = row.get("max_nonce");
        Ok(max.map(|n| n as u64))
    }

    /// Atomically record a resubmission: the new attempt becomes Pending and
    /// the old row moves to Replaced, or neither happens.
    pub async fn replace(&self, old_hash: H256, new_attempt: &TxAttempt) -> SenderResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO pending_transactions
                (hash, context_id, sender_type, sender_service, sender_name, sender_address,
                 tx_type, nonce, gas_price, gas_tip_cap, gas_fee_cap, gas_limit,
                 submit_block_number, status, raw_tx, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(hash_text(new_attempt.hash))
        .bind(&new_attempt.context_id)
        .bind(new_attempt.identity.sender_type.as_i64())
        .bind(&new_attempt.identity.service)
        .bind(&new_attempt.identity.name)
        .bind(to_checksum(&new_attempt.identity.address, None))
        .bind(new_attempt.tx_type.as_u8() as i64)
        .bind(new_attempt.nonce as i64)
        .bind(new_attempt.gas_price.to_string())
        .bind(new_attempt.gas_tip_cap.to_string())
        .bind(new_attempt.gas_fee_cap.to_string())
        .bind(new_attempt.gas_limit as i64)
        .bind(new_attempt.submit_block_number as i64)
        .bind(new_attempt.status.as_i64())
        .bind(new_attempt.raw_tx.to_vec())
        .bind(new_attempt.created_at)
        .bind(new_attempt.updated_at)
        .execute(&mut *tx)
        .await?;

        let updated = sqlx::query(
            "UPDATE pending_transactions SET status = $1, updated_at = $2 WHERE hash = $3 AND status = $4",
        )
        .bind(TxStatus::Replaced.as_i64())
        .bind(Utc::now())
        .bind(hash_text(old_hash))
        .bind(TxStatus::Pending.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(SenderError::InvalidStatusTransition {
                from: "non-pending",
                to: TxStatus::Replaced.name(),
            });
        }

        tx.commit().await?;
        Ok(())
    }

    /// Atomically terminate every attempt at `nonce`: the mined hash takes
    /// its receipt-derived status, every other sibling becomes
    /// ConfirmedFailed. At most one attempt per nonce can ever be mined.
    pub async fn finalize_nonce(
        &self,
        identity: &SenderIdentity,
        nonce: u64,
        mined_hash: H256,
        mined_status: TxStatus,
    ) -> SenderResult<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        sqlx::query("UPDATE pending_transactions SET status = $1, updated_at = $2 WHERE hash = $3")
            .bind(mined_status.as_i64())
            .bind(now)
            .bind(hash_text(mined_hash))
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            UPDATE pending_transactions SET status = $1, updated_at = $2
            WHERE sender_type = $3 AND sender_service = $4 AND sender_name = $5
              AND sender_address = $6 AND nonce = $7 AND hash != $8 AND status IN (1, 2)
            "#,
        )
        .bind(TxStatus::ConfirmedFailed.as_i64())
        .bind(now)
        .bind(identity.sender_type.as_i64())
        .bind(&identity.service)
        .bind(&identity.name)
        .bind(to_checksum(&identity.address, None))
        .bind(nonce as i64)
        .bind(hash_text(mined_hash))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

fn hash_text(hash: H256) -> String {
    format!("{:#x}", hash)
}

fn decode_err(msg: String) -> SenderError {
    SenderError::Store(sqlx::Error::Decode(msg.into()))
}

fn row_to_attempt(row: &SqliteRow) -> SenderResult<TxAttempt> {
    let hash_raw: String = row.get("hash");
    let address_raw: String = row.get("sender_address");
    let tx_type_raw: i64 = row.get("tx_type");
    let status_raw: i64 = row.get("status");

    Ok(TxAttempt {
        hash: H256::from_str(&hash_raw).map_err(|e| decode_err(format!("bad hash: {}", e)))?,
        context_id: row.get("context_id"),
        identity: SenderIdentity {
            sender_type: SenderType::from_i64(row.get("sender_type")),
            service: row.get("sender_service"),
            name: row.get("sender_name"),
            address: Address::from_str(&address_raw)
                .map_err(|e| decode_err(format!("bad sender address: {}", e)))?,
        },
        tx_type: TxType::from_u8(tx_type_raw as u8)
            .ok_or_else(|| decode_err(format!("unknown tx type {}", tx_type_raw)))?,
        nonce: row.get::<i64, _>("nonce") as u64,
        gas_price: parse_u256(row, "gas_price")?,
        gas_tip_cap: parse_u256(row, "gas_tip_cap")?,
        gas_fee_cap: parse_u256(row, "gas_fee_cap")?,
        gas_limit: row.get::<i64, _>("gas_limit") as u64,
        submit_block_number: row.get::<i64, _>("submit_block_number") as u64,
        status: TxStatus::from_i64(status_raw)
            .ok_or_else(|| decode_err(format!("unknown status value {}", status_raw)))?,
        raw_tx: Bytes::from(row.get::<Vec<u8>, _>("raw_tx")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn parse_u256(row: &SqliteRow, column: &str) -> SenderResult<U256> {
    let raw: String = row.get(column);
    U256::from_dec_str(&raw).map_err(|e| decode_err(format!("bad {}: {}", column, e)))
}
