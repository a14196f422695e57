//! PostgreSQL database client implementation.
//!
//! Every balance change is a single conditional `UPDATE ... RETURNING` on the
//! wallet row, and every multi-row change runs in one database transaction
//! that holds that row lock until commit.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, DatabaseClient, DatabaseError, ExternalTransfer, FinalizeCommand, FinalizeResult,
    LedgerStore, LimitGuard, NewDebit, NewLoad, NewTransfer, Page, PageParams, SettlementOutcome,
    SpendingLimits, Transaction, TransactionStatus, TransactionType, TransferFilters,
    TransferStore, TransferSummary, Wallet, WalletError, WalletStatus, WalletStore,
};

const WALLET_COLUMNS: &str = "id, user_id, balance, currency, status, daily_limit, \
    monthly_limit, per_transaction_limit, ai_daily_limit, ai_per_transaction_limit, \
    created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, wallet_id, transaction_type, amount, balance_after, \
    status, description, gateway_order_id, gateway_payment_id, reference_id, failure_reason, \
    created_at, updated_at";

const TRANSFER_COLUMNS: &str = "id, wallet_id, amount, fee, total_amount, recipient_type, \
    recipient_value, recipient_name, description, channel, status, external_id, retry_count, \
    max_retries, balance_before, balance_after, transaction_id, refund_transaction_id, \
    reference_id, idempotency_key, failure_reason, next_attempt_at, submitted_at, \
    completed_at, created_at, updated_at";

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL database client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_wallet(row: &PgRow) -> Result<Wallet, AppError> {
        Ok(Wallet {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            balance: row.try_get("balance")?,
            currency: row.try_get("currency")?,
            status: parse_column(row, "status")?,
            limits: SpendingLimits {
                daily_limit: row.try_get("daily_limit")?,
                monthly_limit: row.try_get("monthly_limit")?,
                per_transaction_limit: row.try_get("per_transaction_limit")?,
                ai_daily_limit: row.try_get("ai_daily_limit")?,
                ai_per_transaction_limit: row.try_get("ai_per_transaction_limit")?,
            },
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transaction(row: &PgRow) -> Result<Transaction, AppError> {
        Ok(Transaction {
            id: row.try_get("id")?,
            wallet_id: row.try_get("wallet_id")?,
            transaction_type: parse_column(row, "transaction_type")?,
            amount: row.try_get("amount")?,
            balance_after: row.try_get("balance_after")?,
            status: parse_column(row, "status")?,
            description: row.try_get("description")?,
            gateway_order_id: row.try_get("gateway_order_id")?,
            gateway_payment_id: row.try_get("gateway_payment_id")?,
            reference_id: row.try_get("reference_id")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_transfer(row: &PgRow) -> Result<ExternalTransfer, AppError> {
        Ok(ExternalTransfer {
            id: row.try_get("id")?,
            wallet_id: row.try_get("wallet_id")?,
            amount: row.try_get("amount")?,
            fee: row.try_get("fee")?,
            total_amount: row.try_get("total_amount")?,
            recipient_type: parse_column(row, "recipient_type")?,
            recipient_value: row.try_get("recipient_value")?,
            recipient_name: row.try_get("recipient_name")?,
            description: row.try_get("description")?,
            channel: parse_column(row, "channel")?,
            status: parse_column(row, "status")?,
            external_id: row.try_get("external_id")?,
            retry_count: row.try_get("retry_count")?,
            max_retries: row.try_get("max_retries")?,
            balance_before: row.try_get("balance_before")?,
            balance_after: row.try_get("balance_after")?,
            transaction_id: row.try_get("transaction_id")?,
            refund_transaction_id: row.try_get("refund_transaction_id")?,
            reference_id: row.try_get("reference_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            failure_reason: row.try_get("failure_reason")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
            submitted_at: row.try_get("submitted_at")?,
            completed_at: row.try_get("completed_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_transfer_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        let sql = format!(
            "SELECT {} FROM external_transfers WHERE {} = $1",
            TRANSFER_COLUMNS, column
        );
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, AppError>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.try_get(column)?;
    raw.parse()
        .map_err(|e: String| AppError::Database(DatabaseError::Query(e)))
}

/// Why a conditional wallet update matched no row
async fn wallet_rejection(
    conn: &mut PgConnection,
    wallet_id: &str,
    required: Option<Decimal>,
) -> Result<AppError, AppError> {
    let row = sqlx::query("SELECT status, balance FROM wallets WHERE id = $1")
        .bind(wallet_id)
        .fetch_optional(&mut *conn)
        .await?;
    let Some(row) = row else {
        return Ok(WalletError::NotFound(wallet_id.to_string()).into());
    };
    let status: WalletStatus = parse_column(&row, "status")?;
    if status != WalletStatus::Active {
        return Ok(WalletError::NotActive {
            wallet_id: wallet_id.to_string(),
            status: status.to_string(),
        }
        .into());
    }
    Ok(WalletError::InsufficientFunds {
        available: row.try_get("balance")?,
        required: required.unwrap_or_default(),
    }
    .into())
}

/// Decrement the balance if it covers `amount`, locking the wallet row
async fn debit_wallet(
    conn: &mut PgConnection,
    wallet_id: &str,
    amount: Decimal,
) -> Result<Decimal, AppError> {
    let row = sqlx::query(
        r#"
        UPDATE wallets
        SET balance = balance - $2, updated_at = NOW()
        WHERE id = $1 AND status = 'active' AND balance >= $2
        RETURNING balance
        "#,
    )
    .bind(wallet_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("balance")?),
        None => Err(wallet_rejection(conn, wallet_id, Some(amount)).await?),
    }
}

/// Increment the balance of an active wallet, locking the wallet row
async fn credit_wallet(
    conn: &mut PgConnection,
    wallet_id: &str,
    amount: Decimal,
) -> Result<Decimal, AppError> {
    let row = sqlx::query(
        r#"
        UPDATE wallets
        SET balance = balance + $2, updated_at = NOW()
        WHERE id = $1 AND status = 'active'
        RETURNING balance
        "#,
    )
    .bind(wallet_id)
    .bind(amount)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.try_get("balance")?),
        None => Err(wallet_rejection(conn, wallet_id, None).await?),
    }
}

async fn outbound_usage_on(
    conn: &mut PgConnection,
    wallet_id: &str,
    since: DateTime<Utc>,
    assistant_only: bool,
) -> Result<Decimal, AppError> {
    let row = sqlx::query(
        r#"
        SELECT
            COALESCE((
                SELECT SUM(total_amount) FROM external_transfers
                WHERE wallet_id = $1
                  AND created_at >= $2
                  AND status IN ('pending', 'processing', 'success')
                  AND ($3 = FALSE OR channel = 'assistant')
            ), 0)
            + CASE WHEN $3 THEN 0 ELSE COALESCE((
                SELECT SUM(amount) FROM transactions
                WHERE wallet_id = $1
                  AND created_at >= $2
                  AND transaction_type = 'debit'
                  AND status = 'success'
            ), 0) END AS used
        "#,
    )
    .bind(wallet_id)
    .bind(since)
    .bind(assistant_only)
    .fetch_one(&mut *conn)
    .await?;
    Ok(row.try_get("used")?)
}

/// Re-check windowed limits once the wallet row is locked
async fn enforce_guard(
    conn: &mut PgConnection,
    wallet_id: &str,
    guard: &LimitGuard,
    requested: Decimal,
) -> Result<(), AppError> {
    for window in &guard.windows {
        let used = outbound_usage_on(conn, wallet_id, window.since, window.assistant_only).await?;
        window.check(used, requested)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn insert_transaction(
    conn: &mut PgConnection,
    id: &str,
    wallet_id: &str,
    transaction_type: TransactionType,
    amount: Decimal,
    balance_after: Decimal,
    status: TransactionStatus,
    description: Option<&str>,
    reference_id: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO transactions (
            id, wallet_id, transaction_type, amount, balance_after, status,
            description, reference_id, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
        "#,
    )
    .bind(id)
    .bind(wallet_id)
    .bind(transaction_type.as_str())
    .bind(amount)
    .bind(balance_after)
    .bind(status.as_str())
    .bind(description)
    .bind(reference_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

fn push_transfer_filters<'a>(
    builder: &mut QueryBuilder<'a, Postgres>,
    wallet_id: &'a str,
    filters: &TransferFilters,
) {
    builder.push(" WHERE wallet_id = ").push_bind(wallet_id);
    if let Some(status) = filters.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(recipient_type) = filters.recipient_type {
        builder
            .push(" AND recipient_type = ")
            .push_bind(recipient_type.as_str());
    }
    if let Some(from) = filters.from {
        builder.push(" AND created_at >= ").push_bind(from);
    }
    if let Some(to) = filters.to {
        builder.push(" AND created_at < ").push_bind(to);
    }
}

#[async_trait]
impl WalletStore for PostgresClient {
    #[instrument(skip(self))]
    async fn create_wallet(&self, wallet_id: &str, user_id: &str) -> Result<Wallet, AppError> {
        let wallet = Wallet::new(wallet_id.to_string(), user_id.to_string());
        let sql = format!(
            r#"
            INSERT INTO wallets (
                id, user_id, balance, currency, status, daily_limit, monthly_limit,
                per_transaction_limit, ai_daily_limit, ai_per_transaction_limit,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11)
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&wallet.id)
            .bind(&wallet.user_id)
            .bind(wallet.balance)
            .bind(&wallet.currency)
            .bind(wallet.status.as_str())
            .bind(wallet.limits.daily_limit)
            .bind(wallet.limits.monthly_limit)
            .bind(wallet.limits.per_transaction_limit)
            .bind(wallet.limits.ai_daily_limit)
            .bind(wallet.limits.ai_per_transaction_limit)
            .bind(wallet.created_at)
            .fetch_one(&self.pool)
            .await?;
        Self::row_to_wallet(&row)
    }

    #[instrument(skip(self))]
    async fn get_wallet(&self, wallet_id: &str) -> Result<Wallet, AppError> {
        let sql = format!("SELECT {} FROM wallets WHERE id = $1", WALLET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()))?;
        Self::row_to_wallet(&row)
    }

    #[instrument(skip(self))]
    async fn get_wallet_by_user(&self, user_id: &str) -> Result<Option<Wallet>, AppError> {
        let sql = format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_wallet).transpose()
    }

    #[instrument(skip(self))]
    async fn reserve(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError> {
        let mut conn = self.pool.acquire().await?;
        debit_wallet(&mut conn, wallet_id, amount).await
    }

    #[instrument(skip(self))]
    async fn release(&self, wallet_id: &str, amount: Decimal) -> Result<Decimal, AppError> {
        let mut conn = self.pool.acquire().await?;
        credit_wallet(&mut conn, wallet_id, amount).await
    }

    #[instrument(skip(self))]
    async fn set_wallet_status(
        &self,
        wallet_id: &str,
        status: WalletStatus,
    ) -> Result<Wallet, AppError> {
        let sql = format!(
            "UPDATE wallets SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(status.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()))?;
        Self::row_to_wallet(&row)
    }

    #[instrument(skip(self, limits))]
    async fn update_limits(
        &self,
        wallet_id: &str,
        limits: &SpendingLimits,
    ) -> Result<Wallet, AppError> {
        let sql = format!(
            r#"
            UPDATE wallets
            SET daily_limit = $2, monthly_limit = $3, per_transaction_limit = $4,
                ai_daily_limit = $5, ai_per_transaction_limit = $6, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            WALLET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(limits.daily_limit)
            .bind(limits.monthly_limit)
            .bind(limits.per_transaction_limit)
            .bind(limits.ai_daily_limit)
            .bind(limits.ai_per_transaction_limit)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| WalletError::NotFound(wallet_id.to_string()))?;
        Self::row_to_wallet(&row)
    }
}

#[async_trait]
impl LedgerStore for PostgresClient {
    #[instrument(skip(self, load), fields(wallet_id = %load.wallet_id, amount = %load.amount))]
    async fn record_load(&self, load: &NewLoad) -> Result<Transaction, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let balance_after = credit_wallet(&mut tx, &load.wallet_id, load.amount).await?;

        let sql = format!(
            r#"
            INSERT INTO transactions (
                id, wallet_id, transaction_type, amount, balance_after, status,
                gateway_order_id, gateway_payment_id, reference_id, created_at, updated_at
            )
            VALUES ($1, $2, 'load', $3, $4, 'success', $5, $6, $7, $8, $8)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        );
        // A replayed gateway callback fails here on the unique payment id
        let row = sqlx::query(&sql)
            .bind(&load.transaction_id)
            .bind(&load.wallet_id)
            .bind(load.amount)
            .bind(balance_after)
            .bind(&load.gateway_order_id)
            .bind(&load.gateway_payment_id)
            .bind(&load.reference_id)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
        let txn = Self::row_to_transaction(&row)?;
        tx.commit().await?;
        Ok(txn)
    }

    #[instrument(skip(self, debit), fields(wallet_id = %debit.wallet_id, amount = %debit.amount))]
    async fn record_debit(&self, debit: &NewDebit) -> Result<Transaction, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let balance_after = debit_wallet(&mut tx, &debit.wallet_id, debit.amount).await?;
        enforce_guard(&mut tx, &debit.wallet_id, &debit.guard, debit.amount).await?;
        insert_transaction(
            &mut tx,
            &debit.transaction_id,
            &debit.wallet_id,
            TransactionType::Debit,
            debit.amount,
            balance_after,
            TransactionStatus::Success,
            debit.description.as_deref(),
            &debit.reference_id,
            now,
        )
        .await?;
        tx.commit().await?;

        self.get_transaction(&debit.transaction_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(debit.transaction_id.clone())))
    }

    #[instrument(skip(self))]
    async fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, AppError> {
        let sql = format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_transaction).transpose()
    }

    #[instrument(skip(self))]
    async fn list_transactions(
        &self,
        wallet_id: &str,
        page: &PageParams,
    ) -> Result<Page<Transaction>, AppError> {
        let total: i64 =
            sqlx::query("SELECT COUNT(*) AS total FROM transactions WHERE wallet_id = $1")
                .bind(wallet_id)
                .fetch_one(&self.pool)
                .await?
                .try_get("total")?;

        let sql = format!(
            "SELECT {} FROM transactions WHERE wallet_id = $1 ORDER BY seq DESC LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(page.per_page)
            .bind(page.offset())
            .fetch_all(&self.pool)
            .await?;
        let items = rows
            .iter()
            .map(Self::row_to_transaction)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page::new(items, page, total))
    }

    #[instrument(skip(self))]
    async fn ledger_entries(&self, wallet_id: &str) -> Result<Vec<Transaction>, AppError> {
        let sql = format!(
            "SELECT {} FROM transactions WHERE wallet_id = $1 ORDER BY seq ASC",
            TRANSACTION_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(wallet_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_transaction).collect()
    }

    #[instrument(skip(self))]
    async fn outbound_usage(
        &self,
        wallet_id: &str,
        since: DateTime<Utc>,
        assistant_only: bool,
    ) -> Result<Decimal, AppError> {
        let mut conn = self.pool.acquire().await?;
        outbound_usage_on(&mut conn, wallet_id, since, assistant_only).await
    }
}

#[async_trait]
impl TransferStore for PostgresClient {
    #[instrument(skip(self, transfer), fields(wallet_id = %transfer.wallet_id, total = %transfer.total_amount))]
    async fn create_transfer(&self, transfer: &NewTransfer) -> Result<ExternalTransfer, AppError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let balance_after = debit_wallet(&mut tx, &transfer.wallet_id, transfer.total_amount).await?;
        enforce_guard(
            &mut tx,
            &transfer.wallet_id,
            &transfer.guard,
            transfer.total_amount,
        )
        .await?;

        insert_transaction(
            &mut tx,
            &transfer.transaction_id,
            &transfer.wallet_id,
            TransactionType::ExternalTransfer,
            transfer.total_amount,
            balance_after,
            TransactionStatus::Pending,
            transfer.description.as_deref(),
            &transfer.transaction_reference_id,
            now,
        )
        .await?;

        let sql = format!(
            r#"
            INSERT INTO external_transfers (
                id, wallet_id, amount, fee, total_amount, recipient_type, recipient_value,
                recipient_name, description, channel, status, retry_count, max_retries,
                balance_before, balance_after, transaction_id, reference_id, idempotency_key,
                next_attempt_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending', 0, $11,
                    $12, $13, $14, $15, $16, $17, $17, $17)
            RETURNING {}
            "#,
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&transfer.transfer_id)
            .bind(&transfer.wallet_id)
            .bind(transfer.amount)
            .bind(transfer.fee)
            .bind(transfer.total_amount)
            .bind(transfer.recipient_type.as_str())
            .bind(&transfer.recipient_value)
            .bind(&transfer.recipient_name)
            .bind(&transfer.description)
            .bind(transfer.channel.as_str())
            .bind(transfer.max_retries)
            .bind(balance_after + transfer.total_amount)
            .bind(balance_after)
            .bind(&transfer.transaction_id)
            .bind(&transfer.reference_id)
            .bind(&transfer.idempotency_key)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;
        let created = Self::row_to_transfer(&row)?;

        tx.commit().await?;
        Ok(created)
    }

    #[instrument(skip(self))]
    async fn get_transfer(&self, id: &str) -> Result<Option<ExternalTransfer>, AppError> {
        self.fetch_transfer_where("id", id).await
    }

    #[instrument(skip(self))]
    async fn get_transfer_by_idempotency_key(
        &self,
        wallet_id: &str,
        key: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        let sql = format!(
            "SELECT {} FROM external_transfers WHERE wallet_id = $1 AND idempotency_key = $2",
            TRANSFER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    #[instrument(skip(self))]
    async fn get_transfer_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        self.fetch_transfer_where("external_id", external_id).await
    }

    #[instrument(skip(self))]
    async fn get_transfer_by_reference(
        &self,
        reference_id: &str,
    ) -> Result<Option<ExternalTransfer>, AppError> {
        self.fetch_transfer_where("reference_id", reference_id)
            .await
    }

    #[instrument(skip(self, filters))]
    async fn list_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<(Vec<ExternalTransfer>, i64), AppError> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) AS total FROM external_transfers");
        push_transfer_filters(&mut count, wallet_id, filters);
        let total: i64 = count
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("total")?;

        let page = filters.page_params();
        let mut query =
            QueryBuilder::new(format!("SELECT {} FROM external_transfers", TRANSFER_COLUMNS));
        push_transfer_filters(&mut query, wallet_id, filters);
        query
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(page.per_page)
            .push(" OFFSET ")
            .push_bind(page.offset());
        let rows = query.build().fetch_all(&self.pool).await?;
        let transfers = rows
            .iter()
            .map(Self::row_to_transfer)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((transfers, total))
    }

    #[instrument(skip(self, filters))]
    async fn summarize_transfers(
        &self,
        wallet_id: &str,
        filters: &TransferFilters,
    ) -> Result<TransferSummary, AppError> {
        let mut query = QueryBuilder::new(
            r#"
            SELECT
                COUNT(*) AS total_count,
                COUNT(*) FILTER (WHERE status = 'success') AS success_count,
                COUNT(*) FILTER (WHERE status IN ('failed', 'cancelled', 'refunded')) AS failed_count,
                COUNT(*) FILTER (WHERE status IN ('pending', 'processing')) AS pending_count,
                COALESCE(SUM(amount) FILTER (WHERE status = 'success'), 0) AS total_amount,
                COALESCE(SUM(fee) FILTER (WHERE status = 'success'), 0) AS total_fees
            FROM external_transfers
            "#,
        );
        push_transfer_filters(&mut query, wallet_id, filters);
        let row = query.build().fetch_one(&self.pool).await?;

        let success_count: i64 = row.try_get("success_count")?;
        let failed_count: i64 = row.try_get("failed_count")?;
        Ok(TransferSummary {
            total_count: row.try_get("total_count")?,
            success_count,
            failed_count,
            pending_count: row.try_get("pending_count")?,
            success_rate: TransferSummary::rate(success_count, failed_count),
            total_amount: row.try_get("total_amount")?,
            total_fees: row.try_get("total_fees")?,
        })
    }

    #[instrument(skip(self))]
    async fn mark_processing(
        &self,
        id: &str,
        external_id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE external_transfers
            SET status = 'processing', external_id = $2, submitted_at = NOW(),
                next_attempt_at = $3, failure_reason = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(external_id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    async fn record_submission_failure(
        &self,
        id: &str,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE external_transfers
            SET retry_count = retry_count + 1, failure_reason = $2,
                next_attempt_at = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(next_attempt_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("pending transfer {}", id))))?;
        Ok(row.try_get("retry_count")?)
    }

    #[instrument(skip(self))]
    async fn schedule_next_attempt(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE external_transfers
            SET next_attempt_at = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(id)
        .bind(next_attempt_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip(self, command), fields(id = %command.transfer_id, outcome = ?command.outcome))]
    async fn finalize_transfer(
        &self,
        command: &FinalizeCommand,
    ) -> Result<FinalizeResult, AppError> {
        let now = Utc::now();
        let status = command.outcome.transfer_status();
        let mut tx = self.pool.begin().await?;

        // Row lock on the transfer serializes concurrent finalizers
        let claimed = sqlx::query(
            r#"
            UPDATE external_transfers
            SET status = $2, failure_reason = COALESCE($3, failure_reason),
                completed_at = $4, next_attempt_at = NULL, updated_at = $4
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING wallet_id, total_amount, transaction_id, reference_id
            "#,
        )
        .bind(&command.transfer_id)
        .bind(status.as_str())
        .bind(&command.reason)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(claimed) = claimed else {
            drop(tx);
            let current = self
                .get_transfer(&command.transfer_id)
                .await?
                .ok_or_else(|| {
                    AppError::Database(DatabaseError::NotFound(format!(
                        "transfer {}",
                        command.transfer_id
                    )))
                })?;
            return Ok(FinalizeResult::AlreadyTerminal(current));
        };

        let wallet_id: String = claimed.try_get("wallet_id")?;
        let total: Decimal = claimed.try_get("total_amount")?;
        let transaction_id: String = claimed.try_get("transaction_id")?;
        let reference_id: String = claimed.try_get("reference_id")?;

        let entry_status = match command.outcome {
            SettlementOutcome::Success => TransactionStatus::Success,
            SettlementOutcome::Cancelled => TransactionStatus::Cancelled,
            SettlementOutcome::Failed | SettlementOutcome::Reversed => TransactionStatus::Failed,
        };
        sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, failure_reason = $3, updated_at = $4
            WHERE id = $1
            "#,
        )
        .bind(&transaction_id)
        .bind(entry_status.as_str())
        .bind(&command.reason)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if command.outcome.requires_refund() {
            let balance_after = credit_wallet(&mut tx, &wallet_id, total).await?;
            let description = format!("Refund for transfer {}", reference_id);
            insert_transaction(
                &mut tx,
                &command.refund_transaction_id,
                &wallet_id,
                TransactionType::Refund,
                total,
                balance_after,
                TransactionStatus::Success,
                Some(&description),
                &command.refund_reference_id,
                now,
            )
            .await?;
            sqlx::query(
                "UPDATE external_transfers SET refund_transaction_id = $2 WHERE id = $1",
            )
            .bind(&command.transfer_id)
            .bind(&command.refund_transaction_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        let transfer = self
            .get_transfer(&command.transfer_id)
            .await?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(command.transfer_id.clone())))?;
        Ok(FinalizeResult::Applied(transfer))
    }

    #[instrument(skip(self))]
    async fn due_transfers(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExternalTransfer>, AppError> {
        let sql = format!(
            r#"
            SELECT {}
            FROM external_transfers
            WHERE status IN ('pending', 'processing')
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY next_attempt_at ASC NULLS FIRST, created_at ASC
            LIMIT $2
            "#,
            TRANSFER_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(now)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_transfer).collect()
    }
}

#[async_trait]
impl DatabaseClient for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }
}
