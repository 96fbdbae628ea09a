use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use domain::{Account, LocalProduct, LocalUser, Money, Notification, Order};
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AccountRepository, IdempotencyRepository, LocalProductRepository, LocalUserRepository,
    NewOutboxEvent, NotificationRepository, OrderRepository, OutboxEvent, OutboxRepository,
    RepositoryProvider, Result, SagaLogRepository, SagaRecord, Store, StoreError, Transaction,
};

const LOCK_NOT_AVAILABLE: &str = "55P03";

/// PostgreSQL-backed store.
///
/// Named locks are transaction-scoped advisory locks, so they are released
/// by commit, rollback or a dropped connection alike.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PostgresStore {
    type Tx = PostgresTransaction;

    async fn begin(&self, lock_names: &[String]) -> Result<PostgresTransaction> {
        let mut tx = self.pool.begin().await?;

        if !lock_names.is_empty() {
            // SET does not accept bind parameters.
            let timeout_ms = self.lock_timeout.as_millis();
            sqlx::query(&format!("SET LOCAL lock_timeout = '{timeout_ms}ms'"))
                .execute(&mut *tx)
                .await?;

            for name in lock_names {
                sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
                    .bind(name)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| {
                        if let sqlx::Error::Database(ref db_err) = e
                            && db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
                        {
                            return StoreError::LockTimeout { name: name.clone() };
                        }
                        StoreError::Database(e)
                    })?;
            }
        }

        Ok(PostgresTransaction { tx })
    }
}

fn conflict_on_unique(e: sqlx::Error, describe: impl FnOnce() -> String) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e
        && db_err.is_unique_violation()
    {
        return StoreError::Conflict(describe());
    }
    StoreError::Database(e)
}

/// A transaction against a [`PostgresStore`].
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

impl PostgresTransaction {
    fn row_to_account(row: &PgRow) -> Result<Account> {
        Ok(Account {
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            balance: Money::new(row.try_get("balance")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_product(row: &PgRow) -> Result<LocalProduct> {
        Ok(LocalProduct {
            product_id: ProductId::from_uuid(row.try_get::<Uuid, _>("product_id")?),
            name: row.try_get("name")?,
            price: Money::new(row.try_get("price")?),
            source_updated_at: row.try_get("source_updated_at")?,
        })
    }

    fn row_to_outbox(row: &PgRow) -> Result<OutboxEvent> {
        Ok(OutboxEvent {
            sequence: row.try_get("sequence")?,
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            routing_key: row.try_get("routing_key")?,
            correlation_id: row.try_get("correlation_id")?,
            payload: row.try_get("payload")?,
            published: row.try_get("published")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    fn row_to_saga(row: &PgRow) -> Result<SagaRecord> {
        Ok(SagaRecord {
            saga_id: row.try_get("saga_id")?,
            saga_type: row.try_get("saga_type")?,
            step: row.try_get("step")?,
            terminal: row.try_get("terminal")?,
            payload: row.try_get("payload")?,
            version: row.try_get("version")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(self) -> Result<()> {
        self.tx.commit().await.map_err(|e| {
            conflict_on_unique(e, || "unique constraint violated at commit".to_string())
        })
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

impl RepositoryProvider for PostgresTransaction {
    fn orders(&mut self) -> &mut dyn OrderRepository {
        self
    }

    fn accounts(&mut self) -> &mut dyn AccountRepository {
        self
    }

    fn local_users(&mut self) -> &mut dyn LocalUserRepository {
        self
    }

    fn local_products(&mut self) -> &mut dyn LocalProductRepository {
        self
    }

    fn notifications(&mut self) -> &mut dyn NotificationRepository {
        self
    }

    fn outbox(&mut self) -> &mut dyn OutboxRepository {
        self
    }

    fn idempotency(&mut self) -> &mut dyn IdempotencyRepository {
        self
    }

    fn sagas(&mut self) -> &mut dyn SagaLogRepository {
        self
    }
}

#[async_trait]
impl OrderRepository for PostgresTransaction {
    async fn store(&mut self, order: &Order) -> Result<()> {
        let data = serde_json::to_value(order)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, status, total_price, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                total_price = EXCLUDED.total_price,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(order.user_id().as_uuid())
        .bind(order.status().as_str())
        .bind(order.total_price().amount())
        .bind(data)
        .bind(order.created_at())
        .bind(order.updated_at())
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find(&mut self, id: OrderId) -> Result<Option<Order>> {
        let data: Option<serde_json::Value> =
            sqlx::query_scalar("SELECT data FROM orders WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(data.map(serde_json::from_value).transpose()?)
    }
}

#[async_trait]
impl AccountRepository for PostgresTransaction {
    async fn store(&mut self, account: &Account) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO accounts (user_id, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id) DO UPDATE SET
                balance = EXCLUDED.balance,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(account.user_id.as_uuid())
        .bind(account.balance.amount())
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find(&mut self, user_id: UserId) -> Result<Option<Account>> {
        let row = sqlx::query(
            "SELECT user_id, balance, created_at, updated_at FROM accounts WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(Self::row_to_account).transpose()
    }
}

#[async_trait]
impl LocalUserRepository for PostgresTransaction {
    async fn store(&mut self, user: &LocalUser) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_users (user_id, login, source_updated_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET
                login = EXCLUDED.login,
                source_updated_at = EXCLUDED.source_updated_at
            "#,
        )
        .bind(user.user_id.as_uuid())
        .bind(&user.login)
        .bind(user.source_updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find(&mut self, user_id: UserId) -> Result<Option<LocalUser>> {
        let row = sqlx::query(
            "SELECT user_id, login, source_updated_at FROM local_users WHERE user_id = $1",
        )
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(Some(LocalUser {
                user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
                login: row.try_get("login")?,
                source_updated_at: row.try_get::<Option<DateTime<Utc>>, _>("source_updated_at")?,
            })),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LocalProductRepository for PostgresTransaction {
    async fn store(&mut self, product: &LocalProduct) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_products (product_id, name, price, source_updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (product_id) DO UPDATE SET
                name = EXCLUDED.name,
                price = EXCLUDED.price,
                source_updated_at = EXCLUDED.source_updated_at
            "#,
        )
        .bind(product.product_id.as_uuid())
        .bind(&product.name)
        .bind(product.price.amount())
        .bind(product.source_updated_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find(&mut self, product_id: ProductId) -> Result<Option<LocalProduct>> {
        let row = sqlx::query(
            "SELECT product_id, name, price, source_updated_at FROM local_products WHERE product_id = $1",
        )
        .bind(product_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn find_many(&mut self, product_ids: &[ProductId]) -> Result<Vec<LocalProduct>> {
        let ids: Vec<Uuid> = product_ids.iter().map(|id| id.as_uuid()).collect();
        let rows = sqlx::query(
            "SELECT product_id, name, price, source_updated_at FROM local_products WHERE product_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(Self::row_to_product).collect()
    }
}

#[async_trait]
impl NotificationRepository for PostgresTransaction {
    async fn store(&mut self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, order_id, user_id, message, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(notification.id)
        .bind(notification.order_id.as_uuid())
        .bind(notification.user_id.map(|id| id.as_uuid()))
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn find_by_order(&mut self, order_id: OrderId) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            r#"
            SELECT id, order_id, user_id, message, created_at
            FROM notifications
            WHERE order_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut *self.tx)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Notification {
                    id: row.try_get("id")?,
                    order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
                    user_id: row
                        .try_get::<Option<Uuid>, _>("user_id")?
                        .map(UserId::from_uuid),
                    message: row.try_get("message")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl OutboxRepository for PostgresTransaction {
    async fn append(&mut self, event: NewOutboxEvent) -> Result<Uuid> {
        let event_id = event.event_id;
        sqlx::query(
            r#"
            INSERT INTO outbox (event_id, event_type, routing_key, correlation_id, payload, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.event_type)
        .bind(&event.routing_key)
        .bind(&event.correlation_id)
        .bind(&event.payload)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("outbox event {event_id} already exists")))?;
        Ok(event_id)
    }

    async fn fetch_unpublished(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        // Rows claimed by a concurrent dispatcher are skipped, not waited on.
        let rows = sqlx::query(
            r#"
            SELECT sequence, event_id, event_type, routing_key, correlation_id, payload,
                   published, created_at, published_at
            FROM outbox
            WHERE NOT published
            ORDER BY sequence ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(Self::row_to_outbox).collect()
    }

    async fn mark_published(&mut self, event_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE outbox SET published = TRUE, published_at = NOW() WHERE event_id = $1 AND NOT published",
        )
        .bind(event_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl IdempotencyRepository for PostgresTransaction {
    async fn is_processed(&mut self, consumer: &str, message_id: &str) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM idempotency_records WHERE consumer = $1 AND message_id = $2)",
        )
        .bind(consumer)
        .bind(message_id)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(exists)
    }

    async fn record(&mut self, consumer: &str, message_id: &str) -> Result<()> {
        sqlx::query("INSERT INTO idempotency_records (consumer, message_id) VALUES ($1, $2)")
            .bind(consumer)
            .bind(message_id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| {
                conflict_on_unique(e, || {
                    format!("idempotency key {consumer}/{message_id} already recorded")
                })
            })?;
        Ok(())
    }
}

#[async_trait]
impl SagaLogRepository for PostgresTransaction {
    async fn find(&mut self, saga_id: &str) -> Result<Option<SagaRecord>> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, saga_type, step, terminal, payload, version, created_at, updated_at
            FROM saga_instances
            WHERE saga_id = $1
            "#,
        )
        .bind(saga_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.as_ref().map(Self::row_to_saga).transpose()
    }

    async fn insert(&mut self, record: SagaRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO saga_instances (saga_id, saga_type, step, terminal, payload, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7)
            "#,
        )
        .bind(&record.saga_id)
        .bind(&record.saga_type)
        .bind(&record.step)
        .bind(record.terminal)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| conflict_on_unique(e, || format!("saga {} already exists", record.saga_id)))?;
        Ok(())
    }

    async fn save(&mut self, record: SagaRecord, expected_version: i64) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE saga_instances
            SET step = $3, terminal = $4, payload = $5, version = $2 + 1, updated_at = $6
            WHERE saga_id = $1 AND version = $2
            "#,
        )
        .bind(&record.saga_id)
        .bind(expected_version)
        .bind(&record.step)
        .bind(record.terminal)
        .bind(&record.payload)
        .bind(record.updated_at)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "saga {} is no longer at version {expected_version}",
                record.saga_id
            )));
        }
        Ok(())
    }

    async fn find_unfinished(&mut self) -> Result<Vec<SagaRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT saga_id, saga_type, step, terminal, payload, version, created_at, updated_at
            FROM saga_instances
            WHERE NOT terminal
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&mut *self.tx)
        .await?;
        rows.iter().map(Self::row_to_saga).collect()
    }
}
