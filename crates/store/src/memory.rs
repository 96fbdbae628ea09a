use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, ProductId, UserId};
use domain::{Account, LocalProduct, LocalUser, Notification, Order};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    AccountRepository, IdempotencyRepository, LocalProductRepository, LocalUserRepository,
    LockGuard, LockManager, NewOutboxEvent, NotificationRepository, OrderRepository, OutboxEvent,
    OutboxRepository, RepositoryProvider, Result, SagaLogRepository, SagaRecord, Store,
    StoreError, Transaction,
};

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, Order>,
    accounts: HashMap<UserId, Account>,
    users: HashMap<UserId, LocalUser>,
    products: HashMap<ProductId, LocalProduct>,
    notifications: Vec<Notification>,
    outbox: Vec<OutboxEvent>,
    idempotency: HashSet<(String, String)>,
    sagas: HashMap<String, SagaRecord>,
}

/// Writes buffered by a transaction until commit.
#[derive(Default)]
struct Staged {
    orders: HashMap<OrderId, Order>,
    accounts: HashMap<UserId, Account>,
    users: HashMap<UserId, LocalUser>,
    products: HashMap<ProductId, LocalProduct>,
    notifications: Vec<Notification>,
    outbox: Vec<NewOutboxEvent>,
    published: HashSet<Uuid>,
    idempotency: HashSet<(String, String)>,
    saga_inserts: HashMap<String, SagaRecord>,
    saga_saves: HashMap<String, (SagaRecord, i64)>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.orders.is_empty()
            && self.accounts.is_empty()
            && self.users.is_empty()
            && self.products.is_empty()
            && self.notifications.is_empty()
            && self.outbox.is_empty()
            && self.published.is_empty()
            && self.idempotency.is_empty()
            && self.saga_inserts.is_empty()
            && self.saga_saves.is_empty()
    }
}

/// In-memory store for tests and single-process runs.
///
/// Transactions buffer their writes and apply them atomically on commit,
/// after re-checking idempotency keys and saga versions against committed
/// state the way the database constraints would.
#[derive(Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    locks: Arc<LockManager>,
    lock_timeout: Duration,
    fail_on_commit: Arc<AtomicBool>,
    commits: Arc<AtomicU64>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            locks: Arc::new(LockManager::new()),
            lock_timeout,
            fail_on_commit: Arc::new(AtomicBool::new(false)),
            commits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Makes every subsequent commit fail with a database error.
    pub fn set_fail_on_commit(&self, fail: bool) {
        self.fail_on_commit.store(fail, Ordering::SeqCst);
    }

    /// Number of commits that wrote at least one row.
    pub fn write_commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    /// All outbox rows, in sequence order.
    pub async fn outbox_events(&self) -> Vec<OutboxEvent> {
        self.state.read().await.outbox.clone()
    }

    pub async fn idempotency_record_count(&self) -> usize {
        self.state.read().await.idempotency.len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self, lock_names: &[String]) -> Result<InMemoryTransaction> {
        let guards = self.locks.acquire(lock_names, self.lock_timeout).await?;
        Ok(InMemoryTransaction {
            store: self.clone(),
            staged: Staged::default(),
            _guards: guards,
        })
    }
}

/// A transaction against an [`InMemoryStore`].
///
/// Reads see this transaction's own staged writes first. Dropping the
/// transaction without committing discards them and releases its locks.
pub struct InMemoryTransaction {
    store: InMemoryStore,
    staged: Staged,
    _guards: Vec<LockGuard>,
}

impl InMemoryTransaction {
    fn validate(&self, state: &State) -> Result<()> {
        for key in &self.staged.idempotency {
            if state.idempotency.contains(key) {
                return Err(StoreError::Conflict(format!(
                    "idempotency key {}/{} already recorded",
                    key.0, key.1
                )));
            }
        }
        for saga_id in self.staged.saga_inserts.keys() {
            if state.sagas.contains_key(saga_id) {
                return Err(StoreError::Conflict(format!("saga {saga_id} already exists")));
            }
        }
        for (saga_id, (_, expected)) in &self.staged.saga_saves {
            let current = state.sagas.get(saga_id).map(|r| r.version);
            if current != Some(*expected) {
                return Err(StoreError::Conflict(format!(
                    "saga {saga_id} version mismatch: expected {expected}, found {current:?}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn commit(self) -> Result<()> {
        if self.store.fail_on_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut state = self.store.state.write().await;
        self.validate(&state)?;

        let staged = self.staged;
        state.orders.extend(staged.orders);
        state.accounts.extend(staged.accounts);
        state.users.extend(staged.users);
        state.products.extend(staged.products);
        state.notifications.extend(staged.notifications);
        state.idempotency.extend(staged.idempotency);

        let now = Utc::now();
        for row in state.outbox.iter_mut() {
            if staged.published.contains(&row.event_id) && !row.published {
                row.published = true;
                row.published_at = Some(now);
            }
        }
        for event in staged.outbox {
            let sequence = state.outbox.len() as i64 + 1;
            state.outbox.push(OutboxEvent {
                sequence,
                event_id: event.event_id,
                event_type: event.event_type,
                routing_key: event.routing_key,
                correlation_id: event.correlation_id,
                payload: event.payload,
                published: false,
                created_at: event.created_at,
                published_at: None,
            });
        }

        state.sagas.extend(staged.saga_inserts);
        for (saga_id, (record, _)) in staged.saga_saves {
            state.sagas.insert(saga_id, record);
        }

        self.store.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        Ok(())
    }
}

impl RepositoryProvider for InMemoryTransaction {
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
impl OrderRepository for InMemoryTransaction {
    async fn store(&mut self, order: &Order) -> Result<()> {
        self.staged.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn find(&mut self, id: OrderId) -> Result<Option<Order>> {
        if let Some(order) = self.staged.orders.get(&id) {
            return Ok(Some(order.clone()));
        }
        Ok(self.store.state.read().await.orders.get(&id).cloned())
    }
}

#[async_trait]
impl AccountRepository for InMemoryTransaction {
    async fn store(&mut self, account: &Account) -> Result<()> {
        self.staged.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    async fn find(&mut self, user_id: UserId) -> Result<Option<Account>> {
        if let Some(account) = self.staged.accounts.get(&user_id) {
            return Ok(Some(account.clone()));
        }
        Ok(self.store.state.read().await.accounts.get(&user_id).cloned())
    }
}

#[async_trait]
impl LocalUserRepository for InMemoryTransaction {
    async fn store(&mut self, user: &LocalUser) -> Result<()> {
        self.staged.users.insert(user.user_id, user.clone());
        Ok(())
    }

    async fn find(&mut self, user_id: UserId) -> Result<Option<LocalUser>> {
        if let Some(user) = self.staged.users.get(&user_id) {
            return Ok(Some(user.clone()));
        }
        Ok(self.store.state.read().await.users.get(&user_id).cloned())
    }
}

#[async_trait]
impl LocalProductRepository for InMemoryTransaction {
    async fn store(&mut self, product: &LocalProduct) -> Result<()> {
        self.staged
            .products
            .insert(product.product_id, product.clone());
        Ok(())
    }

    async fn find(&mut self, product_id: ProductId) -> Result<Option<LocalProduct>> {
        if let Some(product) = self.staged.products.get(&product_id) {
            return Ok(Some(product.clone()));
        }
        Ok(self
            .store
            .state
            .read()
            .await
            .products
            .get(&product_id)
            .cloned())
    }

    async fn find_many(&mut self, product_ids: &[ProductId]) -> Result<Vec<LocalProduct>> {
        let state = self.store.state.read().await;
        let unique: HashSet<&ProductId> = product_ids.iter().collect();
        Ok(unique
            .into_iter()
            .filter_map(|id| {
                self.staged
                    .products
                    .get(id)
                    .or_else(|| state.products.get(id))
                    .cloned()
            })
            .collect())
    }
}

#[async_trait]
impl NotificationRepository for InMemoryTransaction {
    async fn store(&mut self, notification: &Notification) -> Result<()> {
        self.staged.notifications.push(notification.clone());
        Ok(())
    }

    async fn find_by_order(&mut self, order_id: OrderId) -> Result<Vec<Notification>> {
        let state = self.store.state.read().await;
        let mut found: Vec<_> = state
            .notifications
            .iter()
            .chain(self.staged.notifications.iter())
            .filter(|n| n.order_id == order_id)
            .cloned()
            .collect();
        found.sort_by_key(|n| n.created_at);
        Ok(found)
    }
}

#[async_trait]
impl OutboxRepository for InMemoryTransaction {
    async fn append(&mut self, event: NewOutboxEvent) -> Result<Uuid> {
        let event_id = event.event_id;
        self.staged.outbox.push(event);
        Ok(event_id)
    }

    async fn fetch_unpublished(&mut self, limit: usize) -> Result<Vec<OutboxEvent>> {
        let state = self.store.state.read().await;
        Ok(state
            .outbox
            .iter()
            .filter(|e| !e.published && !self.staged.published.contains(&e.event_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_published(&mut self, event_id: Uuid) -> Result<()> {
        self.staged.published.insert(event_id);
        Ok(())
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryTransaction {
    async fn is_processed(&mut self, consumer: &str, message_id: &str) -> Result<bool> {
        let key = (consumer.to_string(), message_id.to_string());
        if self.staged.idempotency.contains(&key) {
            return Ok(true);
        }
        Ok(self.store.state.read().await.idempotency.contains(&key))
    }

    async fn record(&mut self, consumer: &str, message_id: &str) -> Result<()> {
        let key = (consumer.to_string(), message_id.to_string());
        if !self.staged.idempotency.insert(key) {
            return Err(StoreError::Conflict(format!(
                "idempotency key {consumer}/{message_id} recorded twice"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SagaLogRepository for InMemoryTransaction {
    async fn find(&mut self, saga_id: &str) -> Result<Option<SagaRecord>> {
        if let Some((record, _)) = self.staged.saga_saves.get(saga_id) {
            return Ok(Some(record.clone()));
        }
        if let Some(record) = self.staged.saga_inserts.get(saga_id) {
            return Ok(Some(record.clone()));
        }
        Ok(self.store.state.read().await.sagas.get(saga_id).cloned())
    }

    async fn insert(&mut self, mut record: SagaRecord) -> Result<()> {
        let exists = self.staged.saga_inserts.contains_key(&record.saga_id)
            || self
                .store
                .state
                .read()
                .await
                .sagas
                .contains_key(&record.saga_id);
        if exists {
            return Err(StoreError::Conflict(format!(
                "saga {} already exists",
                record.saga_id
            )));
        }
        record.version = 1;
        self.staged.saga_inserts.insert(record.saga_id.clone(), record);
        Ok(())
    }

    async fn save(&mut self, mut record: SagaRecord, expected_version: i64) -> Result<()> {
        record.version = expected_version + 1;
        if let Some(inserted) = self.staged.saga_inserts.get_mut(&record.saga_id) {
            if inserted.version != expected_version {
                return Err(StoreError::Conflict(format!(
                    "saga {} version mismatch",
                    record.saga_id
                )));
            }
            *inserted = record;
            return Ok(());
        }

        // The original expected version is kept so commit validates against it.
        let base_expected = match self.staged.saga_saves.get(&record.saga_id) {
            Some((staged, base)) if staged.version == expected_version => *base,
            Some(_) => {
                return Err(StoreError::Conflict(format!(
                    "saga {} version mismatch",
                    record.saga_id
                )));
            }
            None => expected_version,
        };
        self.staged
            .saga_saves
            .insert(record.saga_id.clone(), (record, base_expected));
        Ok(())
    }

    async fn find_unfinished(&mut self) -> Result<Vec<SagaRecord>> {
        let state = self.store.state.read().await;
        let mut records: HashMap<String, SagaRecord> = state
            .sagas
            .iter()
            .map(|(id, r)| (id.clone(), r.clone()))
            .collect();
        for (id, record) in &self.staged.saga_inserts {
            records.insert(id.clone(), record.clone());
        }
        for (id, (record, _)) in &self.staged.saga_saves {
            records.insert(id.clone(), record.clone());
        }
        let mut unfinished: Vec<_> = records.into_values().filter(|r| !r.terminal).collect();
        unfinished.sort_by_key(|r| r.created_at);
        Ok(unfinished)
    }
}
