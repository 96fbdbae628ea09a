//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container. Run with:
//!
//! ```bash
//! cargo test -p store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{OrderId, ProductId, UserId};
use domain::{Account, LocalProduct, Money, Order, OrderItem, OrderStatus};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use store::{
    LockingUnitOfWork, NewOutboxEvent, PostgresStore, SagaRecord, Store, StoreError, Transaction,
    UnitOfWork,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_order_fulfillment.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query(
        "TRUNCATE TABLE orders, accounts, local_users, local_products, notifications, outbox, idempotency_records, saga_instances",
    )
    .execute(&pool)
    .await
    .unwrap();

    PostgresStore::new(pool, Duration::from_millis(200))
}

fn saga_record(id: &str) -> SagaRecord {
    SagaRecord {
        saga_id: id.to_string(),
        saga_type: "create_order".to_string(),
        step: "reserve_products".to_string(),
        terminal: false,
        payload: json!({"order_id": id}),
        version: 1,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
#[serial]
async fn test_order_round_trips_through_jsonb() {
    let uow = UnitOfWork::new(get_test_store().await);
    let order_id = OrderId::new();
    let product_id = ProductId::new();

    uow.execute(move |repos| {
        Box::pin(async move {
            let items = vec![OrderItem::new(product_id, 2, Money::new(40))];
            let (mut order, _) = Order::create(order_id, UserId::new(), items).unwrap();
            repos.orders().store(&order).await?;
            order.mark_as_paid().unwrap();
            repos.orders().store(&order).await
        })
    })
    .await
    .unwrap();

    let order = uow
        .execute(move |repos| Box::pin(async move { repos.orders().find(order_id).await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Paid);
    assert_eq!(order.total_price(), Money::new(80));
    assert_eq!(order.items()[0].product_id, product_id);
}

#[tokio::test]
#[serial]
async fn test_rollback_on_error_leaves_no_rows() {
    let store = get_test_store().await;
    let uow = UnitOfWork::new(store.clone());
    let user_id = UserId::new();

    let result = uow
        .execute(move |repos| {
            Box::pin(async move {
                let (account, event) = Account::open(user_id, Money::new(5)).unwrap();
                repos.accounts().store(&account).await?;
                repos
                    .outbox()
                    .append(NewOutboxEvent::from_event(&event)?)
                    .await?;
                Err::<(), _>(StoreError::Corrupt("abort".to_string()))
            })
        })
        .await;
    assert!(result.is_err());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
    let found = uow
        .execute(move |repos| Box::pin(async move { repos.accounts().find(user_id).await }))
        .await
        .unwrap();
    assert!(found.is_none());
}

#[tokio::test]
#[serial]
async fn test_find_many_products() {
    let uow = UnitOfWork::new(get_test_store().await);
    let a = ProductId::new();
    let b = ProductId::new();

    uow.execute(move |repos| {
        Box::pin(async move {
            for (id, price) in [(a, 10), (b, 20)] {
                repos
                    .local_products()
                    .store(&LocalProduct {
                        product_id: id,
                        name: format!("product-{price}"),
                        price: Money::new(price),
                        source_updated_at: None,
                    })
                    .await?;
            }
            Ok::<_, StoreError>(())
        })
    })
    .await
    .unwrap();

    let found = uow
        .execute(move |repos| {
            Box::pin(async move {
                repos
                    .local_products()
                    .find_many(&[a, b, ProductId::new()])
                    .await
            })
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
#[serial]
async fn test_duplicate_idempotency_key_conflicts() {
    let uow = UnitOfWork::new(get_test_store().await);

    uow.execute(|repos| Box::pin(async move { repos.idempotency().record("c", "m-1").await }))
        .await
        .unwrap();
    let err = uow
        .execute(|repos| Box::pin(async move { repos.idempotency().record("c", "m-1").await }))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let processed = uow
        .execute(|repos| {
            Box::pin(async move { repos.idempotency().is_processed("c", "m-1").await })
        })
        .await
        .unwrap();
    assert!(processed);
}

#[tokio::test]
#[serial]
async fn test_outbox_unpublished_in_order_and_marking() {
    let uow = UnitOfWork::new(get_test_store().await);
    let user_id = UserId::new();

    uow.execute(move |repos| {
        Box::pin(async move {
            let (mut account, created) = Account::open(user_id, Money::new(100)).unwrap();
            let charged = account.charge(Money::new(30)).unwrap();
            repos.outbox().append(NewOutboxEvent::from_event(&created)?).await?;
            repos
                .outbox()
                .append(NewOutboxEvent::from_event(&charged)?.with_correlation_id("order-1"))
                .await?;
            Ok::<_, StoreError>(())
        })
    })
    .await
    .unwrap();

    let pending = uow
        .execute(|repos| Box::pin(async move { repos.outbox().fetch_unpublished(10).await }))
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].event_type, "account_created");
    assert_eq!(pending[1].correlation_id.as_deref(), Some("order-1"));

    let first = pending[0].event_id;
    uow.execute(move |repos| Box::pin(async move { repos.outbox().mark_published(first).await }))
        .await
        .unwrap();

    let pending = uow
        .execute(|repos| Box::pin(async move { repos.outbox().fetch_unpublished(10).await }))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].event_type, "account_balance_updated");
}

#[tokio::test]
#[serial]
async fn test_saga_log_versioning() {
    let uow = UnitOfWork::new(get_test_store().await);

    uow.execute(|repos| Box::pin(async move { repos.sagas().insert(saga_record("s-1")).await }))
        .await
        .unwrap();
    let err = uow
        .execute(|repos| Box::pin(async move { repos.sagas().insert(saga_record("s-1")).await }))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let mut next = saga_record("s-1");
    next.step = "done".to_string();
    next.terminal = true;
    let stale = next.clone();
    uow.execute(move |repos| Box::pin(async move { repos.sagas().save(next, 1).await }))
        .await
        .unwrap();
    let err = uow
        .execute(move |repos| Box::pin(async move { repos.sagas().save(stale, 1).await }))
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let record = uow
        .execute(|repos| Box::pin(async move { repos.sagas().find("s-1").await }))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.version, 2);
    let unfinished = uow
        .execute(|repos| Box::pin(async move { repos.sagas().find_unfinished().await }))
        .await
        .unwrap();
    assert!(unfinished.is_empty());
}

#[tokio::test]
#[serial]
async fn test_advisory_lock_times_out_while_held() {
    let store = get_test_store().await;
    let held = store.begin(&["account_x".to_string()]).await.unwrap();

    let result = LockingUnitOfWork::new(store.clone())
        .execute(["account_x"], |_repos| Box::pin(async move { Ok::<_, StoreError>(()) }))
        .await;
    assert!(matches!(result, Err(StoreError::LockTimeout { .. })));

    held.commit().await.unwrap();
    let result = LockingUnitOfWork::new(store)
        .execute(["account_x"], |_repos| Box::pin(async move { Ok::<_, StoreError>(()) }))
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
#[serial]
async fn test_concurrent_charges_do_not_lose_updates() {
    let store = get_test_store().await;
    let user_id = UserId::new();

    UnitOfWork::new(store.clone())
        .execute(move |repos| {
            Box::pin(async move {
                let (account, _) = Account::open(user_id, Money::new(50)).unwrap();
                repos.accounts().store(&account).await
            })
        })
        .await
        .unwrap();

    let uow = LockingUnitOfWork::new(store.clone());
    let mut handles = Vec::new();
    for _ in 0..5 {
        let uow = uow.clone();
        handles.push(tokio::spawn(async move {
            uow.execute([format!("account_{user_id}")], move |repos| {
                Box::pin(async move {
                    let mut account = repos.accounts().find(user_id).await?.unwrap();
                    account.charge(Money::new(10)).unwrap();
                    repos.accounts().store(&account).await
                })
            })
            .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let balance: i64 = sqlx::query_scalar("SELECT balance FROM accounts WHERE user_id = $1")
        .bind(user_id.as_uuid())
        .fetch_one(store.pool())
        .await
        .unwrap();
    assert_eq!(balance, 0);
}
