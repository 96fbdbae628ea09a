//! Units of work.

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::provider::RepositoryProvider;
use crate::{StoreError, canonical_lock_names};

/// The future returned by a unit of work closure.
pub type Work<'p, T, E> = BoxFuture<'p, std::result::Result<T, E>>;

/// An open transaction that exposes the repositories of a backend.
#[async_trait]
pub trait Transaction: RepositoryProvider + Sized + Send + 'static {
    async fn commit(self) -> crate::Result<()>;

    async fn rollback(self) -> crate::Result<()>;
}

/// A transactional storage backend.
#[async_trait]
pub trait Store: Clone + Send + Sync + 'static {
    type Tx: Transaction;

    /// Opens a transaction holding the given locks.
    ///
    /// `lock_names` is canonical (sorted, unique). Locks are released when
    /// the transaction commits, rolls back or is dropped.
    async fn begin(&self, lock_names: &[String]) -> crate::Result<Self::Tx>;
}

async fn run<S, T, E, F>(store: &S, lock_names: &[String], work: F) -> std::result::Result<T, E>
where
    S: Store,
    T: Send,
    E: From<StoreError> + Send,
    F: for<'p> FnOnce(&'p mut dyn RepositoryProvider) -> Work<'p, T, E> + Send,
{
    let mut tx = store.begin(lock_names).await?;
    match work(&mut tx).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(error = %rollback_err, "Rollback failed");
            }
            Err(err)
        }
    }
}

/// Runs a closure inside one transaction.
///
/// The closure's writes are committed together or not at all. A closure
/// that returns an error, or panics, leaves no trace in the store.
#[derive(Clone)]
pub struct UnitOfWork<S: Store> {
    store: S,
}

impl<S: Store> UnitOfWork<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn execute<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: for<'p> FnOnce(&'p mut dyn RepositoryProvider) -> Work<'p, T, E> + Send,
    {
        run(&self.store, &[], work).await
    }
}

/// A unit of work that first acquires exclusive named locks.
///
/// Two executions whose lock sets intersect never overlap in time. Locks
/// are taken in canonical order, so overlapping sets cannot deadlock; a
/// lock that cannot be acquired in time surfaces as
/// [`StoreError::LockTimeout`].
#[derive(Clone)]
pub struct LockingUnitOfWork<S: Store> {
    store: S,
}

impl<S: Store> LockingUnitOfWork<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    #[tracing::instrument(skip(self, lock_names, work))]
    pub async fn execute<T, E, F, I, N>(&self, lock_names: I, work: F) -> std::result::Result<T, E>
    where
        T: Send,
        E: From<StoreError> + Send,
        F: for<'p> FnOnce(&'p mut dyn RepositoryProvider) -> Work<'p, T, E> + Send,
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        let names = canonical_lock_names(lock_names);
        tracing::debug!(locks = ?names, "Executing locking unit of work");
        run(&self.store, &names, work).await
    }
}
