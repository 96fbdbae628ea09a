//! Local caches of users and products owned by other services.

use domain::{LocalProduct, LocalUser};
use store::{RepositoryProvider, StoreError};

/// Upserts projections received from the user and product services.
///
/// Runs inside the consuming unit of work. An update older than the stored
/// projection is dropped, so a late duplicate never rolls a cache back.
#[derive(Debug, Clone, Copy, Default)]
pub struct DataSyncService;

impl DataSyncService {
    /// Returns false if the stored projection is newer.
    pub async fn sync_user(
        &self,
        repos: &mut dyn RepositoryProvider,
        user: LocalUser,
    ) -> Result<bool, StoreError> {
        if let Some(existing) = repos.local_users().find(user.user_id).await?
            && !user.supersedes(&existing)
        {
            tracing::warn!(user_id = %user.user_id, "Ignoring stale user update");
            return Ok(false);
        }
        repos.local_users().store(&user).await?;
        tracing::debug!(user_id = %user.user_id, login = %user.login, "User synced");
        Ok(true)
    }

    /// Returns false if the stored projection is newer.
    pub async fn sync_product(
        &self,
        repos: &mut dyn RepositoryProvider,
        product: LocalProduct,
    ) -> Result<bool, StoreError> {
        if let Some(existing) = repos.local_products().find(product.product_id).await?
            && !product.supersedes(&existing)
        {
            tracing::warn!(product_id = %product.product_id, "Ignoring stale product update");
            return Ok(false);
        }
        repos.local_products().store(&product).await?;
        tracing::debug!(product_id = %product.product_id, "Product synced");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use common::ProductId;
    use domain::Money;
    use store::{InMemoryStore, UnitOfWork};

    fn product(id: ProductId, name: &str, at: chrono::DateTime<Utc>) -> LocalProduct {
        LocalProduct {
            product_id: id,
            name: name.to_string(),
            price: Money::new(100),
            source_updated_at: Some(at),
        }
    }

    #[tokio::test]
    async fn test_stale_product_update_is_ignored() {
        let uow = UnitOfWork::new(InMemoryStore::new());
        let id = ProductId::new();
        let now = Utc::now();
        let newer = product(id, "Widget v2", now);
        let older = product(id, "Widget", now - Duration::seconds(10));

        let (first, second, stored) = uow
            .execute(move |repos| {
                Box::pin(async move {
                    let first = DataSyncService.sync_product(repos, newer).await?;
                    let second = DataSyncService.sync_product(repos, older).await?;
                    let stored = repos.local_products().find(id).await?;
                    Ok::<_, StoreError>((first, second, stored))
                })
            })
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(stored.unwrap().name, "Widget v2");
    }
}
