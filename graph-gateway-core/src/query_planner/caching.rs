use crate::prelude::graphql::*;
use crate::traits::QueryKey;
use async_trait::async_trait;
use lru::LruCache;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

type PlanResult = Result<Arc<QueryPlan>, QueryPlannerError>;

/// A query planner wrapper that caches results.
///
/// There is no eviction strategy, the query planner LRU caches are limited
/// to a fixed number of entries.
pub struct CachingQueryPlanner<T: QueryPlanner> {
    delegate: T,
    cached: Mutex<LruCache<QueryKey, PlanResult>>,
    plan_cache_limit: usize,
}

impl<T: QueryPlanner> fmt::Debug for CachingQueryPlanner<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingQueryPlanner")
            .field("plan_cache_limit", &self.plan_cache_limit)
            .finish()
    }
}

impl<T: QueryPlanner> CachingQueryPlanner<T> {
    /// Creates a new query planner that caches the results of another [`QueryPlanner`].
    pub fn new(delegate: T, plan_cache_limit: usize) -> CachingQueryPlanner<T> {
        Self {
            delegate,
            cached: Mutex::new(LruCache::new(plan_cache_limit)),
            plan_cache_limit,
        }
    }

    /// The most recently used plan keys, usable to warm up a new planner
    /// after a schema reload.
    pub async fn get_hot_keys(&self) -> Vec<QueryKey> {
        let locked_cache = self.cached.lock().await;
        locked_cache
            .iter()
            .take(self.plan_cache_limit / 5)
            .map(|(key, _value)| key.clone())
            .collect()
    }
}

#[async_trait]
impl<T: QueryPlanner + 'static> QueryPlanner for CachingQueryPlanner<T> {
    async fn get(
        &self,
        query: String,
        operation: Option<String>,
        options: QueryPlanOptions,
    ) -> PlanResult {
        let key = (query, operation, options);
        if let Some(value) = self.cached.lock().await.get(&key) {
            return value.clone();
        }

        // planning happens without holding the lock so parallel requests for
        // other queries are not starved by a slow plan
        let value = self
            .delegate
            .get(key.0.clone(), key.1.clone(), key.2.clone())
            .await;
        self.cached.lock().await.put(key, value.clone());
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use test_log::test;

    mock! {
        #[derive(Debug)]
        MyQueryPlanner {
            fn sync_get(
                &self,
                query: String,
                operation: Option<String>,
                options: QueryPlanOptions,
            ) -> PlanResult;
        }
    }

    #[async_trait]
    impl QueryPlanner for MockMyQueryPlanner {
        async fn get(
            &self,
            query: String,
            operation: Option<String>,
            options: QueryPlanOptions,
        ) -> PlanResult {
            self.sync_get(query, operation, options)
        }
    }

    #[test(tokio::test)]
    async fn plans_are_cached_per_key() {
        let mut delegate = MockMyQueryPlanner::new();
        delegate
            .expect_sync_get()
            .times(2)
            .return_const(Err(QueryPlannerError::MissingOperation));

        let planner = delegate.with_caching(10);

        for _ in 0..5 {
            assert!(planner
                .get(
                    "query1".into(),
                    Some("".into()),
                    QueryPlanOptions::default()
                )
                .await
                .is_err());
        }
        assert!(planner
            .get(
                "query2".into(),
                Some("".into()),
                QueryPlanOptions::default()
            )
            .await
            .is_err());
    }
}
