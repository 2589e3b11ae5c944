use crate::prelude::graphql::*;
use futures::Future;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A planner key.
///
/// This type consists of a query string, an optional operation string and the
/// [`QueryPlanOptions`].
pub(crate) type QueryKey = (String, Option<String>, QueryPlanOptions);

/// QueryPlanner can be used to plan queries.
///
/// Implementations may cache query plans.
#[async_trait::async_trait]
pub trait QueryPlanner: Send + Sync + Debug {
    /// Returns a query plan given the query, operation and options.
    /// Implementations may cache query plans.
    #[must_use = "query plan result must be used"]
    async fn get(
        &self,
        query: String,
        operation: Option<String>,
        options: QueryPlanOptions,
    ) -> Result<Arc<QueryPlan>, QueryPlannerError>;
}

/// With caching trait.
///
/// Adds with_caching to any query planner.
pub trait WithCaching: QueryPlanner
where
    Self: Sized + QueryPlanner + 'static,
{
    /// Wrap this query planner in a caching decorator.
    /// The original query planner is consumed.
    fn with_caching(self, plan_cache_limit: usize) -> CachingQueryPlanner<Self> {
        CachingQueryPlanner::new(self, plan_cache_limit)
    }
}

impl<T: ?Sized> WithCaching for T where T: QueryPlanner + Sized + 'static {}

/// An object that accepts a [`Request`] and allow creating [`PreparedQuery`]'s.
///
/// The call to the function will either succeeds and return a [`PreparedQuery`] or it will fail
/// and return a [`Response`] that can be returned immediately to the user. This is because
/// GraphQL does not use the HTTP error codes, therefore it always return a response even if it
/// fails.
#[async_trait::async_trait]
pub trait Router: Send + Sync + Debug {
    type PreparedQuery: PreparedQuery;

    async fn prepare_query(&self, request: &Request) -> Result<Self::PreparedQuery, Response>;
}

/// An object that can be executed to return a [`Response`].
#[async_trait::async_trait]
pub trait PreparedQuery: Send + Debug {
    async fn execute(self, request: Arc<Request>) -> Response;
}

/// An object-safe cousin of [`tower::Service`] for services that must live in
/// a registry as trait objects but still be cloned out on every request.
///
/// `Clone` cannot be a supertrait here, it would prevent making a trait
/// object, so cloning goes through `clone_box` instead.
pub trait DynCloneService<Request>: Send + Sync {
    type Response;
    type Error;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>>;

    fn call(
        &mut self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn clone_box(
        &self,
    ) -> Box<dyn DynCloneService<Request, Response = Self::Response, Error = Self::Error>>;
}

impl<S, R> DynCloneService<R> for S
where
    S: tower::Service<R> + Clone + Send + Sync + 'static,
    S::Future: Send + 'static,
{
    type Response = <S as tower::Service<R>>::Response;
    type Error = <S as tower::Service<R>>::Error;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        tower::Service::poll_ready(self, cx)
    }

    fn call(
        &mut self,
        request: R,
    ) -> Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>> {
        Box::pin(tower::Service::call(self, request))
    }

    fn clone_box(
        &self,
    ) -> Box<dyn DynCloneService<R, Response = Self::Response, Error = Self::Error>> {
        Box::new(self.clone())
    }
}

impl<'a, R, Res, Err> tower::Service<R>
    for (dyn DynCloneService<R, Response = Res, Error = Err> + 'a)
{
    type Response = Res;
    type Error = Err;
    type Future = Pin<Box<dyn Future<Output = Result<Res, Err>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        DynCloneService::poll_ready(self, cx)
    }

    fn call(&mut self, request: R) -> Self::Future {
        DynCloneService::call(self, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::*;

    assert_obj_safe!(QueryPlanner);
}
