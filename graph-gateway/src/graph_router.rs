//! The federated router: plans a client query and executes it across the
//! subgraph services.

use graph_gateway_core::prelude::graphql::*;
use std::env;
use std::sync::Arc;

/// Default limit for the query plan LRU cache.
const DEFAULT_PLAN_CACHE_LIMIT: usize = 100;

/// The entry point for the supergraph.
///
/// Holds everything a request needs: a caching query planner over the
/// composed schema and the registry of subgraph services.
#[derive(Debug)]
pub struct GraphRouter {
    query_planner: Arc<CachingQueryPlanner<NativeQueryPlanner>>,
    service_registry: Arc<ServiceRegistry>,
    schema: Arc<ComposedSchema>,
    subgraph_sdls: Vec<(String, String)>,
}

impl GraphRouter {
    /// Create a router over `schema`, warming the plan cache from the
    /// previous router when this is a schema reload.
    pub async fn new(
        service_registry: Arc<ServiceRegistry>,
        schema: Arc<ComposedSchema>,
        subgraph_sdls: Vec<(String, String)>,
        previous_router: Option<&GraphRouter>,
    ) -> Self {
        let plan_cache_limit = env::var("GATEWAY_PLAN_CACHE_LIMIT")
            .ok()
            .and_then(|x| x.parse().ok())
            .unwrap_or(DEFAULT_PLAN_CACHE_LIMIT);
        let query_planner = Arc::new(
            NativeQueryPlanner::new(Arc::clone(&schema)).with_caching(plan_cache_limit),
        );

        if let Some(previous_router) = previous_router {
            for (query, operation, options) in
                previous_router.query_planner.get_hot_keys().await
            {
                // planning a previously-planned query against the new schema
                // may fail, the error is surfaced when a client sends it again
                let _ = query_planner.get(query, operation, options).await;
            }
        }

        Self {
            query_planner,
            service_registry,
            schema,
            subgraph_sdls,
        }
    }

    /// The subgraph SDLs this router was composed from, usable to detect that
    /// a reload brought nothing new.
    pub fn subgraph_sdls(&self) -> &[(String, String)] {
        &self.subgraph_sdls
    }
}

#[async_trait::async_trait]
impl Router for GraphRouter {
    type PreparedQuery = PreparedGraphQuery;

    async fn prepare_query(&self, request: &Request) -> Result<Self::PreparedQuery, Response> {
        let query = match request.query.as_deref() {
            Some(query) if !query.trim().is_empty() => query.to_string(),
            _ => {
                return Err(Response::builder()
                    .errors(vec![Error::builder()
                        .message("must provide a query".to_string())
                        .build()])
                    .build())
            }
        };

        let query_plan = self
            .query_planner
            .get(
                query,
                request.operation_name.clone(),
                QueryPlanOptions::default(),
            )
            .await
            .map_err(|err| FetchError::from(err).to_response())?;

        query_plan.validate(&self.service_registry)?;
        query_plan.validate_request_variables(request)?;

        Ok(PreparedGraphQuery {
            query_plan,
            service_registry: Arc::clone(&self.service_registry),
            schema: Arc::clone(&self.schema),
        })
    }
}

/// A planned and validated query, ready to execute.
#[derive(Debug)]
pub struct PreparedGraphQuery {
    query_plan: Arc<QueryPlan>,
    service_registry: Arc<ServiceRegistry>,
    schema: Arc<ComposedSchema>,
}

#[async_trait::async_trait]
impl PreparedQuery for PreparedGraphQuery {
    async fn execute(self, request: Arc<Request>) -> Response {
        self.query_plan
            .execute(&request, &self.service_registry, &self.schema)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_gateway_core::mocks::MockSubgraph;
    use serde_json::json;
    use test_log::test;

    fn schema() -> Arc<ComposedSchema> {
        let user = SubgraphSchema::parse(
            "user",
            r#"
            type Query {
                me: User
            }

            type User @key(fields: "id") {
                id: ID!
                name: String
            }
            "#,
        )
        .unwrap();
        Arc::new(compose(&[user]).unwrap())
    }

    fn registry() -> Arc<ServiceRegistry> {
        let subgraph = MockSubgraph::builder()
            .with_json(
                json!({ "query": "query { me { name } }" }),
                json!({ "data": { "me": { "name": "Ada" } } }),
            )
            .build();
        let mut registry = ServiceRegistry::new();
        registry.insert("user", subgraph);
        Arc::new(registry)
    }

    #[test(tokio::test)]
    async fn a_query_is_planned_and_executed() {
        let router = GraphRouter::new(registry(), schema(), vec![], None).await;
        let request = Request::builder()
            .query("{ me { name } }".to_string())
            .build();

        let prepared = router.prepare_query(&request).await.unwrap();
        let response = prepared.execute(Arc::new(request)).await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        assert_eq!(
            serde_json::to_value(&response.data).unwrap(),
            json!({ "me": { "name": "Ada" } }),
        );
    }

    #[test(tokio::test)]
    async fn an_empty_query_is_rejected_up_front() {
        let router = GraphRouter::new(registry(), schema(), vec![], None).await;
        let response = router
            .prepare_query(&Request::builder().query(Option::<String>::None).build())
            .await
            .unwrap_err();
        assert_eq!(response.errors[0].message, "must provide a query");

        let response = router
            .prepare_query(&Request::builder().query("  ".to_string()).build())
            .await
            .unwrap_err();
        assert_eq!(response.errors[0].message, "must provide a query");
    }

    #[test(tokio::test)]
    async fn planning_errors_become_graphql_responses() {
        let router = GraphRouter::new(registry(), schema(), vec![], None).await;
        let response = router
            .prepare_query(&Request::builder().query("subscription { me }".to_string()).build())
            .await
            .unwrap_err();
        assert!(!response.errors.is_empty());
    }

    #[test(tokio::test)]
    async fn a_new_router_reuses_the_previous_hot_plans() {
        let previous = GraphRouter::new(registry(), schema(), vec![], None).await;
        let request = Request::builder()
            .query("{ me { name } }".to_string())
            .build();
        previous.prepare_query(&request).await.unwrap();

        let router = GraphRouter::new(registry(), schema(), vec![], Some(&previous)).await;
        assert_eq!(router.query_planner.get_hot_keys().await.len(), 1);
    }
}
