//! Builds the router service the HTTP server hands requests to.
//!
//! A new router is created at startup and on every schema or configuration
//! reload. The previous router, when there is one, donates its hot query
//! plans to the replacement.

use crate::configuration::Configuration;
use crate::gateway::SchemaUpdate;
use crate::graph_router::GraphRouter;
use crate::registry;
use graph_gateway_core::prelude::graphql::*;
use std::sync::Arc;
use tower::BoxError;

/// Factory for creating the tower service that answers GraphQL requests.
#[async_trait::async_trait]
pub trait RouterServiceFactory: Send + Sync + 'static {
    type RouterService: tower::Service<Request, Response = Response, Error = (), Future: Send>
        + Clone
        + Send
        + Sync
        + 'static;

    async fn create<'a>(
        &'a self,
        configuration: Arc<Configuration>,
        schema: SchemaUpdate,
        previous_router: Option<&'a Self::RouterService>,
    ) -> Result<Self::RouterService, BoxError>;

    /// Whether two services produced by this factory share the same router,
    /// meaning a reload brought nothing new and nothing needs to restart.
    fn is_unchanged(
        &self,
        previous: &Self::RouterService,
        next: &Self::RouterService,
    ) -> bool;
}

/// The production factory: composes the subgraph schemas and wires a
/// [`GraphRouter`] over reqwest-backed subgraph services.
#[derive(Debug, Default)]
pub struct GraphRouterFactory;

#[async_trait::async_trait]
impl RouterServiceFactory for GraphRouterFactory {
    type RouterService = RouterService<GraphRouter>;

    async fn create<'a>(
        &'a self,
        configuration: Arc<Configuration>,
        schema: SchemaUpdate,
        previous_router: Option<&'a Self::RouterService>,
    ) -> Result<Self::RouterService, BoxError> {
        let subgraph_schemas = match schema {
            SchemaUpdate::Introspect => registry::introspect(&configuration).await?,
            SchemaUpdate::Static(entries) => entries
                .iter()
                .map(|(name, sdl)| {
                    SubgraphSchema::parse(name.clone(), sdl).map_err(print_parse_errors)
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let subgraph_sdls = subgraph_schemas
            .iter()
            .map(|schema| (schema.name.clone(), schema.as_str().to_string()))
            .collect::<Vec<_>>();
        if let Some(previous) = previous_router {
            if previous.router().subgraph_sdls() == subgraph_sdls.as_slice() {
                tracing::debug!("subgraph schemas unchanged, keeping the current router");
                return Ok(previous.clone());
            }
        }

        let schema = Arc::new(compose(&subgraph_schemas)?);

        let mut service_registry = ServiceRegistry::with_capacity(configuration.subgraphs.len());
        for (name, subgraph) in &configuration.subgraphs {
            service_registry.insert(
                name.clone(),
                ReqwestSubgraphService::new(name.clone(), subgraph.routing_url.clone())?,
            );
        }

        let router = GraphRouter::new(
            Arc::new(service_registry),
            schema,
            subgraph_sdls,
            previous_router.map(|service| service.router().as_ref()),
        )
        .await;

        Ok(RouterService::new(Arc::new(router)))
    }

    fn is_unchanged(
        &self,
        previous: &Self::RouterService,
        next: &Self::RouterService,
    ) -> bool {
        Arc::ptr_eq(previous.router(), next.router())
    }
}

fn print_parse_errors(err: SchemaError) -> SchemaError {
    if let SchemaError::Parse(parse_errors) = &err {
        parse_errors.print();
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn a_static_schema_builds_a_router() {
        let factory = GraphRouterFactory::default();
        let schema = SchemaUpdate::Static(vec![(
            "user".to_string(),
            "type Query { me: String }".to_string(),
        )]);

        factory
            .create(Arc::new(Configuration::default()), schema, None)
            .await
            .unwrap();
    }

    #[test(tokio::test)]
    async fn an_unchanged_schema_keeps_the_previous_router() {
        let factory = GraphRouterFactory::default();
        let schema = SchemaUpdate::Static(vec![(
            "user".to_string(),
            "type Query { me: String }".to_string(),
        )]);
        let configuration = Arc::new(Configuration::default());

        let first = factory
            .create(configuration.clone(), schema.clone(), None)
            .await
            .unwrap();
        let second = factory
            .create(configuration.clone(), schema, Some(&first))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(first.router(), second.router()));
        assert!(factory.is_unchanged(&first, &second));

        let changed = SchemaUpdate::Static(vec![(
            "user".to_string(),
            "type Query { me: ID }".to_string(),
        )]);
        let third = factory
            .create(configuration, changed, Some(&first))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(first.router(), third.router()));
    }

    #[test(tokio::test)]
    async fn invalid_sdl_fails_creation() {
        let factory = GraphRouterFactory::default();
        let schema = SchemaUpdate::Static(vec![("user".to_string(), "type Query {".to_string())]);

        assert!(factory
            .create(Arc::new(Configuration::default()), schema, None)
            .await
            .is_err());
    }
}
