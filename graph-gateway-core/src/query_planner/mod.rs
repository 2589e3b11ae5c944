mod caching;
mod planner;
mod selection;

use crate::prelude::graphql::*;
pub use caching::*;
use futures::prelude::*;
pub use planner::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::Instrument;

/// Query planning options.
#[derive(Clone, Eq, Hash, PartialEq, Debug, Default)]
pub struct QueryPlanOptions {}

/// The kind of an operation, both for client operations and subgraph fetches.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl Default for OperationKind {
    fn default() -> Self {
        OperationKind::Query
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OperationKind::Query => write!(f, "query"),
            OperationKind::Mutation => write!(f, "mutation"),
            OperationKind::Subscription => write!(f, "subscription"),
        }
    }
}

/// An executable federation query plan.
#[derive(Debug)]
pub struct QueryPlan {
    pub(crate) root: PlanNode,

    /// The client operation the plan was built from, kept around to validate
    /// request variables before execution.
    pub(crate) operation: Operation,
}

impl QueryPlan {
    /// Validate the services used by the plan against the registry.
    #[tracing::instrument(skip_all, level = "debug", name = "validate")]
    pub fn validate(&self, service_registry: &ServiceRegistry) -> Result<(), Response> {
        let mut early_errors = Vec::new();
        for err in self.root.validate_services_against_plan(service_registry) {
            early_errors.push(err.to_graphql_error(None));
        }

        if !early_errors.is_empty() {
            Err(Response::builder().errors(early_errors).build())
        } else {
            Ok(())
        }
    }

    /// Validate that the request provides every required variable.
    pub fn validate_request_variables(&self, request: &Request) -> Result<(), Response> {
        let missing = self.operation.missing_variables(&request.variables);
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Response::builder()
                .errors(
                    missing
                        .into_iter()
                        .map(|name| {
                            FetchError::ValidationMissingVariable { name }.to_graphql_error(None)
                        })
                        .collect::<Vec<_>>(),
                )
                .build())
        }
    }

    /// Execute the plan and return a [`Response`].
    pub async fn execute<'a>(
        &'a self,
        request: &'a Request,
        service_registry: &'a ServiceRegistry,
        schema: &'a ComposedSchema,
    ) -> Response {
        let root = Path::empty();

        let (mut value, errors) = self
            .root
            .execute_recursively(&root, request, service_registry, schema, &Value::default())
            .await;

        self.resolve_root_typenames(&mut value, schema);

        Response::builder().data(value).errors(errors).build()
    }

    /// Root `__typename` fields never reach a subgraph, the planner drops
    /// them and they are answered here from the composed schema.
    fn resolve_root_typenames(&self, data: &mut Value, schema: &ComposedSchema) {
        fn collect<'a>(selections: &'a [Selection], out: &mut Vec<&'a str>) {
            for selection in selections {
                match selection {
                    Selection::Field(field) if field.name == "__typename" => {
                        out.push(field.response_name())
                    }
                    Selection::Field(_) => {}
                    Selection::InlineFragment(fragment) => {
                        collect(&fragment.selection_set, out)
                    }
                }
            }
        }

        let mut response_names = Vec::new();
        collect(&self.operation.selection_set, &mut response_names);
        if response_names.is_empty() {
            return;
        }

        if let Some(root_type) = schema.root_type(self.operation.kind) {
            for name in response_names {
                if let Err(err) =
                    data.insert(&Path::from(name), Value::String(root_type.name.clone().into()))
                {
                    failfast_error!("could not resolve root __typename: {}", err);
                }
            }
        }
    }

    pub fn contains_mutations(&self) -> bool {
        self.root.contains_mutations()
    }
}

/// Query plans are composed of a set of nodes.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", tag = "kind")]
pub(crate) enum PlanNode {
    /// These nodes must be executed in order.
    Sequence {
        /// The plan nodes that make up the sequence execution.
        nodes: Vec<PlanNode>,
    },

    /// These nodes may be executed in parallel.
    Parallel {
        /// The plan nodes that make up the parallel execution.
        nodes: Vec<PlanNode>,
    },

    /// Fetch some data from a subgraph.
    Fetch(fetch::FetchNode),

    /// Merge the current resultset with the response.
    Flatten(FlattenNode),
}

impl PlanNode {
    pub fn contains_mutations(&self) -> bool {
        match self {
            Self::Sequence { nodes } => nodes.iter().any(|n| n.contains_mutations()),
            Self::Parallel { nodes } => nodes.iter().any(|n| n.contains_mutations()),
            Self::Fetch(fetch_node) => fetch_node.operation_kind() == &OperationKind::Mutation,
            Self::Flatten(_) => false,
        }
    }

    fn execute_recursively<'a>(
        &'a self,
        current_dir: &'a Path,
        request: &'a Request,
        service_registry: &'a ServiceRegistry,
        schema: &'a ComposedSchema,
        parent_value: &'a Value,
    ) -> future::BoxFuture<'a, (Value, Vec<Error>)> {
        Box::pin(async move {
            tracing::trace!("executing plan:\n{:#?}", self);
            let mut value;
            let mut errors;

            match self {
                PlanNode::Sequence { nodes } => {
                    value = parent_value.clone();
                    errors = Vec::new();
                    let span = tracing::info_span!("sequence");
                    for node in nodes {
                        let (v, err) = node
                            .execute_recursively(
                                current_dir,
                                request,
                                service_registry,
                                schema,
                                &value,
                            )
                            .instrument(span.clone())
                            .in_current_span()
                            .await;
                        value.deep_merge(v);
                        errors.extend(err.into_iter());
                    }
                }
                PlanNode::Parallel { nodes } => {
                    value = Value::default();
                    errors = Vec::new();

                    let span = tracing::info_span!("parallel");
                    let mut stream: stream::FuturesUnordered<_> = nodes
                        .iter()
                        .map(|plan| {
                            plan.execute_recursively(
                                current_dir,
                                request,
                                service_registry,
                                schema,
                                parent_value,
                            )
                            .instrument(span.clone())
                        })
                        .collect();

                    while let Some((v, err)) = stream
                        .next()
                        .instrument(span.clone())
                        .in_current_span()
                        .await
                    {
                        value.deep_merge(v);
                        errors.extend(err.into_iter());
                    }
                }
                PlanNode::Flatten(FlattenNode { path, node }) => {
                    let (v, err) = node
                        .execute_recursively(
                            // this is the only command that actually changes the "current dir"
                            &current_dir.join(path),
                            request,
                            service_registry,
                            schema,
                            parent_value,
                        )
                        .instrument(tracing::trace_span!("flatten"))
                        .await;

                    value = v;
                    errors = err;
                }
                PlanNode::Fetch(fetch_node) => {
                    match fetch_node
                        .fetch_node(parent_value, current_dir, request, service_registry, schema)
                        .instrument(tracing::info_span!("fetch"))
                        .await
                    {
                        Ok((v, e)) => {
                            value = v;
                            errors = e;
                        }
                        Err(err) => {
                            failfast_error!("fetch error: {}", err);
                            errors = vec![err.to_graphql_error(Some(current_dir.to_owned()))];
                            value = Value::default();
                        }
                    }
                }
            }

            (value, errors)
        })
    }

    /// Retrieves all the services used across all plan nodes.
    ///
    /// Note that duplicates are not filtered.
    fn service_usage<'a>(&'a self) -> Box<dyn Iterator<Item = &'a str> + 'a> {
        match self {
            Self::Sequence { nodes } | Self::Parallel { nodes } => {
                Box::new(nodes.iter().flat_map(|x| x.service_usage()))
            }
            Self::Fetch(fetch) => Box::new(Some(fetch.service_name()).into_iter()),
            Self::Flatten(flatten) => flatten.node.service_usage(),
        }
    }

    /// Recursively validate a query plan node making sure that all services are known before we go
    /// for execution.
    ///
    /// This simplifies processing later as we can always guarantee that services are configured for
    /// the plan.
    fn validate_services_against_plan(
        &self,
        service_registry: &ServiceRegistry,
    ) -> Vec<FetchError> {
        self.service_usage()
            .filter(|service| !service_registry.contains(service))
            .collect::<HashSet<_>>()
            .into_iter()
            .map(|service| FetchError::ValidationUnknownServiceError {
                service: service.to_string(),
            })
            .collect::<Vec<_>>()
    }
}

pub(crate) mod fetch {
    use super::selection::{select_object, Selection};
    use crate::prelude::graphql::*;
    use serde::{Deserialize, Serialize};
    use serde_json_bytes::ByteString;
    use std::sync::Arc;
    use tower::ServiceExt;
    use tracing::{instrument, Instrument};

    /// A fetch node.
    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub(crate) struct FetchNode {
        /// The name of the service or subgraph that the fetch is querying.
        pub(crate) service_name: String,

        /// The data that is required for the subgraph fetch.
        #[serde(skip_serializing_if = "Vec::is_empty", default)]
        pub(crate) requires: Vec<Selection>,

        /// The variables that are used for the subgraph fetch.
        pub(crate) variable_usages: Vec<String>,

        /// The GraphQL subquery that is used for the fetch.
        pub(crate) operation: String,

        /// The GraphQL operation kind that is used for the fetch.
        pub(crate) operation_kind: OperationKind,
    }

    struct Variables {
        variables: Object,
        paths: Vec<Path>,
    }

    impl Variables {
        #[instrument(skip_all, level = "debug", name = "make_variables")]
        fn new(
            requires: &[Selection],
            variable_usages: &[String],
            data: &Value,
            current_dir: &Path,
            request: &Request,
            schema: &ComposedSchema,
        ) -> Option<Variables> {
            if !requires.is_empty() {
                let mut variables = Object::with_capacity(1 + variable_usages.len());

                variables.extend(variable_usages.iter().filter_map(|key| {
                    request
                        .variables
                        .get_key_value(key.as_str())
                        .map(|(variable_key, value)| (variable_key.clone(), value.clone()))
                }));

                let mut paths = Vec::new();
                let mut values = Vec::new();
                data.select_values_and_paths(current_dir, |path, value| {
                    if let Value::Object(content) = value {
                        if let Ok(Some(value)) = select_object(content, requires, schema) {
                            paths.push(path);
                            values.push(value);
                        }
                    }
                });

                if values.is_empty() {
                    return None;
                }

                variables.insert(ByteString::from("representations"), Value::Array(values));

                Some(Variables { variables, paths })
            } else {
                Some(Variables {
                    variables: variable_usages
                        .iter()
                        .filter_map(|key| {
                            request
                                .variables
                                .get_key_value(key.as_str())
                                .map(|(variable_key, value)| (variable_key.clone(), value.clone()))
                        })
                        .collect::<Object>(),
                    paths: Vec::new(),
                })
            }
        }
    }

    impl FetchNode {
        pub(crate) async fn fetch_node<'a>(
            &'a self,
            data: &'a Value,
            current_dir: &'a Path,
            request: &'a Request,
            service_registry: &'a ServiceRegistry,
            schema: &'a ComposedSchema,
        ) -> Result<(Value, Vec<Error>), FetchError> {
            let FetchNode {
                operation,
                operation_kind,
                service_name,
                ..
            } = self;

            let Variables { variables, paths } = match Variables::new(
                &self.requires,
                self.variable_usages.as_ref(),
                data,
                current_dir,
                request,
                schema,
            ) {
                Some(variables) => variables,
                None => {
                    return Ok((Value::from_path(current_dir, Value::Null), Vec::new()));
                }
            };

            let subgraph_request = SubgraphRequest {
                service_name: service_name.clone(),
                body: Request::builder()
                    .query(operation.clone())
                    .variables(Arc::new(variables))
                    .build(),
                operation_kind: *operation_kind,
            };

            let service = service_registry
                .get(service_name)
                .expect("we already checked that the service exists during planning; qed");

            let response = service
                .oneshot(subgraph_request)
                .instrument(tracing::trace_span!("subfetch_stream"))
                .await
                .map_err(|e| FetchError::SubrequestHttpError {
                    service: service_name.to_string(),
                    reason: e.to_string(),
                })?;

            // fix error paths and erase subgraph error extensions (we cannot
            // expose subgraph internals to the client)
            let errors = response
                .errors
                .into_iter()
                .map(|error| Error {
                    locations: error.locations,
                    path: error.path.map(|path| current_dir.join(path)),
                    message: error.message,
                    extensions: Object::default(),
                })
                .collect();

            self.response_at_path(current_dir, paths, response.data)
                .map(|value| (value, errors))
        }

        #[instrument(skip_all, level = "debug", name = "response_insert")]
        fn response_at_path<'a>(
            &'a self,
            current_dir: &'a Path,
            paths: Vec<Path>,
            data: Value,
        ) -> Result<Value, FetchError> {
            if !self.requires.is_empty() {
                // we have to nest conditions and do early returns here
                // because we need to take ownership of the inner value
                if let Value::Object(mut map) = data {
                    if let Some(entities) = map.remove("_entities") {
                        tracing::trace!("received entities: {:?}", &entities);

                        if let Value::Array(array) = entities {
                            let mut value = Value::default();

                            for (entity, path) in array.into_iter().zip(paths.into_iter()) {
                                value.insert(&path, entity)?;
                            }
                            return Ok(value);
                        } else {
                            return Err(FetchError::ExecutionInvalidContent {
                                reason: "received invalid type for key `_entities`".to_string(),
                            });
                        }
                    }
                }

                Err(FetchError::ExecutionInvalidContent {
                    reason: "missing key `_entities`".to_string(),
                })
            } else {
                Ok(Value::from_path(current_dir, data))
            }
        }

        pub(crate) fn service_name(&self) -> &str {
            &self.service_name
        }

        pub(crate) fn operation_kind(&self) -> &OperationKind {
            &self.operation_kind
        }
    }
}

/// A flatten node.
#[derive(Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FlattenNode {
    /// The path when result should be merged.
    pub(crate) path: Path,

    /// The child execution plan.
    pub(crate) node: Box<PlanNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockSubgraph;
    use serde_json::json;
    use std::sync::Arc;
    use test_log::test;

    fn schema() -> Arc<ComposedSchema> {
        let subgraphs = vec![
            SubgraphSchema::parse(
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
            .unwrap(),
            SubgraphSchema::parse(
                "comms",
                r#"
                type Query {
                    inbox: [Message]
                }

                type Message {
                    body: String
                }

                extend type User @key(fields: "id") {
                    id: ID! @external
                    messages: [Message]
                }
                "#,
            )
            .unwrap(),
        ];
        Arc::new(compose(&subgraphs).unwrap())
    }

    async fn plan(schema: Arc<ComposedSchema>, query: &str) -> Arc<QueryPlan> {
        NativeQueryPlanner::new(schema)
            .get(query.to_string(), None, QueryPlanOptions::default())
            .await
            .unwrap()
    }

    #[test(tokio::test)]
    async fn executes_across_subgraphs_and_merges_entities() {
        let schema = schema();
        let query = "{ me { name messages { body } } }";
        let plan = plan(schema.clone(), query).await;

        let mut registry = ServiceRegistry::new();
        registry.insert(
            "user",
            MockSubgraph::builder()
                .with_json(
                    json!({"query": "query { me { name __typename id } }"}),
                    json!({"data": {"me": {"name": "Ada", "__typename": "User", "id": "1"}}}),
                )
                .build(),
        );
        registry.insert(
            "comms",
            MockSubgraph::builder()
                .with_json(
                    json!({
                        "query": "query($representations: [_Any!]!) { _entities(representations: $representations) { ... on User { messages { body } } } }",
                        "variables": {"representations": [{"__typename": "User", "id": "1"}]},
                    }),
                    json!({"data": {"_entities": [{"messages": [{"body": "hi"}, {"body": "yo"}]}]}}),
                )
                .build(),
        );

        let request = Request::builder().query(query.to_string()).build();
        plan.validate(&registry).unwrap();
        let response = plan.execute(&request, &registry, &schema).await;

        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Value::from(json!({
                "me": {
                    "name": "Ada",
                    "__typename": "User",
                    "id": "1",
                    "messages": [{"body": "hi"}, {"body": "yo"}],
                }
            })),
        );
    }

    #[test(tokio::test)]
    async fn root_typename_is_resolved_without_a_subgraph() {
        let schema = schema();
        let query = "{ __typename }";
        let plan = plan(schema.clone(), query).await;

        let registry = ServiceRegistry::new();
        let request = Request::builder().query(query.to_string()).build();
        plan.validate(&registry).unwrap();
        let response = plan.execute(&request, &registry, &schema).await;

        assert_eq!(response.errors, Vec::new());
        assert_eq!(response.data, Value::from(json!({ "__typename": "Query" })));
    }

    #[test(tokio::test)]
    async fn root_typename_rides_along_other_fields() {
        let schema = schema();
        let query = "{ __typename me { name } }";
        let plan = plan(schema.clone(), query).await;

        let mut registry = ServiceRegistry::new();
        registry.insert(
            "user",
            MockSubgraph::builder()
                .with_json(
                    json!({"query": "query { me { name } }"}),
                    json!({"data": {"me": {"name": "Ada"}}}),
                )
                .build(),
        );

        let request = Request::builder().query(query.to_string()).build();
        let response = plan.execute(&request, &registry, &schema).await;

        assert_eq!(response.errors, Vec::new());
        assert_eq!(
            response.data,
            Value::from(json!({"me": {"name": "Ada"}, "__typename": "Query"})),
        );
    }

    #[test(tokio::test)]
    async fn subgraph_errors_are_propagated() {
        let schema = schema();
        let plan = plan(schema.clone(), "{ me { name } }").await;

        // nothing registered under the expected query, the mock responds with
        // an error instead
        let mut registry = ServiceRegistry::new();
        registry.insert("user", MockSubgraph::default());

        let request = Request::builder().query("{ me { name } }".to_string()).build();
        let response = plan.execute(&request, &registry, &schema).await;

        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].message.contains("couldn't find mock"));
    }

    #[test(tokio::test)]
    async fn unknown_services_fail_validation() {
        let schema = schema();
        let plan = plan(schema, "{ me { name } }").await;

        let response = plan.validate(&ServiceRegistry::new()).unwrap_err();
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0]
            .message
            .contains("query references unknown service 'user'"));
    }

    #[test(tokio::test)]
    async fn missing_variables_fail_validation() {
        let subgraphs = vec![SubgraphSchema::parse(
            "user",
            "type Query { user(id: ID!, verbose: Boolean): String }",
        )
        .unwrap()];
        let schema = Arc::new(compose(&subgraphs).unwrap());
        let plan = plan(
            schema,
            "query($id: ID!, $verbose: Boolean) { user(id: $id, verbose: $verbose) }",
        )
        .await;

        let request = Request::builder().query(String::new()).build();
        let response = plan.validate_request_variables(&request).unwrap_err();
        assert_eq!(response.errors.len(), 1);
        assert_eq!(response.errors[0].message, "missing variable: 'id'");
    }
}
