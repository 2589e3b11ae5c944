//! Canned subgraph services for tests.

use crate::prelude::graphql::*;
use futures::future;
use std::sync::Arc;
use std::task::Poll;
use tower::BoxError;
use tower::Service;

/// A subgraph service that answers from a fixed set of request/response pairs.
#[derive(Clone, Default)]
pub struct MockSubgraph {
    // using an arc to improve efficiency when the service is cloned
    mocks: Arc<Vec<(Request, Response)>>,
}

impl MockSubgraph {
    pub fn builder() -> MockSubgraphBuilder {
        MockSubgraphBuilder::default()
    }
}

/// Builds a [`MockSubgraph`] from JSON fixtures.
#[derive(Default)]
pub struct MockSubgraphBuilder {
    mocks: Vec<(Request, Response)>,
}

impl MockSubgraphBuilder {
    /// Register the response returned when the subgraph receives `request`.
    ///
    /// Both values use the wire format, so `request` typically carries
    /// `query` and optionally `variables`.
    pub fn with_json(mut self, request: serde_json::Value, response: serde_json::Value) -> Self {
        let request = serde_json::from_value(request)
            .expect("the request fixture must be a GraphQL request; qed");
        let response = serde_json::from_value(response)
            .expect("the response fixture must be a GraphQL response; qed");
        self.mocks.push((request, response));
        self
    }

    pub fn build(self) -> MockSubgraph {
        MockSubgraph {
            mocks: Arc::new(self.mocks),
        }
    }
}

impl Service<SubgraphRequest> for MockSubgraph {
    type Response = Response;
    type Error = BoxError;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: SubgraphRequest) -> Self::Future {
        let response = match self
            .mocks
            .iter()
            .find(|(request, _response)| request == &req.body)
        {
            Some((_request, response)) => response.clone(),
            None => Response::builder()
                .errors(vec![Error::builder()
                    .message(format!(
                        "couldn't find mock for request {}",
                        serde_json::to_string(&req.body).unwrap_or_default(),
                    ))
                    .build()])
                .build(),
        };
        future::ok(response)
    }
}
