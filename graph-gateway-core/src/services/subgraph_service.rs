use crate::prelude::graphql::*;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use tower::{BoxError, Service};
use url::Url;

/// A [`tower::Service`] fetching from a subgraph over HTTP with reqwest.
#[derive(Clone)]
pub struct ReqwestSubgraphService {
    http_client: reqwest_middleware::ClientWithMiddleware,
    service: Arc<String>,
    url: Arc<Url>,
}

impl ReqwestSubgraphService {
    /// Construct a new http subgraph fetcher that will fetch from the supplied URL.
    pub fn new(service: impl Into<String>, url: Url) -> Result<Self, BoxError> {
        let service = service.into();

        Ok(Self {
            http_client: reqwest_middleware::ClientBuilder::new(
                reqwest::Client::builder()
                    .tcp_keepalive(Some(std::time::Duration::from_secs(5)))
                    .build()?,
            )
            .with(LoggingMiddleware::new(&service))
            .build(),
            service: Arc::new(service),
            url: Arc::new(url),
        })
    }
}

impl Service<SubgraphRequest> for ReqwestSubgraphService {
    type Response = Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: SubgraphRequest) -> Self::Future {
        let http_client = self.http_client.clone();
        let service = self.service.clone();
        let url = self.url.clone();
        Box::pin(async move {
            tracing::debug!("making request to {} at {}", service, url);
            let response = http_client
                .post(url.as_ref().clone())
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(&request.body)?)
                .send()
                .await?;

            let body = response.bytes().await?;
            Ok(Response::from_bytes(&service, body)?)
        })
    }
}

struct LoggingMiddleware {
    service: String,
}

impl LoggingMiddleware {
    fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

#[async_trait::async_trait]
impl reqwest_middleware::Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: reqwest::Request,
        extensions: &mut task_local_extensions::Extensions,
        next: reqwest_middleware::Next<'_>,
    ) -> reqwest_middleware::Result<reqwest::Response> {
        tracing::trace!("request to service {}: {:?}", self.service, req);
        let res = next.run(req, extensions).await;
        tracing::trace!("response from service {}: {:?}", self.service, res);
        res
    }
}
