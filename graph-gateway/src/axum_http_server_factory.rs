//! The axum HTTP server fronting the router service.

use crate::configuration::Configuration;
use crate::configuration::Cors;
use crate::gateway::GatewayError;
use crate::http_server_factory::HttpServerFactory;
use crate::http_server_factory::HttpServerHandle;
use axum::extract::Extension;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use futures::channel::oneshot;
use futures::prelude::*;
use graph_gateway_core::prelude::graphql::{self, *};
use hyper::server::conn::Http;
use serde_json::json;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tower::ServiceExt;

/// A basic http server using axum.
/// Uses streaming as primary method of response.
#[derive(Debug)]
pub(crate) struct AxumHttpServerFactory;

impl AxumHttpServerFactory {
    pub(crate) fn new() -> Self {
        Self
    }
}

impl HttpServerFactory for AxumHttpServerFactory {
    type Future = Pin<Box<dyn Future<Output = Result<HttpServerHandle, GatewayError>> + Send>>;

    fn create<RS>(
        &self,
        service: RS,
        configuration: Arc<Configuration>,
        listener: Option<TcpListener>,
    ) -> Self::Future
    where
        RS: tower::Service<Request, Response = Response, Error = ()>
            + Clone
            + Send
            + Sync
            + 'static,
        <RS as tower::Service<Request>>::Future: Send,
    {
        Box::pin(async move {
            let (shutdown_sender, mut shutdown_receiver) = oneshot::channel::<()>();
            let listen_address = configuration.server.listen;

            let cors = configuration
                .server
                .cors
                .clone()
                .unwrap_or_else(|| Cors::builder().build())
                .into_layer();

            let app = Router::new()
                .route("/", get(handle_get::<RS>).post(handle_post::<RS>))
                .route("/graphql", get(handle_get::<RS>).post(handle_post::<RS>))
                .route("/.well-known/apollo/server-health", get(health_check))
                .layer(Extension(service))
                .layer(cors);

            // reuse the sockets of the previous server where possible, so a
            // reload does not flap the port
            let listener = match listener {
                Some(listener)
                    if listener
                        .local_addr()
                        .map(|local| reusable(local, listen_address))
                        .unwrap_or(false) =>
                {
                    listener
                }
                _ => TcpListener::bind(listen_address)
                    .await
                    .map_err(GatewayError::ServerCreationError)?,
            };
            let actual_listen_address = listener
                .local_addr()
                .map_err(GatewayError::ServerCreationError)?;

            tracing::info!(
                "🚀 GraphQL endpoint exposed at http://{}/",
                actual_listen_address
            );

            let server = async move {
                let connection_shutdown = Arc::new(Notify::new());

                loop {
                    tokio::select! {
                        _ = &mut shutdown_receiver => {
                            break;
                        }
                        res = listener.accept() => {
                            let app = app.clone();
                            let connection_shutdown = connection_shutdown.clone();

                            let (stream, _peer) = match res {
                                Ok(conn) => conn,
                                Err(err) => {
                                    tracing::error!("could not accept connection: {}", err);
                                    continue;
                                }
                            };

                            tokio::task::spawn(async move {
                                // not considered fatal, the connection just
                                // gets Nagle's algorithm
                                if let Err(err) = stream.set_nodelay(true) {
                                    tracing::trace!("could not set nodelay: {}", err);
                                }

                                let connection = Http::new()
                                    .http1_keep_alive(true)
                                    .serve_connection(stream, app);
                                tokio::pin!(connection);

                                tokio::select! {
                                    _ = &mut connection => {}
                                    _ = connection_shutdown.notified() => {
                                        connection.as_mut().graceful_shutdown();
                                        let _ = connection.await;
                                    }
                                }
                            });
                        }
                    }
                }

                // the accept loop is done, drain the open connections
                connection_shutdown.notify_waiters();

                Ok::<_, GatewayError>(listener)
            };

            let server_future = tokio::spawn(server)
                .map(|join_result| join_result.map_err(|_| GatewayError::HttpServerLifecycleError)?)
                .boxed();

            Ok(HttpServerHandle::new(
                shutdown_sender,
                server_future,
                actual_listen_address,
            ))
        })
    }
}

/// Whether a previously bound socket still satisfies the configured listen
/// address. Port zero always accepts the previous socket: the OS already
/// picked the concrete port for us.
fn reusable(bound: SocketAddr, configured: SocketAddr) -> bool {
    bound == configured || (configured.port() == 0 && bound.ip() == configured.ip())
}

async fn handle_post<RS>(
    Extension(service): Extension<RS>,
    Json(request): Json<Request>,
) -> impl IntoResponse
where
    RS: tower::Service<Request, Response = Response, Error = ()> + Clone + Send + Sync + 'static,
    <RS as tower::Service<Request>>::Future: Send,
{
    let response = service
        .oneshot(request)
        .await
        .expect("the router service is infallible; qed");
    Json(response)
}

async fn handle_get<RS>(
    uri: http::Uri,
    Extension(service): Extension<RS>,
) -> axum::response::Response
where
    RS: tower::Service<Request, Response = Response, Error = ()> + Clone + Send + Sync + 'static,
    <RS as tower::Service<Request>>::Future: Send,
{
    let request = uri
        .query()
        .and_then(|query| graphql::from_urlencoded_query(query.to_string()).ok());

    match request {
        Some(request) => {
            let response = service
                .oneshot(request)
                .await
                .expect("the router service is infallible; qed");
            Json(response).into_response()
        }
        None => (StatusCode::BAD_REQUEST, "Invalid GraphQL request").into_response(),
    }
}

async fn health_check() -> impl IntoResponse {
    Json(json!({ "status": "pass" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use graph_gateway_core::reexports::serde_json_bytes;
    use test_log::test;
    use tower::service_fn;

    fn echo_service(
    ) -> impl tower::Service<
        Request,
        Response = Response,
        Error = (),
        Future = impl Future<Output = Result<Response, ()>> + Send,
    > + Clone
           + Send
           + Sync
           + 'static {
        service_fn(|request: Request| async move {
            Ok(Response::builder()
                .data(serde_json_bytes::json!({
                    "query": request.query,
                }))
                .build())
        })
    }

    async fn serve() -> (HttpServerHandle, String) {
        let configuration = Arc::new(
            Configuration::builder()
                .server(
                    crate::configuration::Server::builder()
                        .listen(SocketAddr::from(([127, 0, 0, 1], 0)))
                        .build(),
                )
                .build(),
        );
        let handle = AxumHttpServerFactory::new()
            .create(echo_service(), configuration, None)
            .await
            .unwrap();
        let base = format!("http://{}", handle.listen_address());
        (handle, base)
    }

    #[test(tokio::test)]
    async fn post_requests_reach_the_router() {
        let (handle, base) = serve().await;

        let response: serde_json::Value = reqwest::Client::new()
            .post(&base)
            .json(&json!({ "query": "{ me }" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, json!({ "data": { "query": "{ me }" } }));

        handle.shutdown().await.unwrap();
    }

    #[test(tokio::test)]
    async fn get_requests_take_the_query_from_the_url() {
        let (handle, base) = serve().await;

        let response: serde_json::Value = reqwest::Client::new()
            .get(format!("{}/graphql?query=%7B+me+%7D", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, json!({ "data": { "query": "{ me }" } }));

        handle.shutdown().await.unwrap();
    }

    #[test(tokio::test)]
    async fn get_requests_without_a_query_are_bad_requests() {
        let (handle, base) = serve().await;

        let status = reqwest::Client::new()
            .get(&base)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);

        handle.shutdown().await.unwrap();
    }

    #[test(tokio::test)]
    async fn the_health_check_responds() {
        let (handle, base) = serve().await;

        let response: serde_json::Value = reqwest::Client::new()
            .get(format!("{}/.well-known/apollo/server-health", base))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, json!({ "status": "pass" }));

        handle.shutdown().await.unwrap();
    }

    #[test(tokio::test)]
    async fn restart_keeps_the_same_port() {
        let (handle, base) = serve().await;
        let address = handle.listen_address();

        let configuration = Arc::new(
            Configuration::builder()
                .server(
                    crate::configuration::Server::builder()
                        .listen(SocketAddr::from(([127, 0, 0, 1], 0)))
                        .build(),
                )
                .build(),
        );
        let handle = handle
            .restart(&AxumHttpServerFactory::new(), echo_service(), configuration)
            .await
            .unwrap();
        assert_eq!(handle.listen_address(), address);

        let response: serde_json::Value = reqwest::Client::new()
            .post(&base)
            .json(&json!({ "query": "{ me }" }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(response, json!({ "data": { "query": "{ me }" } }));

        handle.shutdown().await.unwrap();
    }
}
