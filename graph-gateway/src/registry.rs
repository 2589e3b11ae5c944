//! Subgraph schema discovery.
//!
//! Each configured subgraph is asked for its federated SDL through the
//! `_service` field the federation library injects into every subgraph's
//! Query type.

use crate::configuration::Configuration;
use displaydoc::Display;
use futures::future;
use graph_gateway_core::prelude::graphql::*;
use thiserror::Error;
use tower::BoxError;
use tower::ServiceExt;

/// The query sent to every subgraph to obtain its schema.
const SERVICE_SDL_QUERY: &str = "{ _service { sdl } }";

/// Schema discovery error.
#[derive(Debug, Error, Display)]
pub enum RegistryError {
    /// subgraph '{service}' returned errors during introspection: {reason}
    IntrospectionErrors { service: String, reason: String },

    /// subgraph '{service}' did not return its SDL
    MissingSdl { service: String },
}

/// Fetch and parse the SDL of every subgraph in the configuration.
///
/// The fetches run concurrently. Any failure fails the whole discovery:
/// callers decide whether that is fatal (startup) or whether a previous
/// schema stays in place (polling).
pub async fn introspect(configuration: &Configuration) -> Result<Vec<SubgraphSchema>, BoxError> {
    let fetches = configuration.subgraphs.iter().map(|(name, subgraph)| {
        let name = name.clone();
        let url = subgraph.routing_url.clone();
        async move {
            let service = ReqwestSubgraphService::new(name.clone(), url)?;
            let response = service
                .oneshot(SubgraphRequest {
                    service_name: name.clone(),
                    body: Request::builder()
                        .query(SERVICE_SDL_QUERY.to_string())
                        .build(),
                    operation_kind: OperationKind::Query,
                })
                .await?;
            let sdl = extract_sdl(&name, response)?;
            tracing::debug!("fetched SDL from subgraph '{}'", name);
            let schema = SubgraphSchema::parse(name, &sdl).map_err(|err| {
                if let SchemaError::Parse(parse_errors) = &err {
                    parse_errors.print();
                }
                err
            })?;
            Ok::<_, BoxError>(schema)
        }
    });

    future::try_join_all(fetches).await
}

/// Pull `data._service.sdl` out of an introspection response.
fn extract_sdl(service: &str, response: Response) -> Result<String, RegistryError> {
    if !response.errors.is_empty() {
        return Err(RegistryError::IntrospectionErrors {
            service: service.to_string(),
            reason: response
                .errors
                .iter()
                .map(|error| error.message.clone())
                .collect::<Vec<_>>()
                .join(", "),
        });
    }

    response
        .data
        .as_object()
        .and_then(|data| data.get("_service"))
        .and_then(|value| value.as_object())
        .and_then(|service| service.get("sdl"))
        .and_then(|sdl| sdl.as_str())
        .map(|sdl| sdl.to_string())
        .ok_or_else(|| RegistryError::MissingSdl {
            service: service.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use test_log::test;

    fn response(value: serde_json::Value) -> Response {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn sdl_is_extracted_from_the_service_field() {
        let sdl = extract_sdl(
            "user",
            response(json!({
                "data": { "_service": { "sdl": "type Query { me: String }" } }
            })),
        )
        .unwrap();
        assert_eq!(sdl, "type Query { me: String }");
    }

    #[test]
    fn subgraph_errors_fail_discovery() {
        let err = extract_sdl(
            "user",
            response(json!({
                "data": null,
                "errors": [{ "message": "boom" }]
            })),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "subgraph 'user' returned errors during introspection: boom"
        );
    }

    #[test]
    fn a_missing_sdl_fails_discovery() {
        let err = extract_sdl("user", response(json!({ "data": {} }))).unwrap_err();
        assert!(matches!(err, RegistryError::MissingSdl { service } if service == "user"));
    }
}
