//! Gateway configuration: the HTTP server options and the subgraph catalog.

use displaydoc::Display;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;
use typed_builder::TypedBuilder;
use url::Url;

/// Configuration error.
#[derive(Debug, Error, Display)]
pub enum ConfigurationError {
    /// could not read configuration: {0}
    Io(#[from] std::io::Error),

    /// the configuration could not be parsed: {0}
    InvalidConfiguration(#[from] serde_yaml::Error),
}

/// The gateway configuration, deserialized from YAML.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Configuration {
    /// Configuration options pertaining to the http server component.
    #[serde(default)]
    #[builder(default)]
    pub server: Server,

    /// The subgraphs this gateway fronts, keyed by name.
    #[serde(default = "default_subgraphs")]
    #[builder(default = default_subgraphs())]
    pub subgraphs: IndexMap<String, Subgraph>,
}

impl Default for Configuration {
    fn default() -> Self {
        Configuration::builder().build()
    }
}

impl Configuration {
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }
}

impl FromStr for Configuration {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(serde_yaml::from_str(s)?)
    }
}

/// Configuration options pertaining to the http server component.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Server {
    /// The socket address and port to listen on.
    /// Defaults to 127.0.0.1:4000. A port of 0 asks the OS for a free port.
    #[serde(default = "default_listen")]
    #[builder(default = default_listen())]
    pub listen: SocketAddr,

    /// Cross origin request headers.
    #[serde(default)]
    #[builder(default)]
    pub cors: Option<Cors>,
}

impl Default for Server {
    fn default() -> Self {
        Server::builder().build()
    }
}

/// A subgraph deployment the gateway can fetch from.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Subgraph {
    /// The URL the subgraph accepts GraphQL requests on.
    pub routing_url: Url,
}

/// Cross origin request configuration.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema, TypedBuilder)]
#[serde(deny_unknown_fields)]
pub struct Cors {
    /// Set to true to allow any origin.
    #[serde(default)]
    #[builder(default)]
    pub allow_any_origin: Option<bool>,

    /// The origin(s) to allow requests from.
    #[serde(default)]
    #[builder(default)]
    pub origins: Vec<String>,
}

impl Cors {
    pub(crate) fn into_layer(self) -> tower_http::cors::CorsLayer {
        let cors = tower_http::cors::CorsLayer::new()
            .allow_headers(tower_http::cors::Any)
            .allow_methods(vec![http::Method::GET, http::Method::POST]);
        if self.allow_any_origin.unwrap_or_default() {
            cors.allow_origin(tower_http::cors::Any)
        } else {
            cors.allow_origin(tower_http::cors::AllowOrigin::list(
                self.origins.iter().filter_map(|origin| origin.parse().ok()),
            ))
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_subgraphs() -> IndexMap<String, Subgraph> {
    [
        ("union", "http://localhost:4001/graphql"),
        ("user", "http://localhost:4002/graphql"),
        ("comms", "http://localhost:4003/graphql"),
    ]
    .into_iter()
    .map(|(name, url)| {
        (
            name.to_string(),
            Subgraph {
                routing_url: Url::parse(url).expect("default subgraph URLs are valid; qed"),
            },
        )
    })
    .collect()
}
