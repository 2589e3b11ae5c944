//! A federation gateway.
//!
//! The gateway composes a supergraph out of the schemas served by a set of
//! subgraphs, then answers GraphQL requests by planning them across those
//! subgraphs and merging the results.
//!
//! [`GraphGateway`] is the entry point: give it a [`ConfigurationSource`], a
//! [`SchemaSource`] and a [`ShutdownSource`] and call
//! [`serve`][GraphGateway::serve].

mod axum_http_server_factory;
pub mod configuration;
mod files;
mod gateway;
mod graph_router;
mod http_server_factory;
pub mod registry;
mod router_factory;
mod state_machine;

pub use configuration::Configuration;
pub use gateway::ConfigurationSource;
pub use gateway::GatewayError;
pub use gateway::GatewayHandle;
pub use gateway::GraphGateway;
pub use gateway::SchemaSource;
pub use gateway::SchemaUpdate;
pub use gateway::ShutdownSource;
pub use gateway::State;
pub use graph_router::GraphRouter;
pub use graph_router::PreparedGraphQuery;
pub use router_factory::GraphRouterFactory;
pub use router_factory::RouterServiceFactory;
