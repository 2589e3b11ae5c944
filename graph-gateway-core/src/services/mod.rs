mod subgraph_service;

pub use subgraph_service::*;

use crate::prelude::graphql::*;

/// A GraphQL request addressed to one subgraph.
#[derive(Clone, Debug)]
pub struct SubgraphRequest {
    /// The name of the subgraph this request is for.
    pub service_name: String,

    /// The GraphQL request to send.
    pub body: Request,

    /// The kind of the operation being fetched.
    pub operation_kind: OperationKind,
}
