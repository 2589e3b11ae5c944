#![cfg_attr(feature = "failfast", allow(unreachable_code))]

macro_rules! failfast_debug {
    ($($tokens:tt)+) => {{
        tracing::debug!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

macro_rules! failfast_error {
    ($($tokens:tt)+) => {{
        tracing::error!($($tokens)+);
        #[cfg(feature = "failfast")]
        panic!(
            "failfast triggered. \
            Please remove the feature failfast if you don't want to see these panics"
        );
    }};
}

mod composition;
mod error;
mod json_ext;
pub mod mocks;
mod query_planner;
mod request;
mod response;
mod schema;
mod service_registry;
mod services;
mod spec;
mod tower_compat;
mod traits;

pub use composition::*;
pub use error::*;
pub use json_ext::*;
pub use query_planner::*;
pub use request::*;
pub use response::*;
pub use schema::*;
pub use service_registry::*;
pub use services::*;
pub use spec::*;
pub use tower_compat::*;
pub use traits::*;

pub mod prelude {
    // NOTE: only traits can be added here! Everything else should be scoped under the module
    //       graphql so the user can use, for example:
    //        -  graphql::Request to get a GraphQL Request
    //        -  graphql::Response to get a GraphQL Response
    //        -  ...
    pub use crate::traits::*;
    pub mod graphql {
        pub use crate::*;
    }
}

pub mod reexports {
    pub use serde_json;
    pub use serde_json_bytes;
}
