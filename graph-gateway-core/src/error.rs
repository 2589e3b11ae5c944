use crate::prelude::graphql::*;
use displaydoc::Display;
use miette::{Diagnostic, NamedSource, Report, SourceSpan};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use typed_builder::TypedBuilder;

/// Error types for execution.
///
/// Note that these are not actually returned to the client, but are instead converted to JSON for
/// [`struct@Error`].
#[derive(Error, Display, Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[ignore_extra_doc_attributes]
pub enum FetchError {
    /// query references unknown service '{service}'
    ValidationUnknownServiceError {
        /// The service that was unknown.
        service: String,
    },

    /// missing variable: '{name}'
    ValidationMissingVariable {
        /// Name of the variable.
        name: String,
    },

    /// query could not be planned: {reason}
    ValidationPlanningError {
        /// The failure reason.
        reason: String,
    },

    /// response was malformed: {reason}
    MalformedResponse {
        /// The reason the serialization failed.
        reason: String,
    },

    /// service '{service}' response was malformed: {reason}
    SubrequestMalformedResponse {
        /// The service that responded with the malformed response.
        service: String,

        /// The reason the serialization failed.
        reason: String,
    },

    /// HTTP fetch failed from '{service}': {reason}
    ///
    /// note that this relates to a transport error and not a GraphQL error
    SubrequestHttpError {
        /// The service failed.
        service: String,

        /// The reason the fetch failed.
        reason: String,
    },

    /// subquery requires field '{field}' but it was not found in the current response
    ExecutionFieldNotFound {
        /// The field that is not found.
        field: String,
    },

    /// invalid content: {reason}
    ExecutionInvalidContent { reason: String },

    /// could not find path: {reason}
    ExecutionPathNotFound { reason: String },
}

impl FetchError {
    /// Convert the fetch error to a GraphQL error.
    pub fn to_graphql_error(&self, path: Option<Path>) -> Error {
        let value: Value = serde_json::to_value(self).unwrap_or_default().into();
        Error {
            message: self.to_string(),
            locations: Default::default(),
            path,
            extensions: value.as_object().cloned().unwrap_or_default(),
        }
    }

    /// Convert the error to an appropriate response.
    pub fn to_response(&self) -> Response {
        Response {
            errors: vec![self.to_graphql_error(None)],
            ..Response::default()
        }
    }
}

impl From<QueryPlannerError> for FetchError {
    fn from(err: QueryPlannerError) -> Self {
        FetchError::ValidationPlanningError {
            reason: err.to_string(),
        }
    }
}

/// Any error.
#[derive(Error, Debug, Clone, Default, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    /// The error message.
    pub message: String,

    /// The locations of the error from the originating request.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    #[builder(default)]
    pub locations: Vec<Location>,

    /// The path of the error.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub path: Option<Path>,

    /// The optional graphql extensions.
    #[serde(default, skip_serializing_if = "Object::is_empty")]
    #[builder(default)]
    pub extensions: Object,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A location in the request that triggered the error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The line number.
    pub line: u32,

    /// The column number.
    pub column: u32,
}

/// Error during query planning.
#[derive(Error, Display, Debug, Clone)]
pub enum QueryPlannerError {
    /// the query could not be parsed: {0}
    ParseError(String),

    /// unknown operation named '{0}'
    UnknownOperation(String),

    /// the request did not contain an operation to execute
    MissingOperation,

    /// subscriptions are not supported
    SubscriptionsNotSupported,

    /// introspection queries cannot be planned against the supergraph
    IntrospectionNotSupported,

    /// cannot query field '{field}' on type '{parent}'
    UnknownField {
        /// The parent type.
        parent: String,

        /// The requested field.
        field: String,
    },

    /// entity '{type_name}' has no key usable from service '{service}'
    MissingEntityKey {
        /// The entity type.
        type_name: String,

        /// The service that would resolve the entity.
        service: String,
    },
}

/// Error during schema composition.
#[derive(Error, Display, Debug, Clone)]
pub enum CompositionError {
    /// no subgraph schemas were provided
    NoSubgraphs,

    /// the composed schema has no query type
    NoQueryType,

    /// field '{type_name}.{field}' is defined by both '{first}' and '{second}'
    FieldConflict {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// type '{type_name}' is declared with incompatible kinds by '{first}' and '{second}'
    TypeKindConflict {
        type_name: String,
        first: String,
        second: String,
    },

    /// value type field '{type_name}.{field}' differs between '{first}' and '{second}'
    ValueTypeMismatch {
        type_name: String,
        field: String,
        first: String,
        second: String,
    },

    /// invalid schema for subgraph '{subgraph}': {reason}
    InvalidSubgraph {
        subgraph: String,
        reason: String,
    },
}

/// Error types for schema parsing.
#[derive(Error, Debug, Display)]
pub enum SchemaError {
    /// IO error: {0}
    IoError(#[from] std::io::Error),

    /// parsing error(s).
    Parse(ParseErrors),
}

/// Collection of schema parsing errors.
#[derive(Debug)]
pub struct ParseErrors {
    pub(crate) source_name: String,
    pub(crate) raw_schema: String,
    pub(crate) errors: Vec<apollo_parser::Error>,
}

#[derive(Error, Debug, Diagnostic)]
#[error("{}", self.ty)]
#[diagnostic(code("apollo-parser"), help("{}", self.ty))]
struct ParserError {
    ty: String,
    #[source_code]
    src: NamedSource,
    #[label("{}", self.ty)]
    span: SourceSpan,
}

impl ParseErrors {
    #[allow(clippy::needless_return)]
    pub fn print(&self) {
        if atty::is(atty::Stream::Stdout) {
            // Fancy Miette reports for TTYs
            self.errors.iter().for_each(|err| {
                let report = Report::new(ParserError {
                    src: NamedSource::new(self.source_name.clone(), self.raw_schema.clone()),
                    span: (err.index(), err.data().len()).into(),
                    ty: err.message().into(),
                });
                println!("{:?}", report);
            });
        } else {
            // Best effort to display errors
            self.errors.iter().for_each(|r| {
                tracing::error!("{} (in {})", r.message(), self.source_name);
            });
        };
    }
}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        for (index, error) in self.errors.iter().enumerate() {
            if index > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{}: {}", self.source_name, error.message())?;
        }
        Ok(())
    }
}
