use crate::prelude::graphql::*;
use derivative::Derivative;
use serde::{
    de::{DeserializeOwned, Error},
    Deserialize, Serialize,
};
use std::sync::Arc;
use typed_builder::TypedBuilder;
use urlencoding::decode;

/// A graphql request.
/// Used for federated and subgraph queries.
#[derive(Clone, Derivative, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
#[derivative(Debug, PartialEq)]
pub struct Request {
    /// The graphql query.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub query: Option<String>,

    /// The optional graphql operation.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    #[builder(default)]
    pub operation_name: Option<String>,

    /// The optional variables in the form of a json object.
    #[serde(
        skip_serializing_if = "Object::is_empty",
        default,
        deserialize_with = "deserialize_null_default"
    )]
    #[builder(default)]
    pub variables: Arc<Object>,

    ///  extensions.
    #[serde(skip_serializing_if = "Object::is_empty", default)]
    #[builder(default)]
    pub extensions: Object,
}

pub fn from_urlencoded_query(url_encoded_query: String) -> Result<Request, serde_json::Error> {
    // decode percent encoded string
    // from the docs `Unencoded `+` is preserved literally, and _not_ changed to a space.`,
    // so let's do it I guess
    let query = url_encoded_query.replace('+', " ");
    let decoded_string =
        decode(query.as_str()).map_err(|e| serde_json::Error::custom(e.to_string()))?;
    let urldecoded: serde_json::Value =
        serde_urlencoded::from_str(&decoded_string).map_err(serde_json::Error::custom)?;

    let operation_name = if let Some(serde_json::Value::String(operation_name)) =
        urldecoded.get("operationName")
    {
        Some(operation_name.clone())
    } else {
        None
    };
    let query = if let Some(serde_json::Value::String(query)) = urldecoded.get("query") {
        Some(query.clone())
    } else {
        None
    };
    let variables = Arc::new(get(&urldecoded, "variables")?.unwrap_or_default());
    let extensions: Object = get(&urldecoded, "extensions")?.unwrap_or_default();

    Ok(Request::builder()
        .query(query)
        .variables(variables)
        .operation_name(operation_name)
        .extensions(extensions)
        .build())
}

fn get<T: DeserializeOwned>(
    object: &serde_json::Value,
    key: &str,
) -> Result<Option<T>, serde_json::Error> {
    if let Some(serde_json::Value::String(byte_string)) = object.get(key) {
        Some(serde_json::from_str(byte_string.as_str())).transpose()
    } else {
        Ok(None)
    }
}

// NOTE: this deserialize helper is used to transform `null` to Default::default()
fn deserialize_null_default<'de, D, T: Default + Deserialize<'de>>(
    deserializer: D,
) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Option<T>>::deserialize(deserializer).map(|x| x.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use serde_json_bytes::json as bjson;
    use test_log::test;

    #[test]
    fn test_request() {
        let data = json!(
        {
          "query": "query aTest($arg1: String!) { test(who: $arg1) }",
          "operationName": "aTest",
          "variables": { "arg1": "me" },
          "extensions": {"extension": 1}
        })
        .to_string();
        let result = serde_json::from_str::<Request>(data.as_str());
        assert_eq!(
            result.unwrap(),
            Request::builder()
                .query("query aTest($arg1: String!) { test(who: $arg1) }".to_owned())
                .operation_name(Some("aTest".to_owned()))
                .variables(Arc::new(
                    bjson!({ "arg1": "me" }).as_object().unwrap().clone()
                ))
                .extensions(bjson!({"extension": 1}).as_object().cloned().unwrap())
                .build()
        );
    }

    #[test]
    fn test_no_variables() {
        let result = serde_json::from_str::<Request>(
            json!(
            {
              "query": "query aTest($arg1: String!) { test(who: $arg1) }",
              "operationName": "aTest",
              "extensions": {"extension": 1}
            })
            .to_string()
            .as_str(),
        );
        assert_eq!(
            result.unwrap(),
            Request::builder()
                .query("query aTest($arg1: String!) { test(who: $arg1) }".to_owned())
                .operation_name(Some("aTest".to_owned()))
                .extensions(bjson!({"extension": 1}).as_object().cloned().unwrap())
                .build()
        );
    }

    #[test]
    // rover sends { "variables": null } when running the introspection query,
    // and possibly running other queries as well.
    fn test_variables_is_null() {
        let result = serde_json::from_str::<Request>(
            json!(
            {
              "query": "query aTest($arg1: String!) { test(who: $arg1) }",
              "operationName": "aTest",
              "variables": null,
              "extensions": {"extension": 1}
            })
            .to_string()
            .as_str(),
        );
        assert_eq!(
            result.unwrap(),
            Request::builder()
                .query("query aTest($arg1: String!) { test(who: $arg1) }".to_owned())
                .operation_name(Some("aTest".to_owned()))
                .extensions(bjson!({"extension": 1}).as_object().cloned().unwrap())
                .build()
        );
    }

    #[test]
    fn from_urlencoded_query_works() {
        let query_string = "query=%7B+me+%7B+name+posts+%7B+title+comments+%7B+body+author+%7B+id+name+%7D+%7D+%7D+%7D+%7D&variables=%7B+%22limit%22+%3A+10+%7D".to_string();

        let expected_result = serde_json::from_str::<Request>(
            json!(
            {
              "query": "{ me { name posts { title comments { body author { id name } } } } }",
              "variables": { "limit": 10 }
            })
            .to_string()
            .as_str(),
        )
        .unwrap();

        let req = from_urlencoded_query(query_string).unwrap();

        assert_eq!(expected_result, req);
    }
}
