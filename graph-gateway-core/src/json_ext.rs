use crate::prelude::graphql::*;
use serde::{Deserialize, Serialize};
use serde_json_bytes::ByteString;
use std::cmp::min;
use std::fmt;

/// A JSON object.
pub type Object = serde_json_bytes::Map<ByteString, Value>;

/// A JSON value.
pub type Value = serde_json_bytes::Value;

/// Extension trait for [`Value`].
pub trait ValueExt {
    /// Deep merge the JSON objects, array and override the values in `&mut self` if they already
    /// exists.
    fn deep_merge(&mut self, other: Self);

    /// Returns whether the value is an object that matches the provided `__typename`.
    fn is_object_of_type(&self, maybe_type: &str) -> bool;

    /// Create a `Value` by inserting a value at a subpath.
    ///
    /// This will create objects, arrays and null nodes as needed if they are not present:
    /// the resulting Value is meant to be merged with an existing one.
    fn from_path(path: &Path, value: Value) -> Value;

    /// Insert a `Value` at a `Path`, creating parent nodes as needed.
    fn insert(&mut self, path: &Path, value: Value) -> Result<(), FetchError>;

    /// Select all values matching a `Path`, and apply `f` on each of them with
    /// the concrete path at which it was found.
    ///
    /// Arrays are traversed transparently: a key path element applied to an
    /// array applies to every element of the array.
    fn select_values_and_paths<'a, F>(&'a self, path: &'a Path, f: F)
    where
        F: FnMut(Path, &'a Value);
}

impl ValueExt for Value {
    fn deep_merge(&mut self, other: Self) {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                for (key, value) in b.into_iter() {
                    match a.get_mut(&key) {
                        Some(value_a) => value_a.deep_merge(value),
                        None => {
                            a.insert(key, value);
                        }
                    }
                }
            }
            (Value::Array(a), Value::Array(mut b)) => {
                for (b_value, a_value) in b.drain(..min(a.len(), b.len())).zip(a.iter_mut()) {
                    a_value.deep_merge(b_value);
                }
            }
            (_, Value::Null) => {}
            (Value::Object(_), Value::Array(_)) => {
                failfast_debug!("trying to replace an object with an array");
            }
            (Value::Array(_), Value::Object(_)) => {
                failfast_debug!("trying to replace an array with an object");
            }
            (a, b) => {
                *a = b;
            }
        }
    }

    fn is_object_of_type(&self, maybe_type: &str) -> bool {
        self.as_object()
            .and_then(|o| o.get("__typename"))
            .and_then(|v| v.as_str())
            .map(|typename| typename == maybe_type)
            .unwrap_or_default()
    }

    fn from_path(path: &Path, value: Value) -> Value {
        let mut res_value = value;
        for p in path.iter().rev() {
            match p {
                PathElement::Flatten => {
                    // a flatten element means "any index in the array": the parent value
                    // has to be merged element by element, so there is no single value
                    // we could build here
                    return res_value;
                }
                PathElement::Index(idx) => {
                    let mut array = Vec::with_capacity(idx + 1);
                    for _ in 0..*idx {
                        array.push(Value::Null);
                    }
                    array.push(res_value);
                    res_value = Value::Array(array);
                }
                PathElement::Key(key) => {
                    let mut object = Object::default();
                    object.insert(ByteString::from(key.as_str()), res_value);
                    res_value = Value::Object(object);
                }
            }
        }
        res_value
    }

    fn insert(&mut self, path: &Path, value: Value) -> Result<(), FetchError> {
        let mut current_node = self;

        for p in path.iter() {
            match p {
                PathElement::Flatten => {
                    return Err(FetchError::ExecutionPathNotFound {
                        reason: "cannot insert under a flatten path element".to_string(),
                    });
                }
                PathElement::Index(idx) => {
                    if current_node.is_null() {
                        *current_node = Value::Array(
                            std::iter::repeat(Value::Null).take(idx + 1).collect(),
                        );
                    }
                    match current_node {
                        Value::Array(array) => {
                            if array.len() <= *idx {
                                array.resize(idx + 1, Value::Null);
                            }
                            current_node = array
                                .get_mut(*idx)
                                .expect("the array was just resized; qed");
                        }
                        _ => {
                            return Err(FetchError::ExecutionPathNotFound {
                                reason: format!("expected an array at index {idx}"),
                            });
                        }
                    }
                }
                PathElement::Key(key) => {
                    if current_node.is_null() {
                        *current_node = Value::Object(Object::default());
                    }
                    match current_node {
                        Value::Object(object) => {
                            if !object.contains_key(key.as_str()) {
                                object.insert(ByteString::from(key.as_str()), Value::Null);
                            }
                            current_node = object
                                .get_mut(key.as_str())
                                .expect("the key was just inserted; qed");
                        }
                        _ => {
                            return Err(FetchError::ExecutionPathNotFound {
                                reason: format!("expected an object for key {key}"),
                            });
                        }
                    }
                }
            }
        }

        current_node.deep_merge(value);
        Ok(())
    }

    fn select_values_and_paths<'a, F>(&'a self, path: &'a Path, mut f: F)
    where
        F: FnMut(Path, &'a Value),
    {
        iterate_path(&Path::default(), &path.0, self, &mut f)
    }
}

fn iterate_path<'a, F>(parent: &Path, path: &'a [PathElement], data: &'a Value, f: &mut F)
where
    F: FnMut(Path, &'a Value),
{
    match path.first() {
        None => f(parent.clone(), data),
        Some(PathElement::Flatten) => {
            if let Some(array) = data.as_array() {
                for (i, value) in array.iter().enumerate() {
                    iterate_path(
                        &parent.join(Path::from(i.to_string())),
                        &path[1..],
                        value,
                        f,
                    );
                }
            }
        }
        Some(PathElement::Index(i)) => {
            if let Value::Array(array) = data {
                if let Some(value) = array.get(*i) {
                    iterate_path(
                        &parent.join(Path::from(i.to_string())),
                        &path[1..],
                        value,
                        f,
                    );
                }
            }
        }
        Some(PathElement::Key(k)) => {
            if let Value::Object(object) = data {
                if let Some(value) = object.get(k.as_str()) {
                    iterate_path(&parent.join(Path::from(k.as_str())), &path[1..], value, f);
                }
            } else if let Value::Array(array) = data {
                for (i, value) in array.iter().enumerate() {
                    iterate_path(&parent.join(Path::from(i.to_string())), path, value, f);
                }
            }
        }
    }
}

/// A path element in a JSON value.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    /// A path element that given an array will flatten it into the parent.
    #[serde(
        deserialize_with = "deserialize_flatten",
        serialize_with = "serialize_flatten"
    )]
    Flatten,

    /// An index path element.
    Index(usize),

    /// A key path element.
    Key(String),
}

fn deserialize_flatten<'de, D>(deserializer: D) -> Result<(), D::Error>
where
    D: serde::Deserializer<'de>,
{
    deserializer.deserialize_str(FlattenVisitor)
}

struct FlattenVisitor;

impl<'de> serde::de::Visitor<'de> for FlattenVisitor {
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "a string that is '@'")
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        if s == "@" {
            Ok(())
        } else {
            Err(serde::de::Error::custom("the provided string was not '@'"))
        }
    }
}

fn serialize_flatten<S>(serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str("@")
}

/// A path into the result document.
///
/// This can be composed of strings and numbers.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(pub Vec<PathElement>);

impl Path {
    pub fn from_slice<T: AsRef<str>>(s: &[T]) -> Self {
        Self(
            s.iter()
                .map(|x| x.as_ref())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == "@" {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &PathElement> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    pub fn empty() -> Path {
        Self(Default::default())
    }

    pub fn parent(&self) -> Option<Path> {
        if self.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn join(&self, other: impl AsRef<Self>) -> Self {
        let other = other.as_ref();
        let mut new = Vec::with_capacity(self.0.len() + other.0.len());
        new.extend(self.0.iter().cloned());
        new.extend(other.0.iter().cloned());
        Path(new)
    }
}

impl AsRef<Path> for Path {
    fn as_ref(&self) -> &Path {
        self
    }
}

impl<T> From<T> for Path
where
    T: AsRef<str>,
{
    fn from(s: T) -> Self {
        Self(
            s.as_ref()
                .split('/')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if let Ok(index) = s.parse::<usize>() {
                        PathElement::Index(index)
                    } else if s == "@" {
                        PathElement::Flatten
                    } else {
                        PathElement::Key(s.to_string())
                    }
                })
                .collect(),
        )
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for element in self.iter() {
            write!(f, "/")?;
            match element {
                PathElement::Index(index) => write!(f, "{index}")?,
                PathElement::Key(key) => write!(f, "{key}")?,
                PathElement::Flatten => write!(f, "@")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json_bytes::json;

    macro_rules! assert_is_subset {
        ($a:expr, $b:expr $(,)?) => {
            let mut merged = $b.clone();
            merged.deep_merge($a.clone());
            assert_eq!(merged, $b);
        };
    }

    fn select_values<'a>(path: &'a Path, data: &'a Value) -> Vec<&'a Value> {
        let mut v = Vec::new();
        data.select_values_and_paths(path, |_path, value| v.push(value));
        v
    }

    #[test]
    fn test_get_at_path() {
        let json = json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}});
        let path = Path::from("obj/arr/1/prop1");
        let result = select_values(&path, &json);
        assert_eq!(result, vec![&Value::Number(2.into())]);
    }

    #[test]
    fn test_get_at_path_flatmap() {
        let json = json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}});
        let path = Path::from("obj/arr/@");
        let result = select_values(&path, &json);
        assert_eq!(result, vec![&json!({"prop1":1}), &json!({"prop1":2})]);
    }

    #[test]
    fn test_get_at_path_flatmap_nested() {
        let json = json!({
            "obj": {
                "arr": [
                    {
                        "prop1": [
                            {"prop2": {"prop3": 1}, "prop4": -1},
                            {"prop2": {"prop3": 2}, "prop4": -2},
                        ],
                    },
                    {
                        "prop1": [
                            {"prop2": {"prop3": 3}, "prop4": -3},
                            {"prop2": {"prop3": 4}, "prop4": -4},
                        ],
                    },
                ],
            },
        });
        let path = Path::from("obj/arr/@/prop1/@/prop2");
        let result = select_values(&path, &json);
        assert_eq!(
            result,
            vec![
                &json!({"prop3":1}),
                &json!({"prop3":2}),
                &json!({"prop3":3}),
                &json!({"prop3":4}),
            ],
        );
    }

    #[test]
    fn test_array_transparency() {
        // a key path element traverses arrays transparently
        let json = json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}});
        let path = Path::from("obj/arr/prop1");
        let result = select_values(&path, &json);
        assert_eq!(result, vec![&json!(1), &json!(2)]);
    }

    #[test]
    fn test_deep_merge() {
        let mut json = json!({"obj":{"arr":[{"prop1":1},{"prop2":2}]}});
        json.deep_merge(json!({"obj":{"arr":[{"prop1":2,"prop3":3},{"prop4":4}]}}));
        assert_eq!(
            json,
            json!({"obj":{"arr":[{"prop1":2,"prop3":3},{"prop2":2,"prop4":4}]}}),
        );
    }

    #[test]
    fn test_deep_merge_keeps_values_on_null() {
        let mut json = json!({"obj":{"prop1":1}});
        json.deep_merge(json!({"obj":null}));
        assert_eq!(json, json!({"obj":{"prop1":1}}));
    }

    #[test]
    fn test_from_path() {
        let json = Value::from_path(&Path::from("obj/arr/1/prop1"), json!(42));
        assert_eq!(json, json!({"obj":{"arr":[null,{"prop1":42}]}}));
    }

    #[test]
    fn test_insert_at_path() {
        let mut json = json!({"obj":{"arr":[{"prop1":1},{"prop1":2}]}});
        json.insert(&Path::from("obj/arr/1/prop2"), json!(3)).unwrap();
        assert_eq!(json, json!({"obj":{"arr":[{"prop1":1},{"prop1":2,"prop2":3}]}}));
        assert_is_subset!(json!({"obj":{"arr":[{"prop1":1}]}}), json);
    }

    #[test]
    fn test_insert_at_path_creates_missing_nodes() {
        let mut json = json!({});
        json.insert(&Path::from("obj/arr/2/prop1"), json!(42)).unwrap();
        assert_eq!(json, json!({"obj":{"arr":[null,null,{"prop1":42}]}}));
    }

    #[test]
    fn test_path_serde() {
        let path = Path::from("obj/arr/@/2/prop1");
        let serialized = serde_json::to_string(&path).unwrap();
        assert_eq!(serialized, r#"["obj","arr","@",2,"prop1"]"#);
        let deserialized: Path = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, path);
    }
}
