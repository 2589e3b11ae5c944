use crate::prelude::graphql::*;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// A field of the composed supergraph.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub ty: FieldType,
    /// The subgraphs able to resolve this field, the owner first.
    pub subgraphs: Vec<String>,
}

impl FieldDef {
    /// The subgraph responsible for this field when no other context applies.
    pub fn owner(&self) -> &str {
        self.subgraphs
            .first()
            .map(|s| s.as_str())
            .expect("a composed field always has at least one resolver; qed")
    }

    pub fn is_resolvable_in(&self, subgraph: &str) -> bool {
        self.subgraphs.iter().any(|s| s == subgraph)
    }
}

/// A type of the composed supergraph.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeDefKind,
    /// `@key(fields:)` selections usable per subgraph. A type with at least
    /// one key is an entity and can be fetched through `_entities`.
    pub keys: IndexMap<String, Vec<String>>,
    pub fields: IndexMap<String, FieldDef>,
    /// All subgraphs that declare this type.
    pub subgraphs: HashSet<String>,
}

impl TypeDef {
    pub fn is_entity(&self) -> bool {
        !self.keys.is_empty()
    }

    /// The key usable to fetch this entity from the given subgraph.
    pub fn key_for(&self, subgraph: &str) -> Option<&str> {
        self.keys
            .get(subgraph)
            .and_then(|keys| keys.first())
            .map(|key| key.as_str())
    }
}

/// The supergraph schema composed from all subgraph schemas.
#[derive(Debug, Clone, Default)]
pub struct ComposedSchema {
    pub types: IndexMap<String, TypeDef>,
    subtype_map: HashMap<String, HashSet<String>>,
}

impl ComposedSchema {
    pub fn query_type(&self) -> Option<&TypeDef> {
        self.types.get("Query")
    }

    pub fn mutation_type(&self) -> Option<&TypeDef> {
        self.types.get("Mutation")
    }

    pub fn root_type(&self, kind: OperationKind) -> Option<&TypeDef> {
        match kind {
            OperationKind::Query => self.query_type(),
            OperationKind::Mutation => self.mutation_type(),
            OperationKind::Subscription => None,
        }
    }

    pub fn is_subtype(&self, abstract_type: &str, maybe_subtype: &str) -> bool {
        self.subtype_map
            .get(abstract_type)
            .map(|x| x.contains(maybe_subtype))
            .unwrap_or(false)
    }
}

/// Compose subgraph schemas into a supergraph.
///
/// Composition validates the federation contract between the subgraphs:
/// a root field lives in exactly one subgraph, an entity field is claimed by
/// exactly one subgraph unless it is part of a key, and value types must look
/// the same everywhere they appear.
pub fn compose(subgraphs: &[SubgraphSchema]) -> Result<ComposedSchema, CompositionError> {
    if subgraphs.is_empty() {
        return Err(CompositionError::NoSubgraphs);
    }

    let mut types: IndexMap<String, TypeDef> = IndexMap::new();
    let mut subtype_map: HashMap<String, HashSet<String>> = Default::default();

    for subgraph in subgraphs {
        for (key, subtypes) in &subgraph.subtype_map {
            subtype_map
                .entry(key.clone())
                .or_default()
                .extend(subtypes.iter().cloned());
        }

        for subgraph_type in subgraph.types.values() {
            let type_def = match types.entry(subgraph_type.name.clone()) {
                indexmap::map::Entry::Occupied(entry) => {
                    let type_def = entry.into_mut();
                    if type_def.kind != subgraph_type.kind {
                        return Err(CompositionError::TypeKindConflict {
                            type_name: subgraph_type.name.clone(),
                            first: type_def
                                .subgraphs
                                .iter()
                                .next()
                                .cloned()
                                .unwrap_or_default(),
                            second: subgraph.name.clone(),
                        });
                    }
                    type_def
                }
                indexmap::map::Entry::Vacant(entry) => entry.insert(TypeDef {
                    name: subgraph_type.name.clone(),
                    kind: subgraph_type.kind,
                    keys: IndexMap::new(),
                    fields: IndexMap::new(),
                    subgraphs: HashSet::new(),
                }),
            };

            type_def.subgraphs.insert(subgraph.name.clone());
            if !subgraph_type.keys.is_empty() {
                type_def
                    .keys
                    .insert(subgraph.name.clone(), subgraph_type.keys.clone());
            }
        }
    }

    // fields are merged in a second pass so entity detection sees every
    // subgraph's keys
    for subgraph in subgraphs {
        for subgraph_type in subgraph.types.values() {
            let is_root = subgraph_type.name == "Query" || subgraph_type.name == "Mutation";
            let type_def = types
                .get_mut(&subgraph_type.name)
                .expect("every subgraph type was registered in the first pass; qed");
            let is_entity = type_def.is_entity();
            let key_fields: HashSet<String> = type_def
                .keys
                .values()
                .flat_map(|keys| keys.iter())
                .flat_map(|key| key.split_whitespace())
                .map(|field| field.to_string())
                .collect();

            for field in subgraph_type.fields.values() {
                if field.external {
                    // resolved by the owning subgraph, only referenced here
                    continue;
                }
                match type_def.fields.get_mut(&field.name) {
                    Some(existing) => {
                        let first = existing.owner().to_string();
                        if is_root {
                            return Err(CompositionError::FieldConflict {
                                type_name: subgraph_type.name.clone(),
                                field: field.name.clone(),
                                first,
                                second: subgraph.name.clone(),
                            });
                        }
                        if existing.ty != field.ty {
                            return Err(CompositionError::ValueTypeMismatch {
                                type_name: subgraph_type.name.clone(),
                                field: field.name.clone(),
                                first,
                                second: subgraph.name.clone(),
                            });
                        }
                        if is_entity && !key_fields.contains(field.name.as_str()) {
                            return Err(CompositionError::FieldConflict {
                                type_name: subgraph_type.name.clone(),
                                field: field.name.clone(),
                                first,
                                second: subgraph.name.clone(),
                            });
                        }
                        existing.subgraphs.push(subgraph.name.clone());
                    }
                    None => {
                        type_def.fields.insert(
                            field.name.clone(),
                            FieldDef {
                                name: field.name.clone(),
                                ty: field.ty.clone(),
                                subgraphs: vec![subgraph.name.clone()],
                            },
                        );
                    }
                }
            }
        }
    }

    let schema = ComposedSchema { types, subtype_map };
    if schema.query_type().is_none() {
        return Err(CompositionError::NoQueryType);
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    fn subgraph(name: &str, sdl: &str) -> SubgraphSchema {
        SubgraphSchema::parse(name, sdl).unwrap()
    }

    fn deployment() -> Vec<SubgraphSchema> {
        vec![
            subgraph(
                "union",
                r#"
                type Query {
                    orgs: [Org]
                }

                type Org @key(fields: "id") {
                    id: ID!
                    name: String
                }
                "#,
            ),
            subgraph(
                "user",
                r#"
                type Query {
                    me: User
                    user(id: ID!): User
                }

                type User @key(fields: "id") {
                    id: ID!
                    name: String
                    org: Org
                }

                extend type Org @key(fields: "id") {
                    id: ID! @external
                    members: [User]
                }
                "#,
            ),
            subgraph(
                "comms",
                r#"
                type Query {
                    inbox: [Message]
                }

                type Message {
                    id: ID!
                    body: String
                    author: User
                }

                extend type User @key(fields: "id") {
                    id: ID! @external
                    messages: [Message]
                }
                "#,
            ),
        ]
    }

    #[test]
    fn composes_the_three_subgraphs() {
        let schema = compose(&deployment()).unwrap();

        let query = schema.query_type().unwrap();
        assert_eq!(query.fields.get("orgs").unwrap().owner(), "union");
        assert_eq!(query.fields.get("me").unwrap().owner(), "user");
        assert_eq!(query.fields.get("inbox").unwrap().owner(), "comms");

        let user = schema.types.get("User").unwrap();
        assert!(user.is_entity());
        assert_eq!(user.key_for("user"), Some("id"));
        assert_eq!(user.key_for("comms"), Some("id"));
        assert_eq!(user.fields.get("name").unwrap().owner(), "user");
        assert_eq!(user.fields.get("messages").unwrap().owner(), "comms");

        let org = schema.types.get("Org").unwrap();
        assert_eq!(org.fields.get("members").unwrap().owner(), "user");
    }

    #[test]
    fn rejects_duplicate_root_fields() {
        let err = compose(&[
            subgraph("a", "type Query { me: String }"),
            subgraph("b", "type Query { me: String }"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompositionError::FieldConflict { type_name, field, .. }
                if type_name == "Query" && field == "me"
        ));
    }

    #[test]
    fn rejects_conflicting_entity_fields() {
        let err = compose(&[
            subgraph(
                "a",
                r#"
                type Query { me: User }
                type User @key(fields: "id") { id: ID! name: String }
                "#,
            ),
            subgraph(
                "b",
                r#"
                extend type User @key(fields: "id") {
                    id: ID! @external
                    name: String
                }
                "#,
            ),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompositionError::FieldConflict { type_name, field, .. }
                if type_name == "User" && field == "name"
        ));
    }

    #[test]
    fn rejects_kind_conflicts() {
        let err = compose(&[
            subgraph("a", "type Query { x: Thing } type Thing { id: ID }"),
            subgraph("b", "enum Thing { A B }"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompositionError::TypeKindConflict { type_name, .. } if type_name == "Thing"
        ));
    }

    #[test]
    fn value_types_may_repeat_when_identical() {
        let schema = compose(&[
            subgraph(
                "a",
                "type Query { a: Money } type Money { amount: Int currency: String }",
            ),
            subgraph(
                "b",
                "type Query { b: Money } type Money { amount: Int currency: String }",
            ),
        ])
        .unwrap();

        let money = schema.types.get("Money").unwrap();
        assert!(!money.is_entity());
        assert!(money.fields.get("amount").unwrap().is_resolvable_in("a"));
        assert!(money.fields.get("amount").unwrap().is_resolvable_in("b"));
    }

    #[test]
    fn value_types_must_agree_on_field_types() {
        let err = compose(&[
            subgraph("a", "type Query { a: Money } type Money { amount: Int }"),
            subgraph("b", "type Query { b: Money } type Money { amount: Float }"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            CompositionError::ValueTypeMismatch { type_name, field, .. }
                if type_name == "Money" && field == "amount"
        ));
    }

    #[test]
    fn requires_a_query_type() {
        let err = compose(&[subgraph("a", "type User { id: ID }")]).unwrap_err();
        assert!(matches!(err, CompositionError::NoQueryType));

        let err = compose(&[]).unwrap_err();
        assert!(matches!(err, CompositionError::NoSubgraphs));
    }

    #[test]
    fn merges_subtype_maps_across_subgraphs() {
        let schema = compose(&[
            subgraph("a", "type Query { x: Account } union Account = Person"),
            subgraph("b", "extend union Account = Org type Org { id: ID }"),
        ])
        .unwrap();
        assert!(schema.is_subtype("Account", "Person"));
        assert!(schema.is_subtype("Account", "Org"));
    }
}
