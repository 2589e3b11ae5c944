use crate::prelude::graphql::*;
use apollo_parser::ast;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

/// The kind of a type definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDefKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    InputObject,
}

impl std::fmt::Display for TypeDefKind {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let kind = match self {
            TypeDefKind::Object => "object",
            TypeDefKind::Interface => "interface",
            TypeDefKind::Union => "union",
            TypeDefKind::Enum => "enum",
            TypeDefKind::Scalar => "scalar",
            TypeDefKind::InputObject => "input object",
        };
        write!(f, "{kind}")
    }
}

/// A field as declared by one subgraph.
#[derive(Debug, Clone)]
pub struct SubgraphField {
    pub name: String,
    pub ty: FieldType,
    /// The field is owned by another subgraph and only referenced here,
    /// typically as part of a key.
    pub external: bool,
}

/// A type as declared by one subgraph, with `type` and `extend type`
/// definitions already merged.
#[derive(Debug, Clone)]
pub struct SubgraphType {
    pub name: String,
    pub kind: TypeDefKind,
    /// At least one of the definitions was an `extend type`.
    pub is_extension: bool,
    /// `@key(fields:)` selections declared on the type.
    pub keys: Vec<String>,
    pub fields: IndexMap<String, SubgraphField>,
}

/// A single subgraph's schema, parsed from the SDL it serves through
/// `{ _service { sdl } }`.
#[derive(Debug, Clone)]
pub struct SubgraphSchema {
    pub name: String,
    pub types: IndexMap<String, SubgraphType>,
    pub subtype_map: HashMap<String, HashSet<String>>,
    sdl: String,
}

impl SubgraphSchema {
    pub fn parse(name: impl Into<String>, sdl: &str) -> Result<Self, SchemaError> {
        let name = name.into();
        let parser = apollo_parser::Parser::new(sdl);
        let tree = parser.parse();

        let errors = tree.errors().cloned().collect::<Vec<_>>();
        if !errors.is_empty() {
            return Err(SchemaError::Parse(ParseErrors {
                source_name: name,
                raw_schema: sdl.to_string(),
                errors,
            }));
        }

        let document = tree.document();
        let mut types: IndexMap<String, SubgraphType> = IndexMap::new();
        let mut subtype_map: HashMap<String, HashSet<String>> = Default::default();

        for definition in document.definitions() {
            // the subtype map logic is inspired from the npm package graphql:
            // https://github.com/graphql/graphql-js/blob/ac8f0c6b484a0d5dca2dc13c387247f96772580a/src/type/schema.ts#L302-L327
            macro_rules! implements_interfaces {
                ($definition:expr, $name:expr) => {{
                    for key in $definition
                        .implements_interfaces()
                        .iter()
                        .flat_map(|member_types| member_types.named_types().flat_map(|x| x.name()))
                    {
                        let key = key.text().to_string();
                        let set = subtype_map.entry(key).or_default();
                        set.insert($name.clone());
                    }
                }};
            }

            macro_rules! union_member_types {
                ($definition:expr, $name:expr) => {{
                    let set = subtype_map.entry($name.clone()).or_default();

                    for member in $definition
                        .union_member_types()
                        .iter()
                        .flat_map(|member_types| member_types.named_types().flat_map(|x| x.name()))
                    {
                        set.insert(member.text().to_string());
                    }
                }};
            }

            match definition {
                // Spec: https://spec.graphql.org/draft/#ObjectTypeDefinition
                ast::Definition::ObjectTypeDefinition(object) => {
                    let type_name = definition_name(object.name());
                    if is_federation_builtin(&type_name) {
                        continue;
                    }
                    implements_interfaces!(object, type_name);
                    merge_object_definition(
                        &mut types,
                        type_name,
                        TypeDefKind::Object,
                        false,
                        object.directives(),
                        object.fields_definition(),
                    );
                }
                // Spec: https://spec.graphql.org/draft/#sec-Object-Extensions
                ast::Definition::ObjectTypeExtension(object) => {
                    let type_name = definition_name(object.name());
                    if is_federation_builtin(&type_name) {
                        continue;
                    }
                    implements_interfaces!(object, type_name);
                    merge_object_definition(
                        &mut types,
                        type_name,
                        TypeDefKind::Object,
                        true,
                        object.directives(),
                        object.fields_definition(),
                    );
                }
                // Spec: https://spec.graphql.org/draft/#InterfaceTypeDefinition
                ast::Definition::InterfaceTypeDefinition(interface) => {
                    let type_name = definition_name(interface.name());
                    implements_interfaces!(interface, type_name);
                    merge_object_definition(
                        &mut types,
                        type_name,
                        TypeDefKind::Interface,
                        false,
                        interface.directives(),
                        interface.fields_definition(),
                    );
                }
                // Spec: https://spec.graphql.org/draft/#sec-Interface-Extensions
                ast::Definition::InterfaceTypeExtension(interface) => {
                    let type_name = definition_name(interface.name());
                    implements_interfaces!(interface, type_name);
                    merge_object_definition(
                        &mut types,
                        type_name,
                        TypeDefKind::Interface,
                        true,
                        interface.directives(),
                        interface.fields_definition(),
                    );
                }
                // Spec: https://spec.graphql.org/draft/#UnionTypeDefinition
                ast::Definition::UnionTypeDefinition(union) => {
                    let type_name = definition_name(union.name());
                    if is_federation_builtin(&type_name) {
                        continue;
                    }
                    union_member_types!(union, type_name);
                    insert_fieldless(&mut types, type_name, TypeDefKind::Union, false);
                }
                // Spec: https://spec.graphql.org/draft/#sec-Union-Extensions
                ast::Definition::UnionTypeExtension(union) => {
                    let type_name = definition_name(union.name());
                    union_member_types!(union, type_name);
                    insert_fieldless(&mut types, type_name, TypeDefKind::Union, true);
                }
                ast::Definition::EnumTypeDefinition(enum_type) => {
                    let type_name = definition_name(enum_type.name());
                    insert_fieldless(&mut types, type_name, TypeDefKind::Enum, false);
                }
                ast::Definition::EnumTypeExtension(enum_type) => {
                    let type_name = definition_name(enum_type.name());
                    insert_fieldless(&mut types, type_name, TypeDefKind::Enum, true);
                }
                ast::Definition::ScalarTypeDefinition(scalar) => {
                    let type_name = definition_name(scalar.name());
                    if is_federation_builtin(&type_name) {
                        continue;
                    }
                    insert_fieldless(&mut types, type_name, TypeDefKind::Scalar, false);
                }
                ast::Definition::InputObjectTypeDefinition(input) => {
                    let type_name = definition_name(input.name());
                    if is_federation_builtin(&type_name) {
                        continue;
                    }
                    insert_fieldless(&mut types, type_name, TypeDefKind::InputObject, false);
                }
                // schema definitions, directive definitions and the remaining
                // extensions carry nothing the gateway plans against
                _ => {}
            }
        }

        Ok(Self {
            name,
            types,
            subtype_map,
            sdl: sdl.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.sdl
    }
}

/// Federation adds `_Service`, `_Entity`, `_Any` and friends to every
/// subgraph schema. They are plumbing, not part of the composed graph.
fn is_federation_builtin(type_name: &str) -> bool {
    type_name.starts_with('_')
}

fn definition_name(name: Option<ast::Name>) -> String {
    // the parse error check above guarantees well formed definitions
    name.expect("the node Name is not optional in the spec; qed")
        .text()
        .to_string()
}

fn insert_fieldless(
    types: &mut IndexMap<String, SubgraphType>,
    type_name: String,
    kind: TypeDefKind,
    is_extension: bool,
) {
    let entry = types.entry(type_name.clone()).or_insert_with(|| SubgraphType {
        name: type_name,
        kind,
        is_extension,
        keys: Vec::new(),
        fields: IndexMap::new(),
    });
    entry.is_extension |= is_extension;
}

fn merge_object_definition(
    types: &mut IndexMap<String, SubgraphType>,
    type_name: String,
    kind: TypeDefKind,
    is_extension: bool,
    directives: Option<ast::Directives>,
    fields_definition: Option<ast::FieldsDefinition>,
) {
    let entry = types.entry(type_name.clone()).or_insert_with(|| SubgraphType {
        name: type_name,
        kind,
        is_extension,
        keys: Vec::new(),
        fields: IndexMap::new(),
    });
    entry.is_extension |= is_extension;

    for directive in directives
        .iter()
        .flat_map(|directives| directives.directives())
    {
        if directive_name_is(&directive, "key") {
            if let Some(fields) = directive_string_argument(&directive, "fields") {
                if !entry.keys.contains(&fields) {
                    entry.keys.push(fields);
                }
            }
        }
    }

    for field in fields_definition
        .iter()
        .flat_map(|fields| fields.field_definitions())
    {
        let field_name = match field.name() {
            Some(name) => name.text().to_string(),
            None => continue,
        };
        // `_service` and `_entities` are injected by the federation
        // library on every subgraph's Query type
        if field_name.starts_with('_') {
            continue;
        }
        let ty = match field.ty() {
            Some(ty) => FieldType::from(ty),
            None => continue,
        };
        let external = field
            .directives()
            .iter()
            .flat_map(|directives| directives.directives())
            .any(|directive| directive_name_is(&directive, "external"));

        entry.fields.insert(
            field_name.clone(),
            SubgraphField {
                name: field_name,
                ty,
                external,
            },
        );
    }
}

fn directive_name_is(directive: &ast::Directive, name: &str) -> bool {
    directive
        .name()
        .map(|directive_name| directive_name.text().to_string() == name)
        .unwrap_or(false)
}

/// Extract a string argument from a directive, e.g. the `fields` argument of
/// `@key(fields: "id")`.
pub(crate) fn directive_string_argument(directive: &ast::Directive, name: &str) -> Option<String> {
    directive
        .arguments()?
        .arguments()
        .find(|argument| {
            argument
                .name()
                .map(|argument_name| argument_name.text().to_string() == name)
                .unwrap_or(false)
        })
        .and_then(|argument| argument.value())
        .and_then(|value| match value {
            ast::Value::StringValue(s) => {
                Some(s.to_string().trim().trim_matches('"').to_string())
            }
            _ => None,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn parse_entity_with_key() {
        let schema = SubgraphSchema::parse(
            "user",
            r#"
            type Query {
                me: User
            }

            type User @key(fields: "id") {
                id: ID!
                name: String
            }
            "#,
        )
        .unwrap();

        let user = schema.types.get("User").unwrap();
        assert_eq!(user.kind, TypeDefKind::Object);
        assert_eq!(user.keys, vec!["id".to_string()]);
        assert!(!user.is_extension);
        assert_eq!(user.fields.get("id").unwrap().ty, FieldType::NonNull(Box::new(FieldType::Id)));
    }

    #[test]
    fn parse_extension_with_external_fields() {
        let schema = SubgraphSchema::parse(
            "comms",
            r#"
            extend type User @key(fields: "id") {
                id: ID! @external
                messages: [Message]
            }

            type Message {
                body: String
            }
            "#,
        )
        .unwrap();

        let user = schema.types.get("User").unwrap();
        assert!(user.is_extension);
        assert!(user.fields.get("id").unwrap().external);
        assert!(!user.fields.get("messages").unwrap().external);
    }

    #[test]
    fn federation_builtins_are_skipped() {
        let schema = SubgraphSchema::parse(
            "union",
            r#"
            scalar _Any
            type _Service { sdl: String }
            union _Entity = Org

            type Query {
                _service: _Service!
                _entities(representations: [_Any!]!): [_Entity]!
                orgs: [Org]
            }

            type Org @key(fields: "id") {
                id: ID!
            }
            "#,
        )
        .unwrap();

        assert!(schema.types.get("_Service").is_none());
        assert!(schema.types.get("_Any").is_none());
        let query = schema.types.get("Query").unwrap();
        assert!(query.fields.get("_service").is_none());
        assert!(query.fields.get("_entities").is_none());
        assert!(query.fields.get("orgs").is_some());
    }

    #[test]
    fn subtype_map_records_unions_and_interfaces() {
        let schema = SubgraphSchema::parse(
            "union",
            r#"
            union Account = Person | Org
            type Person implements Named { name: String }
            type Org implements Named { name: String }
            interface Named { name: String }
            "#,
        )
        .unwrap();

        assert!(schema.subtype_map.get("Account").unwrap().contains("Person"));
        assert!(schema.subtype_map.get("Account").unwrap().contains("Org"));
        assert!(schema.subtype_map.get("Named").unwrap().contains("Person"));
    }

    #[test]
    fn invalid_sdl_is_reported() {
        let err = SubgraphSchema::parse("broken", "type Query {").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }
}
