use super::fetch::FetchNode;
use super::selection as requires;
use crate::prelude::graphql::*;
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;

/// A query planner that builds federation plans directly from the composed
/// schema.
///
/// Planning walks the client operation once per subgraph context: fields the
/// current subgraph can resolve stay in the local sub-operation, fields owned
/// by another subgraph become `_entities` fetches flattened at the path where
/// the parent entity lives. Residual fetches are processed in waves so an
/// entity field resolved by subgraph B can itself hand fields off to
/// subgraph C.
#[derive(Debug)]
pub struct NativeQueryPlanner {
    schema: Arc<ComposedSchema>,
}

/// A group of entity fields that has to be resolved by another subgraph.
#[derive(Debug)]
struct Residual {
    /// Where the parent entities live in the response data.
    path: Path,
    /// The entity type.
    type_name: String,
    /// The subgraph that resolves the fields.
    service_name: String,
    /// The key selection usable to build representations.
    key: String,
    /// The client selections handed off to that subgraph.
    selections: Vec<Selection>,
}

impl NativeQueryPlanner {
    pub fn new(schema: Arc<ComposedSchema>) -> Self {
        Self { schema }
    }

    fn plan(&self, operation: &Operation) -> Result<PlanNode, QueryPlannerError> {
        if operation.kind == OperationKind::Subscription {
            return Err(QueryPlannerError::SubscriptionsNotSupported);
        }

        let root_type = self.schema.root_type(operation.kind).ok_or_else(|| {
            QueryPlannerError::UnknownField {
                parent: "schema".to_string(),
                field: operation.kind.to_string(),
            }
        })?;

        let root_selections = flatten_root_fragments(&operation.selection_set, &root_type.name)?;

        let mut residuals: Vec<Residual> = Vec::new();
        // (service, local selections); for mutations a new group starts
        // whenever the owning subgraph changes, to preserve execution order
        let mut groups: Vec<(String, Vec<Selection>)> = Vec::new();

        for selection in &root_selections {
            let field = match selection {
                Selection::Field(field) => field,
                Selection::InlineFragment(_) => {
                    unreachable!("root fragments were flattened above; qed")
                }
            };

            if field.name == "__typename" {
                // root `__typename` is answered from the composed schema at
                // execution time, no subgraph sees it
                continue;
            }
            if field.name.starts_with("__") {
                return Err(QueryPlannerError::IntrospectionNotSupported);
            }

            let field_def = root_type.fields.get(&field.name).ok_or_else(|| {
                QueryPlannerError::UnknownField {
                    parent: root_type.name.clone(),
                    field: field.name.clone(),
                }
            })?;
            let service_name = field_def.owner().to_string();

            let mut path_elements = vec![PathElement::Key(field.response_name().to_string())];
            if field_def.ty.is_list() {
                path_elements.push(PathElement::Flatten);
            }
            let path = Path(path_elements);

            let selection_set = self.split_selection_set(
                field_def,
                &field.selection_set,
                &service_name,
                &path,
                &mut residuals,
            )?;

            let local = Selection::Field(Field {
                selection_set,
                ..field.clone()
            });

            let same_group = match operation.kind {
                // queries merge all of a subgraph's root fields in one fetch
                OperationKind::Query => groups
                    .iter_mut()
                    .find(|(service, _)| service == &service_name),
                // mutations only merge adjacent fields of the same subgraph
                _ => groups
                    .last_mut()
                    .filter(|(service, _)| service == &service_name),
            };
            match same_group {
                Some((_, selections)) => selections.push(local),
                None => groups.push((service_name, vec![local])),
            }
        }

        if groups.is_empty() {
            // nothing but `__typename`: no subgraph is involved
            return Ok(PlanNode::Sequence { nodes: Vec::new() });
        }

        let mut root_nodes = Vec::new();
        for (service_name, selections) in groups {
            let usages = variable_usages(&selections);
            let operation_string =
                print_root_operation(operation.kind, &operation.variables, &usages, &selections);
            let mut variable_usages = usages.into_iter().collect::<Vec<_>>();
            variable_usages.sort();
            root_nodes.push(PlanNode::Fetch(FetchNode {
                service_name,
                requires: Vec::new(),
                variable_usages,
                operation: operation_string,
                operation_kind: operation.kind,
            }));
        }

        let root_node = if root_nodes.len() == 1 {
            root_nodes
                .pop()
                .expect("the vector holds exactly one node; qed")
        } else if operation.kind == OperationKind::Mutation {
            PlanNode::Sequence { nodes: root_nodes }
        } else {
            PlanNode::Parallel { nodes: root_nodes }
        };

        let mut nodes = vec![root_node];
        let mut pending = residuals;
        while !pending.is_empty() {
            let mut wave_nodes = Vec::new();
            let mut next_wave = Vec::new();

            for residual in pending {
                wave_nodes.push(self.entity_fetch(operation, residual, &mut next_wave)?);
            }

            if wave_nodes.len() == 1 {
                nodes.push(
                    wave_nodes
                        .pop()
                        .expect("the vector holds exactly one node; qed"),
                );
            } else {
                nodes.push(PlanNode::Parallel { nodes: wave_nodes });
            }
            pending = next_wave;
        }

        if nodes.len() == 1 {
            Ok(nodes
                .pop()
                .expect("the vector holds exactly one node; qed"))
        } else {
            Ok(PlanNode::Sequence { nodes })
        }
    }

    /// Build the `Flatten(Fetch)` node resolving one residual group through
    /// `_entities`.
    fn entity_fetch(
        &self,
        operation: &Operation,
        residual: Residual,
        next_wave: &mut Vec<Residual>,
    ) -> Result<PlanNode, QueryPlannerError> {
        let parent = self
            .schema
            .types
            .get(&residual.type_name)
            .expect("residuals always reference composed types; qed");

        let mut kept = Vec::new();
        for selection in &residual.selections {
            let field = match selection {
                Selection::Field(field) => field,
                Selection::InlineFragment(_) => {
                    unreachable!("residuals only carry field selections; qed")
                }
            };
            let field_def = parent.fields.get(&field.name).ok_or_else(|| {
                QueryPlannerError::UnknownField {
                    parent: residual.type_name.clone(),
                    field: field.name.clone(),
                }
            })?;
            let mut field_path = residual.path.join(Path::from(field.response_name()));
            if field_def.ty.is_list() {
                field_path.0.push(PathElement::Flatten);
            }
            let selection_set = self.split_selection_set(
                field_def,
                &field.selection_set,
                &residual.service_name,
                &field_path,
                next_wave,
            )?;
            kept.push(Selection::Field(Field {
                selection_set,
                ..field.clone()
            }));
        }

        let usages = variable_usages(&kept);
        let mut variable_definitions = vec!["$representations: [_Any!]!".to_string()];
        variable_definitions.extend(
            operation
                .variables
                .iter()
                .filter(|definition| usages.contains(&definition.name))
                .map(|definition| definition.to_string()),
        );

        let printed = kept
            .iter()
            .map(|selection| selection.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let operation_string = format!(
            "query({}) {{ _entities(representations: $representations) {{ ... on {} {{ {} }} }} }}",
            variable_definitions.join(", "),
            residual.type_name,
            printed,
        );

        let key_selections = parse_key_fields(&residual.key)?;
        let mut representation_selections = vec![requires::Selection::Field(requires::Field {
            alias: None,
            name: "__typename".to_string(),
            selections: None,
        })];
        representation_selections.extend(to_requires(&key_selections));

        let requires = vec![requires::Selection::InlineFragment(
            requires::InlineFragment {
                type_condition: Some(residual.type_name.clone()),
                selections: representation_selections,
            },
        )];

        let mut variable_usages = usages.into_iter().collect::<Vec<_>>();
        variable_usages.sort();

        Ok(PlanNode::Flatten(FlattenNode {
            path: residual.path,
            node: Box::new(PlanNode::Fetch(FetchNode {
                service_name: residual.service_name,
                requires,
                variable_usages,
                operation: operation_string,
                operation_kind: OperationKind::Query,
            })),
        }))
    }

    /// Walk a selection set in the context of one subgraph, keeping what it
    /// can resolve and recording the rest as residuals.
    fn split_selection_set(
        &self,
        field_def: &FieldDef,
        selections: &[Selection],
        service_name: &str,
        path: &Path,
        residuals: &mut Vec<Residual>,
    ) -> Result<Vec<Selection>, QueryPlannerError> {
        if selections.is_empty() {
            return Ok(Vec::new());
        }
        let parent = self.type_of(&field_def.ty).ok_or_else(|| {
            QueryPlannerError::UnknownField {
                parent: field_def.ty.to_string(),
                field: first_field_name(selections),
            }
        })?;
        self.split_type_selection_set(parent, selections, service_name, path, residuals)
    }

    fn split_type_selection_set(
        &self,
        parent: &TypeDef,
        selections: &[Selection],
        service_name: &str,
        path: &Path,
        residuals: &mut Vec<Residual>,
    ) -> Result<Vec<Selection>, QueryPlannerError> {
        let mut kept: Vec<Selection> = Vec::new();
        // key fields the residual fetches need from this subgraph
        let mut key_additions: IndexMap<String, Selection> = IndexMap::new();

        for selection in selections {
            match selection {
                Selection::Field(field) => {
                    if field.name == "__typename" {
                        kept.push(selection.clone());
                        continue;
                    }
                    if field.name.starts_with("__") {
                        return Err(QueryPlannerError::IntrospectionNotSupported);
                    }
                    let field_def = parent.fields.get(&field.name).ok_or_else(|| {
                        QueryPlannerError::UnknownField {
                            parent: parent.name.clone(),
                            field: field.name.clone(),
                        }
                    })?;

                    if field_def.is_resolvable_in(service_name) {
                        let mut field_path =
                            path.join(Path::from(field.response_name()));
                        if field_def.ty.is_list() {
                            field_path.0.push(PathElement::Flatten);
                        }
                        let selection_set = self.split_selection_set(
                            field_def,
                            &field.selection_set,
                            service_name,
                            &field_path,
                            residuals,
                        )?;
                        kept.push(Selection::Field(Field {
                            selection_set,
                            ..field.clone()
                        }));
                    } else {
                        let target = field_def.owner().to_string();
                        let key = parent
                            .key_for(&target)
                            .ok_or_else(|| QueryPlannerError::MissingEntityKey {
                                type_name: parent.name.clone(),
                                service: target.clone(),
                            })?
                            .to_string();

                        // the local fetch must return what representations are
                        // built from
                        key_additions.entry("__typename".to_string()).or_insert_with(|| {
                            Selection::Field(Field {
                                alias: None,
                                name: "__typename".to_string(),
                                arguments: None,
                                directives: None,
                                selection_set: Vec::new(),
                            })
                        });
                        for key_selection in parse_key_fields(&key)? {
                            if let Selection::Field(key_field) = &key_selection {
                                key_additions
                                    .entry(key_field.response_name().to_string())
                                    .or_insert(key_selection);
                            }
                        }

                        match residuals.iter_mut().find(|residual| {
                            residual.path == *path
                                && residual.service_name == target
                                && residual.type_name == parent.name
                        }) {
                            Some(residual) => residual.selections.push(selection.clone()),
                            None => residuals.push(Residual {
                                path: path.clone(),
                                type_name: parent.name.clone(),
                                service_name: target,
                                key,
                                selections: vec![selection.clone()],
                            }),
                        }
                    }
                }
                Selection::InlineFragment(fragment) => {
                    let condition_type = match &fragment.type_condition {
                        Some(condition) => self.schema.types.get(condition).ok_or_else(|| {
                            QueryPlannerError::UnknownField {
                                parent: parent.name.clone(),
                                field: condition.clone(),
                            }
                        })?,
                        None => parent,
                    };
                    let selection_set = self.split_type_selection_set(
                        condition_type,
                        &fragment.selection_set,
                        service_name,
                        path,
                        residuals,
                    )?;
                    if !selection_set.is_empty() {
                        kept.push(Selection::InlineFragment(InlineFragment {
                            selection_set,
                            ..fragment.clone()
                        }));
                    }
                }
            }
        }

        for (response_name, selection) in key_additions {
            let already_kept = kept.iter().any(|kept_selection| {
                matches!(kept_selection, Selection::Field(field) if field.response_name() == response_name)
            });
            if !already_kept {
                kept.push(selection);
            }
        }

        Ok(kept)
    }

    fn type_of(&self, ty: &FieldType) -> Option<&TypeDef> {
        ty.inner_type_name()
            .and_then(|name| self.schema.types.get(name))
    }
}

#[async_trait]
impl QueryPlanner for NativeQueryPlanner {
    async fn get(
        &self,
        query: String,
        operation: Option<String>,
        _options: QueryPlanOptions,
    ) -> Result<Arc<QueryPlan>, QueryPlannerError> {
        let document = Document::parse(&query)?;
        let operation = document.operation(operation.as_deref())?.clone();
        let root = self.plan(&operation)?;
        Ok(Arc::new(QueryPlan { root, operation }))
    }
}

/// Inline fragments at the root only ever condition on the root type itself.
fn flatten_root_fragments(
    selections: &[Selection],
    root_type_name: &str,
) -> Result<Vec<Selection>, QueryPlannerError> {
    let mut flattened = Vec::new();
    for selection in selections {
        match selection {
            Selection::Field(_) => flattened.push(selection.clone()),
            Selection::InlineFragment(fragment) => {
                match &fragment.type_condition {
                    Some(condition) if condition != root_type_name => {
                        return Err(QueryPlannerError::UnknownField {
                            parent: root_type_name.to_string(),
                            field: condition.clone(),
                        });
                    }
                    _ => {}
                }
                flattened.extend(flatten_root_fragments(
                    &fragment.selection_set,
                    root_type_name,
                )?);
            }
        }
    }
    Ok(flattened)
}

fn first_field_name(selections: &[Selection]) -> String {
    selections
        .iter()
        .find_map(|selection| match selection {
            Selection::Field(field) => Some(field.name.clone()),
            Selection::InlineFragment(_) => None,
        })
        .unwrap_or_default()
}

fn variable_usages(selections: &[Selection]) -> HashSet<String> {
    let mut usages = HashSet::new();
    for selection in selections {
        selection.collect_variable_usages(&mut usages);
    }
    usages.into_iter().map(|name| name.to_string()).collect()
}

fn print_root_operation(
    kind: OperationKind,
    variables: &[VariableDefinition],
    usages: &HashSet<String>,
    selections: &[Selection],
) -> String {
    let mut out = kind.to_string();
    let variable_definitions = variables
        .iter()
        .filter(|definition| usages.contains(&definition.name))
        .map(|definition| definition.to_string())
        .collect::<Vec<_>>();
    if !variable_definitions.is_empty() {
        out.push_str(&format!("({})", variable_definitions.join(", ")));
    }
    out.push_str(" {");
    for selection in selections {
        out.push(' ');
        out.push_str(&selection.to_string());
    }
    out.push_str(" }");
    out
}

/// Parse a `@key(fields:)` selection such as `id` or `id org { id }`.
fn parse_key_fields(key: &str) -> Result<Vec<Selection>, QueryPlannerError> {
    let document = Document::parse(&format!("{{ {key} }}"))?;
    Ok(document.operation(None)?.selection_set.clone())
}

fn to_requires(selections: &[Selection]) -> Vec<requires::Selection> {
    selections
        .iter()
        .map(|selection| match selection {
            Selection::Field(field) => requires::Selection::Field(requires::Field {
                alias: field.alias.clone(),
                name: field.name.clone(),
                selections: if field.selection_set.is_empty() {
                    None
                } else {
                    Some(to_requires(&field.selection_set))
                },
            }),
            Selection::InlineFragment(fragment) => {
                requires::Selection::InlineFragment(requires::InlineFragment {
                    type_condition: fragment.type_condition.clone(),
                    selections: to_requires(&fragment.selection_set),
                })
            }
        })
        .collect()
}
