use crate::prelude::graphql::*;
use apollo_parser::ast;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fmt;

static VARIABLE_USAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$([_A-Za-z][_0-9A-Za-z]*)").expect("this regex is tested below; qed")
});

/// A parsed executable document with named fragments already inlined.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub operations: Vec<Operation>,
}

impl Document {
    pub fn parse(query: &str) -> Result<Self, QueryPlannerError> {
        let parser = apollo_parser::Parser::new(query);
        let tree = parser.parse();

        let errors = tree
            .errors()
            .map(|err| err.message().to_string())
            .collect::<Vec<_>>();
        if !errors.is_empty() {
            return Err(QueryPlannerError::ParseError(errors.join(", ")));
        }

        let document = tree.document();

        let mut fragments: HashMap<String, ast::FragmentDefinition> = HashMap::new();
        for definition in document.definitions() {
            if let ast::Definition::FragmentDefinition(fragment) = definition {
                let name = fragment
                    .fragment_name()
                    .and_then(|name| name.name())
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| {
                        QueryPlannerError::ParseError("fragment without a name".to_string())
                    })?;
                fragments.insert(name, fragment);
            }
        }

        let mut operations = Vec::new();
        for definition in document.definitions() {
            if let ast::Definition::OperationDefinition(operation) = definition {
                operations.push(Operation::from_ast(operation, &fragments)?);
            }
        }

        Ok(Document { operations })
    }

    /// Select the operation to execute, by name if one was provided.
    pub fn operation(&self, name: Option<&str>) -> Result<&Operation, QueryPlannerError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name))
                .ok_or_else(|| QueryPlannerError::UnknownOperation(name.to_string())),
            None => match self.operations.as_slice() {
                [operation] => Ok(operation),
                [] => Err(QueryPlannerError::MissingOperation),
                // Spec: an unnamed request is only valid with exactly one operation
                _ => Err(QueryPlannerError::MissingOperation),
            },
        }
    }
}

/// A single operation of an executable document.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variables: Vec<VariableDefinition>,
    pub selection_set: Vec<Selection>,
}

impl Operation {
    fn from_ast(
        operation: ast::OperationDefinition,
        fragments: &HashMap<String, ast::FragmentDefinition>,
    ) -> Result<Self, QueryPlannerError> {
        // Spec: the operation type is absent for query shorthand
        let kind = operation
            .operation_type()
            .and_then(|operation_type| {
                if operation_type.mutation_token().is_some() {
                    Some(OperationKind::Mutation)
                } else if operation_type.subscription_token().is_some() {
                    Some(OperationKind::Subscription)
                } else {
                    Some(OperationKind::Query)
                }
            })
            .unwrap_or(OperationKind::Query);

        let name = operation.name().map(|name| name.text().to_string());

        let variables = operation
            .variable_definitions()
            .iter()
            .flat_map(|definitions| definitions.variable_definitions())
            .map(|definition| {
                let name = definition
                    .variable()
                    .and_then(|variable| variable.name())
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| {
                        QueryPlannerError::ParseError("variable without a name".to_string())
                    })?;
                let ty = definition
                    .ty()
                    .map(FieldType::from)
                    .ok_or_else(|| {
                        QueryPlannerError::ParseError(format!("variable ${name} without a type"))
                    })?;
                let default = definition
                    .default_value()
                    .and_then(|default| default.value())
                    .map(|value| value.to_string());
                Ok(VariableDefinition { name, ty, default })
            })
            .collect::<Result<Vec<_>, QueryPlannerError>>()?;

        let selection_set = match operation.selection_set() {
            Some(selection_set) => collect_selections(selection_set, fragments, &mut Vec::new())?,
            None => Vec::new(),
        };

        Ok(Operation {
            kind,
            name,
            variables,
            selection_set,
        })
    }

    /// The variables this operation requires but for which the request provides
    /// neither a value nor a default.
    pub fn missing_variables(&self, variables: &Object) -> Vec<String> {
        self.variables
            .iter()
            .filter(|definition| {
                definition.ty.is_non_null()
                    && definition.default.is_none()
                    && !variables.contains_key(definition.name.as_str())
            })
            .map(|definition| definition.name.clone())
            .collect()
    }
}

/// A variable declared by an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: FieldType,
    /// The default value, as it appeared in the source.
    pub default: Option<String>,
}

impl fmt::Display for VariableDefinition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "${}: {}", self.name, self.ty)?;
        if let Some(default) = &self.default {
            write!(f, " = {default}")?;
        }
        Ok(())
    }
}

/// A selection in an operation or fragment, with fragment spreads inlined.
///
/// Argument and directive values are kept as source text: the gateway never
/// evaluates them, it forwards them to the subgraph that resolves the field.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    InlineFragment(InlineFragment),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Option<String>,
    pub directives: Option<String>,
    pub selection_set: Vec<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Option<String>,
    pub selection_set: Vec<Selection>,
}

impl Field {
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

impl Selection {
    pub fn collect_variable_usages<'a>(&'a self, usages: &mut HashSet<&'a str>) {
        match self {
            Selection::Field(field) => {
                for text in field.arguments.iter().chain(field.directives.iter()) {
                    for capture in VARIABLE_USAGE.captures_iter(text) {
                        if let Some(name) = capture.get(1) {
                            usages.insert(name.as_str());
                        }
                    }
                }
                for selection in &field.selection_set {
                    selection.collect_variable_usages(usages);
                }
            }
            Selection::InlineFragment(fragment) => {
                for text in fragment.directives.iter() {
                    for capture in VARIABLE_USAGE.captures_iter(text) {
                        if let Some(name) = capture.get(1) {
                            usages.insert(name.as_str());
                        }
                    }
                }
                for selection in &fragment.selection_set {
                    selection.collect_variable_usages(usages);
                }
            }
        }
    }
}

fn collect_selections(
    selection_set: ast::SelectionSet,
    fragments: &HashMap<String, ast::FragmentDefinition>,
    spread_stack: &mut Vec<String>,
) -> Result<Vec<Selection>, QueryPlannerError> {
    let mut selections = Vec::new();

    for selection in selection_set.selections() {
        match selection {
            ast::Selection::Field(field) => {
                let name = field
                    .name()
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| {
                        QueryPlannerError::ParseError("field without a name".to_string())
                    })?;
                let alias = field
                    .alias()
                    .and_then(|alias| alias.name())
                    .map(|name| name.text().to_string());
                let arguments = field
                    .arguments()
                    .map(|arguments| arguments.to_string().trim().to_string());
                let directives = field
                    .directives()
                    .map(|directives| directives.to_string().trim().to_string());
                let selection_set = match field.selection_set() {
                    Some(selection_set) => {
                        collect_selections(selection_set, fragments, spread_stack)?
                    }
                    None => Vec::new(),
                };
                selections.push(Selection::Field(Field {
                    alias,
                    name,
                    arguments,
                    directives,
                    selection_set,
                }));
            }
            ast::Selection::InlineFragment(fragment) => {
                let type_condition = fragment
                    .type_condition()
                    .and_then(|condition| condition.named_type())
                    .and_then(|ty| ty.name())
                    .map(|name| name.text().to_string());
                let directives = fragment
                    .directives()
                    .map(|directives| directives.to_string().trim().to_string());
                let selection_set = fragment
                    .selection_set()
                    .map(|selection_set| {
                        collect_selections(selection_set, fragments, spread_stack)
                    })
                    .transpose()?
                    .unwrap_or_default();
                selections.push(Selection::InlineFragment(InlineFragment {
                    type_condition,
                    directives,
                    selection_set,
                }));
            }
            ast::Selection::FragmentSpread(spread) => {
                let name = spread
                    .fragment_name()
                    .and_then(|name| name.name())
                    .map(|name| name.text().to_string())
                    .ok_or_else(|| {
                        QueryPlannerError::ParseError("fragment spread without a name".to_string())
                    })?;
                if spread_stack.contains(&name) {
                    return Err(QueryPlannerError::ParseError(format!(
                        "fragment cycle detected through '{name}'"
                    )));
                }
                let fragment = fragments.get(&name).ok_or_else(|| {
                    QueryPlannerError::ParseError(format!("unknown fragment '{name}'"))
                })?;

                let type_condition = fragment
                    .type_condition()
                    .and_then(|condition| condition.named_type())
                    .and_then(|ty| ty.name())
                    .map(|name| name.text().to_string());
                let directives = spread
                    .directives()
                    .map(|directives| directives.to_string().trim().to_string());

                spread_stack.push(name);
                let selection_set = fragment
                    .selection_set()
                    .map(|selection_set| {
                        collect_selections(selection_set, fragments, spread_stack)
                    })
                    .transpose()?
                    .unwrap_or_default();
                spread_stack.pop();

                selections.push(Selection::InlineFragment(InlineFragment {
                    type_condition,
                    directives,
                    selection_set,
                }));
            }
        }
    }

    Ok(selections)
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Selection::Field(field) => field.fmt(f),
            Selection::InlineFragment(fragment) => fragment.fmt(f),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(alias) = &self.alias {
            write!(f, "{alias}: ")?;
        }
        write!(f, "{}", self.name)?;
        if let Some(arguments) = &self.arguments {
            write!(f, "{arguments}")?;
        }
        if let Some(directives) = &self.directives {
            write!(f, " {directives}")?;
        }
        if !self.selection_set.is_empty() {
            write!(f, " {{")?;
            for selection in &self.selection_set {
                write!(f, " {selection}")?;
            }
            write!(f, " }}")?;
        }
        Ok(())
    }
}

impl fmt::Display for InlineFragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "...")?;
        if let Some(type_condition) = &self.type_condition {
            write!(f, " on {type_condition}")?;
        }
        if let Some(directives) = &self.directives {
            write!(f, " {directives}")?;
        }
        write!(f, " {{")?;
        for selection in &self.selection_set {
            write!(f, " {selection}")?;
        }
        write!(f, " }}")?;
        Ok(())
    }
}
