//! Cross-reference extraction from Java source trees.
//!
//! Receivers are typed through a small symbol table (fields, then the
//! parameters and locals of the enclosing member). Anything that does not
//! resolve to a project class is dropped by [`reference_target`].

use std::collections::HashMap;
use tree_sitter::Node;

use crate::crossref::{CrossReferenceGraph, Reference, ReferenceKind, reference_target};
use crate::model::{ClassStructure, is_array_type, normalize_type_name};
use crate::structure::{callable_members, descendants, find_body, node_text};

type Symbols = HashMap<String, String>;

pub fn extract_references(decl: &Node, source: &[u8], class: &ClassStructure) -> CrossReferenceGraph {
    let mut graph = CrossReferenceGraph::new();
    let Some(body) = find_body(decl) else {
        return graph;
    };

    let fields: Symbols = class
        .fields
        .iter()
        .map(|f| (f.name.clone(), f.type_name.clone()))
        .collect();

    for (member, node) in callable_members(&body, source, &class.name) {
        let nodes = descendants(&node);
        let mut symbols = fields.clone();
        collect_locals(&nodes, source, &mut symbols);

        for n in &nodes {
            let line = n.start_position().row + 1;
            let found = match n.kind() {
                "method_invocation" => invocation_reference(n, source, &symbols, line),
                "object_creation_expression" => n.child_by_field_name("type").map(|t| {
                    Reference::new(ReferenceKind::Instantiation, node_text(&t, source), "<init>", line)
                }),
                "array_creation_expression" => n.child_by_field_name("type").map(|t| {
                    Reference::new(ReferenceKind::ArrayAccess, node_text(&t, source), "[]", line)
                }),
                "field_access" => field_reference(n, source, &symbols, line),
                "array_access" => array_reference(n, source, &symbols, line),
                _ => None,
            };
            if let Some(mut reference) = found {
                if let Some(target) = reference_target(&reference.target_class, &class.name) {
                    reference.target_class = target;
                    graph.push(member.clone(), reference);
                }
            }
        }
    }

    graph.normalize();
    graph
}

fn collect_locals(nodes: &[Node], source: &[u8], symbols: &mut Symbols) {
    for n in nodes {
        match n.kind() {
            "formal_parameter" | "catch_formal_parameter" | "enhanced_for_statement" => {
                if let (Some(t), Some(name)) = (n.child_by_field_name("type"), n.child_by_field_name("name")) {
                    symbols.insert(
                        node_text(&name, source).to_string(),
                        normalize_type_name(node_text(&t, source)),
                    );
                }
            }
            "spread_parameter" => {
                let mut cursor = n.walk();
                let children: Vec<Node> = n.named_children(&mut cursor).collect();
                let ty = children.iter().find(|c| c.kind() != "variable_declarator" && c.kind() != "modifiers");
                let decl = children.iter().find(|c| c.kind() == "variable_declarator");
                if let (Some(t), Some(d)) = (ty, decl) {
                    if let Some(name) = d.child_by_field_name("name") {
                        symbols.insert(
                            node_text(&name, source).to_string(),
                            format!("{}[]", normalize_type_name(node_text(t, source))),
                        );
                    }
                }
            }
            "local_variable_declaration" => {
                let Some(t) = n.child_by_field_name("type") else {
                    continue;
                };
                let ty = normalize_type_name(node_text(&t, source));
                let mut cursor = n.walk();
                for d in n.children_by_field_name("declarator", &mut cursor) {
                    if let Some(name) = d.child_by_field_name("name") {
                        symbols.insert(node_text(&name, source).to_string(), ty.clone());
                    }
                }
            }
            _ => {}
        }
    }
}

/// Receiver class of an expression, and whether the expression is itself
/// a member chain.
fn receiver_type(node: &Node, source: &[u8], symbols: &Symbols) -> Option<(String, bool)> {
    match node.kind() {
        "identifier" => {
            let name = node_text(node, source);
            symbols.get(name).map(|t| (t.clone(), false))
        }
        "field_access" | "method_invocation" => {
            let mut root = node.child_by_field_name("object")?;
            while matches!(root.kind(), "field_access" | "method_invocation") {
                root = root.child_by_field_name("object")?;
            }
            receiver_type(&root, source, symbols)
                .or_else(|| static_receiver(&root, source))
                .map(|(t, _)| (t, true))
        }
        "cast_expression" => node
            .child_by_field_name("type")
            .map(|t| (normalize_type_name(node_text(&t, source)), false)),
        "parenthesized_expression" => {
            let inner = node.named_child(0)?;
            receiver_type(&inner, source, symbols)
        }
        "object_creation_expression" => node
            .child_by_field_name("type")
            .map(|t| (normalize_type_name(node_text(&t, source)), false)),
        _ => None,
    }
}

/// A bare capitalized identifier is taken to be a class name.
fn static_receiver(node: &Node, source: &[u8]) -> Option<(String, bool)> {
    if node.kind() != "identifier" {
        return None;
    }
    let name = node_text(node, source);
    name.chars()
        .next()
        .filter(|c| c.is_ascii_uppercase())
        .map(|_| (name.to_string(), false))
}

fn invocation_reference(node: &Node, source: &[u8], symbols: &Symbols, line: usize) -> Option<Reference> {
    let object = node.child_by_field_name("object")?;
    if matches!(object.kind(), "this" | "super") {
        return None;
    }
    let member = node
        .child_by_field_name("name")
        .map(|n| node_text(&n, source))
        .unwrap_or("");

    if let Some((ty, chained)) = receiver_type(&object, source, symbols) {
        return Some(Reference::new(ReferenceKind::MethodCall, &ty, member, line).chained(chained));
    }
    static_receiver(&object, source)
        .map(|(ty, _)| Reference::new(ReferenceKind::StaticCall, &ty, member, line))
}

fn field_reference(node: &Node, source: &[u8], symbols: &Symbols, line: usize) -> Option<Reference> {
    let object = node.child_by_field_name("object")?;
    let field = node
        .child_by_field_name("field")
        .map(|n| node_text(&n, source))
        .unwrap_or("");
    match object.kind() {
        "this" | "super" => None,
        "identifier" => {
            let name = node_text(&object, source);
            if let Some(ty) = symbols.get(name) {
                if field == "length" && is_array_type(ty) {
                    return None;
                }
                return Some(Reference::new(ReferenceKind::FieldAccess, ty, field, line));
            }
            static_receiver(&object, source)
                .map(|(ty, _)| Reference::new(ReferenceKind::FieldAccess, &ty, field, line))
        }
        _ => receiver_type(&object, source, symbols).map(|(ty, chained)| {
            Reference::new(ReferenceKind::FieldAccess, &ty, field, line).chained(chained)
        }),
    }
}

fn array_reference(node: &Node, source: &[u8], symbols: &Symbols, line: usize) -> Option<Reference> {
    let array = node.child_by_field_name("array")?;
    // a[i][j] is reported once, from the innermost access.
    if array.kind() != "identifier" {
        return None;
    }
    let name = node_text(&array, source);
    let ty = symbols.get(name).filter(|t| is_array_type(t))?;
    Some(Reference::new(ReferenceKind::ArrayAccess, ty, name, line))
}
