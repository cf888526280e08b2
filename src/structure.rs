//! Java source extraction using tree-sitter AST parsing.
//!
//! Produces the declared shape of the first top-level type in a source
//! file; [`SourceProvider`] adds cross-references and internal behavior
//! from the same syntax tree.

use anyhow::{Context, Result};
use std::path::Path;
use tree_sitter::{Node, Parser, Tree};

use crate::behavior::extract_behavior;
use crate::ingest::ClassStructureProvider;
use crate::model::{ClassSource, ClassStructure, FieldInfo, MethodInfo, normalize_type_name};
use crate::refs::extract_references;

pub fn parse_java(source: &str) -> Option<Tree> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .ok()?;
    parser.parse(source, None)
}

/// Shape only: no cross-references, no behavior.
pub fn parse_class_structure(source: &str) -> Option<ClassStructure> {
    if source.trim().is_empty() {
        return None;
    }
    let tree = parse_java(source)?;
    let root = tree.root_node();
    let bytes = source.as_bytes();
    let decl = primary_type_declaration(&root)?;
    Some(extract_shape(&decl, bytes, &extract_package(&root, bytes)))
}

pub fn extract_package(root: &Node, source: &[u8]) -> String {
    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if child.kind() != "package_declaration" {
            continue;
        }
        let mut inner = child.walk();
        for part in child.children(&mut inner) {
            if part.kind() == "scoped_identifier" || part.kind() == "identifier" {
                return node_text(&part, source).to_string();
            }
        }
    }
    String::new()
}

pub fn primary_type_declaration<'a>(root: &Node<'a>) -> Option<Node<'a>> {
    let mut cursor = root.walk();
    root.children(&mut cursor).find(|child| {
        matches!(
            child.kind(),
            "class_declaration"
                | "interface_declaration"
                | "enum_declaration"
                | "record_declaration"
                | "annotation_type_declaration"
        )
    })
}

pub fn extract_shape(decl: &Node, source: &[u8], package: &str) -> ClassStructure {
    let name = decl
        .child_by_field_name("name")
        .map(|n| node_text(&n, source).to_string())
        .unwrap_or_default();
    let mut class = ClassStructure::new(name, ClassSource::Deobfuscated);
    class.package = package.to_string();
    class.modifiers = extract_modifiers(decl, source);

    let mut cursor = decl.walk();
    for child in decl.children(&mut cursor) {
        match child.kind() {
            "superclass" => {
                if let Some(ty) = child.named_child(0) {
                    class.superclass = normalize_type_name(node_text(&ty, source));
                }
            }
            "super_interfaces" | "extends_interfaces" => {
                for ty in type_list_entries(&child) {
                    class.add_interface(node_text(&ty, source));
                }
            }
            _ => {}
        }
    }

    if let Some(body) = find_body(decl) {
        extract_members(&body, source, &mut class);
    }
    class
}

fn type_list_entries<'a>(node: &Node<'a>) -> Vec<Node<'a>> {
    let mut out = Vec::new();
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "type_list" {
            let mut inner = child.walk();
            out.extend(child.named_children(&mut inner));
        }
    }
    out
}

fn extract_members(body: &Node, source: &[u8], class: &mut ClassStructure) {
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        match child.kind() {
            "field_declaration" | "constant_declaration" => {
                push_fields(&child, source, &mut class.fields);
            }
            "method_declaration" | "annotation_type_element_declaration" => {
                if let Some(method) = method_info(&child, source) {
                    class.methods.push(method);
                }
            }
            "constructor_declaration" | "compact_constructor_declaration" => {
                let mut ctor = method_info(&child, source).unwrap_or_else(|| MethodInfo {
                    return_type: String::new(),
                    name: class.name.clone(),
                    parameter_types: Vec::new(),
                });
                ctor.return_type.clear();
                class.constructors.push(ctor);
            }
            "enum_constant" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| node_text(&n, source).to_string())
                    .unwrap_or_default();
                class.fields.push(FieldInfo {
                    type_name: class.name.clone(),
                    name,
                    modifiers: vec!["public".into(), "static".into(), "final".into()],
                });
            }
            "enum_body_declarations" => extract_members(&child, source, class),
            _ => {}
        }
    }
}

fn push_fields(node: &Node, source: &[u8], fields: &mut Vec<FieldInfo>) {
    let Some(ty) = node.child_by_field_name("type") else {
        return;
    };
    let base = normalize_type_name(node_text(&ty, source));
    let modifiers = extract_modifiers(node, source);

    let mut cursor = node.walk();
    for declarator in node.children_by_field_name("declarator", &mut cursor) {
        let name = declarator
            .child_by_field_name("name")
            .map(|n| node_text(&n, source).to_string())
            .unwrap_or_default();
        let dims = declarator
            .child_by_field_name("dimensions")
            .map(|d| node_text(&d, source).chars().filter(|c| *c == '[').count())
            .unwrap_or(0);
        fields.push(FieldInfo {
            type_name: format!("{base}{}", "[]".repeat(dims)),
            name,
            modifiers: modifiers.clone(),
        });
    }
}

fn method_info(node: &Node, source: &[u8]) -> Option<MethodInfo> {
    let name = node_text(&node.child_by_field_name("name")?, source).to_string();
    let return_type = node
        .child_by_field_name("type")
        .map(|t| normalize_type_name(node_text(&t, source)))
        .unwrap_or_default();
    let parameter_types = node
        .child_by_field_name("parameters")
        .map(|p| parameter_types(&p, source))
        .unwrap_or_default();
    Some(MethodInfo {
        return_type,
        name,
        parameter_types,
    })
}

pub fn parameter_types(params: &Node, source: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "formal_parameter" => {
                let Some(ty) = param.child_by_field_name("type") else {
                    continue;
                };
                let dims = param
                    .child_by_field_name("dimensions")
                    .map(|d| node_text(&d, source).chars().filter(|c| *c == '[').count())
                    .unwrap_or(0);
                out.push(format!(
                    "{}{}",
                    normalize_type_name(node_text(&ty, source)),
                    "[]".repeat(dims)
                ));
            }
            "spread_parameter" => {
                let mut inner = param.walk();
                let ty = param
                    .named_children(&mut inner)
                    .find(|c| c.kind() != "modifiers" && c.kind() != "variable_declarator");
                if let Some(ty) = ty {
                    out.push(format!("{}[]", normalize_type_name(node_text(&ty, source))));
                }
            }
            _ => {}
        }
    }
    out
}

pub fn extract_modifiers(node: &Node, source: &[u8]) -> Vec<String> {
    let mut cursor = node.walk();
    let Some(mods) = node.children(&mut cursor).find(|c| c.kind() == "modifiers") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    let mut inner = mods.walk();
    for m in mods.children(&mut inner) {
        if m.kind().contains("annotation") {
            continue;
        }
        let text = node_text(&m, source);
        if !text.is_empty() {
            out.push(text.to_string());
        }
    }
    out
}

pub fn find_body<'a>(node: &Node<'a>) -> Option<Node<'a>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).find(|child| {
        matches!(
            child.kind(),
            "class_body" | "interface_body" | "enum_body" | "annotation_type_body"
        )
    })
}

/// Methods, constructors and static initializers of a type body, paired
/// with the name references inside them are attributed to.
pub fn callable_members<'a>(body: &Node<'a>, source: &[u8], class_name: &str) -> Vec<(String, Node<'a>)> {
    let mut out = Vec::new();
    let mut cursor = body.walk();
    for child in body.named_children(&mut cursor) {
        match child.kind() {
            "method_declaration" | "constructor_declaration" => {
                let name = child
                    .child_by_field_name("name")
                    .map(|n| node_text(&n, source).to_string())
                    .unwrap_or_else(|| class_name.to_string());
                out.push((name, child));
            }
            "static_initializer" => out.push(("<clinit>".to_string(), child)),
            "enum_body_declarations" => out.extend(callable_members(&child, source, class_name)),
            _ => {}
        }
    }
    out
}

/// Pre-order list of `node` and all of its named descendants.
pub fn descendants<'a>(node: &Node<'a>) -> Vec<Node<'a>> {
    let mut out = Vec::new();
    let mut stack = vec![*node];
    while let Some(current) = stack.pop() {
        out.push(current);
        let mut cursor = current.walk();
        let children: Vec<Node<'a>> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

pub fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

/// Deobfuscated-side extractor for `.java` files.
#[derive(Debug, Clone, Default)]
pub struct SourceProvider;

impl ClassStructureProvider for SourceProvider {
    fn kind(&self) -> &'static str {
        "java-source-v1"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "java")
    }

    fn parse(&self, path: &Path, content: &[u8]) -> Result<ClassStructure> {
        let text = std::str::from_utf8(content)
            .with_context(|| format!("Source is not valid UTF-8: {}", path.display()))?;
        let tree = parse_java(text)
            .with_context(|| format!("Failed to parse Java source: {}", path.display()))?;
        let root = tree.root_node();
        let bytes = text.as_bytes();
        let decl = primary_type_declaration(&root)
            .with_context(|| format!("No type declaration in {}", path.display()))?;

        let mut class = extract_shape(&decl, bytes, &extract_package(&root, bytes));
        if class.name.is_empty() {
            anyhow::bail!("Type declaration without a name in {}", path.display());
        }
        let refs = extract_references(&decl, bytes, &class);
        class.cross_references = Some(refs);
        class.behavior = Some(extract_behavior(&decl, text, &class));
        Ok(class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_class() {
        let source = r#"
package org.example;

import java.util.List;

public class Foo extends Bar implements Baz, java.io.Serializable {
    private String name;
    private int count, total[];

    public Foo(String name) {
        this.name = name;
    }

    public String getName() {
        return name;
    }

    public void setItems(List<Node> items, int... extra) {
    }
}
"#;
        let class = parse_class_structure(source).unwrap();
        assert_eq!(class.name, "Foo");
        assert_eq!(class.package, "org.example");
        assert_eq!(class.modifiers, vec!["public"]);
        assert_eq!(class.superclass, "Bar");
        assert_eq!(class.interfaces, vec!["Baz", "Serializable"]);
        assert_eq!(class.fields.len(), 3);
        assert_eq!(class.fields[0].type_name, "String");
        assert_eq!(class.fields[0].modifiers, vec!["private"]);
        assert_eq!(class.fields[2].type_name, "int[]");
        assert_eq!(class.fields[2].name, "total");
        assert_eq!(class.constructors.len(), 1);
        assert_eq!(class.constructors[0].parameter_types, vec!["String"]);
        assert_eq!(class.methods.len(), 2);
        assert_eq!(class.methods[0].return_type, "String");
        assert_eq!(class.methods[1].parameter_types, vec!["List", "int[]"]);
    }

    #[test]
    fn parse_interface_extends_list() {
        let source = r#"
public interface Service<T> extends Runnable, Comparable<T> {
    T find(String id);
    void save(T entity);
}
"#;
        let class = parse_class_structure(source).unwrap();
        assert_eq!(class.interfaces, vec!["Runnable", "Comparable"]);
        assert!(class.superclass.is_empty());
        assert_eq!(class.methods.len(), 2);
    }

    #[test]
    fn parse_enum_constants_as_fields() {
        let source = r#"
public enum Color {
    RED,
    GREEN;

    private int value;

    public int getValue() {
        return value;
    }
}
"#;
        let class = parse_class_structure(source).unwrap();
        assert_eq!(class.fields.len(), 3);
        assert_eq!(class.fields[0].type_name, "Color");
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn parse_empty_source_returns_none() {
        assert!(parse_class_structure("").is_none());
        assert!(parse_class_structure("package a.b;").is_none());
    }

    #[test]
    fn provider_rejects_sources_without_types() {
        let err = SourceProvider
            .parse(Path::new("Empty.java"), b"package a;\n")
            .unwrap_err();
        assert!(err.to_string().contains("No type declaration"));
    }
}
