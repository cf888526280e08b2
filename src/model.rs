//! Class records shared by the extractors, the scorer and the resolver.
//!
//! A [`ClassStructure`] is built once by an extractor and never mutated
//! afterwards; everything downstream derives indexes from it instead.

use serde::{Deserialize, Serialize};

use crate::behavior::InternalBehavior;
use crate::crossref::CrossReferenceGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassSource {
    Deobfuscated,
    Obfuscated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub type_name: String,
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub return_type: String,
    pub name: String,
    #[serde(default)]
    pub parameter_types: Vec<String>,
}

impl MethodInfo {
    pub fn new(return_type: &str, name: &str, parameter_types: &[&str]) -> Self {
        Self {
            return_type: normalize_type_name(return_type),
            name: name.to_string(),
            parameter_types: parameter_types
                .iter()
                .map(|p| normalize_type_name(p))
                .collect(),
        }
    }

    /// Same return type and element-wise equal parameter types.
    pub fn same_signature(&self, other: &MethodInfo) -> bool {
        self.return_type == other.return_type && self.parameter_types == other.parameter_types
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassStructure {
    pub name: String,
    pub source: ClassSource,
    #[serde(default)]
    pub package: String,
    #[serde(default)]
    pub modifiers: Vec<String>,
    #[serde(default)]
    pub superclass: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub methods: Vec<MethodInfo>,
    #[serde(default)]
    pub constructors: Vec<MethodInfo>,
    #[serde(default)]
    pub cross_references: Option<CrossReferenceGraph>,
    #[serde(default)]
    pub behavior: Option<InternalBehavior>,
}

impl ClassStructure {
    pub fn new(name: impl Into<String>, source: ClassSource) -> Self {
        Self {
            name: name.into(),
            source,
            package: String::new(),
            modifiers: Vec::new(),
            superclass: String::new(),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            constructors: Vec::new(),
            cross_references: None,
            behavior: None,
        }
    }

    /// Fields plus methods; the size measure used by the penalty and the
    /// complexity gate.
    pub fn complexity(&self) -> usize {
        self.fields.len() + self.methods.len()
    }

    pub fn has_superclass(&self) -> bool {
        !self.superclass.is_empty()
    }

    pub fn add_interface(&mut self, name: &str) {
        let name = normalize_type_name(name);
        if !name.is_empty() && !self.interfaces.contains(&name) {
            self.interfaces.push(name);
        }
    }

    pub fn with_superclass(mut self, superclass: &str) -> Self {
        self.superclass = normalize_type_name(superclass);
        self
    }

    pub fn with_interface(mut self, name: &str) -> Self {
        self.add_interface(name);
        self
    }

    pub fn with_modifiers(mut self, modifiers: &[&str]) -> Self {
        self.modifiers = modifiers.iter().map(|m| m.to_string()).collect();
        self
    }

    pub fn with_field(mut self, type_name: &str, name: &str) -> Self {
        self.fields.push(FieldInfo {
            type_name: normalize_type_name(type_name),
            name: name.to_string(),
            modifiers: Vec::new(),
        });
        self
    }

    pub fn with_method(mut self, return_type: &str, name: &str, params: &[&str]) -> Self {
        self.methods.push(MethodInfo::new(return_type, name, params));
        self
    }

    pub fn with_constructor(mut self, params: &[&str]) -> Self {
        let name = self.name.clone();
        self.constructors.push(MethodInfo::new("", &name, params));
        self
    }

    pub fn with_cross_references(mut self, graph: CrossReferenceGraph) -> Self {
        self.cross_references = Some(graph);
        self
    }

    pub fn with_behavior(mut self, behavior: InternalBehavior) -> Self {
        self.behavior = Some(behavior);
        self
    }
}

const PRIMITIVES: [&str; 9] = [
    "int", "boolean", "double", "long", "void", "byte", "char", "short", "float",
];

pub fn is_primitive(type_name: &str) -> bool {
    PRIMITIVES.contains(&type_name)
}

/// Brings a type name from either side into one spelling: generic
/// arguments dropped, `/` separators turned into dots, and JDK types
/// (`java.*`, `javax.*`) reduced to their simple name.
pub fn normalize_type_name(raw: &str) -> String {
    let stripped = strip_generics(raw.trim());
    let compact: String = stripped
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == '/' { '.' } else { c })
        .collect();
    let compact = compact.replace("...", "[]");

    if compact.starts_with("java.") || compact.starts_with("javax.") {
        return simple_name(&compact).to_string();
    }
    compact
}

/// Removes every balanced `<...>` section, nested ones included.
pub fn strip_generics(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut depth = 0usize;
    for c in s.chars() {
        match c {
            '<' => depth += 1,
            '>' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(c),
            _ => {}
        }
    }
    out
}

pub fn simple_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Element type of an array type in source (`Foo[][]`) or descriptor
/// (`[LFoo;`) spelling. Non-array names come back unchanged.
pub fn element_type(type_name: &str) -> &str {
    let mut t = type_name.trim();
    while let Some(rest) = t.strip_suffix("[]") {
        t = rest;
    }
    if t.starts_with('[') {
        t = t.trim_start_matches('[');
        if let Some(inner) = t.strip_prefix('L') {
            t = inner.strip_suffix(';').unwrap_or(inner);
        }
    }
    t
}

pub fn is_array_type(type_name: &str) -> bool {
    type_name.contains('[')
}
