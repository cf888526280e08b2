//! Static cross-reference graphs: which other classes and members a class
//! touches, grouped by the method the reference occurs in.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::model::{element_type, is_primitive, simple_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    MethodCall,
    Instantiation,
    FieldAccess,
    StaticCall,
    ArrayAccess,
}

impl ReferenceKind {
    pub const ALL: [ReferenceKind; 5] = [
        ReferenceKind::MethodCall,
        ReferenceKind::Instantiation,
        ReferenceKind::FieldAccess,
        ReferenceKind::StaticCall,
        ReferenceKind::ArrayAccess,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReferenceKind::MethodCall => "method_call",
            ReferenceKind::Instantiation => "instantiation",
            ReferenceKind::FieldAccess => "field_access",
            ReferenceKind::StaticCall => "static_call",
            ReferenceKind::ArrayAccess => "array_access",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    pub target_class: String,
    #[serde(default)]
    pub target_member: String,
    #[serde(default)]
    pub line_number: usize,
    #[serde(default)]
    pub is_chained: bool,
    #[serde(default)]
    pub is_array_access: bool,
}

impl Reference {
    pub fn new(kind: ReferenceKind, target_class: &str, target_member: &str, line_number: usize) -> Self {
        Self {
            kind,
            target_class: target_class.to_string(),
            target_member: target_member.to_string(),
            line_number,
            is_chained: false,
            is_array_access: kind == ReferenceKind::ArrayAccess,
        }
    }

    pub fn chained(mut self, chained: bool) -> Self {
        self.is_chained = chained;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrossReferenceGraph {
    pub method_references: BTreeMap<String, Vec<Reference>>,
    pub unique_targets: BTreeMap<String, usize>,
    pub counts_by_kind: BTreeMap<ReferenceKind, usize>,
    pub total_references: usize,
    pub chained_references: usize,
    pub array_references: usize,
    #[serde(default)]
    pub normalized_targets: BTreeMap<String, f64>,
    #[serde(default)]
    pub reference_vector: BTreeMap<ReferenceKind, f64>,
}

impl CrossReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an aggregated, normalized graph from `(method, reference)` pairs.
    pub fn from_references<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = (S, Reference)>,
        S: Into<String>,
    {
        let mut graph = Self::new();
        for (method, reference) in references {
            graph.push(method, reference);
        }
        graph.normalize();
        graph
    }

    /// Records one reference and updates the aggregates. Call
    /// [`normalize`](Self::normalize) once all references are in.
    pub fn push(&mut self, method: impl Into<String>, reference: Reference) {
        self.total_references += 1;
        *self.counts_by_kind.entry(reference.kind).or_insert(0) += 1;
        *self
            .unique_targets
            .entry(reference.target_class.clone())
            .or_insert(0) += 1;
        if reference.is_chained {
            self.chained_references += 1;
        }
        if reference.is_array_access {
            self.array_references += 1;
        }
        self.method_references
            .entry(method.into())
            .or_default()
            .push(reference);
    }

    pub fn normalize(&mut self) {
        self.normalized_targets.clear();
        self.reference_vector.clear();
        if self.total_references == 0 {
            return;
        }
        let total = self.total_references as f64;
        for (target, count) in &self.unique_targets {
            self.normalized_targets
                .insert(target.clone(), *count as f64 / total);
        }
        for (kind, count) in &self.counts_by_kind {
            self.reference_vector.insert(*kind, *count as f64 / total);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total_references == 0
    }

    pub fn count(&self, kind: ReferenceKind) -> usize {
        self.counts_by_kind.get(&kind).copied().unwrap_or(0)
    }

    pub fn targets(&self) -> impl Iterator<Item = &str> {
        self.unique_targets.keys().map(String::as_str)
    }

    /// Jaccard similarity of the unique target sets. Two empty graphs are
    /// identical; one empty graph shares nothing.
    pub fn jaccard(&self, other: &CrossReferenceGraph) -> f64 {
        if self.is_empty() && other.is_empty() {
            return 1.0;
        }
        if self.is_empty() || other.is_empty() {
            return 0.0;
        }
        let intersection = other
            .unique_targets
            .keys()
            .filter(|k| self.unique_targets.contains_key(*k))
            .count();
        let union = self.unique_targets.len() + other.unique_targets.len() - intersection;
        if union == 0 {
            return 0.0;
        }
        intersection as f64 / union as f64
    }

    /// References per declared member, with one extra member so an empty
    /// class never divides by zero.
    pub fn density(&self, member_count: usize) -> f64 {
        self.total_references as f64 / (member_count + 1) as f64
    }

    /// Copy of the graph restricted to targets accepted by `keep`,
    /// re-aggregated and re-normalized.
    pub fn retain_targets(&self, keep: impl Fn(&str) -> bool) -> Self {
        self.remap_targets(|target| keep(target).then(|| target.to_string()))
    }

    /// Copy of the graph with every target passed through `map`. A `None`
    /// drops the reference; targets that map to the same name merge.
    pub fn remap_targets(&self, map: impl Fn(&str) -> Option<String>) -> Self {
        let mut graph = Self::new();
        for (method, references) in &self.method_references {
            for reference in references {
                let Some(target) = map(&reference.target_class) else {
                    continue;
                };
                let mut reference = reference.clone();
                reference.target_class = target;
                graph.push(method.clone(), reference);
            }
        }
        graph.normalize();
        graph
    }
}

const BUILTIN_CLASSES: &[&str] = &[
    "String", "Object", "Class", "Math", "Integer", "Double", "Boolean", "System", "Thread",
    "Exception", "Runtime", "Throwable", "Error", "NullPointerException", "StringBuilder",
    "StringBuffer", "Character", "Long", "Short", "Byte", "Float", "IOException", "EOFException",
    "DataInputStream", "DataOutputStream", "BufferedReader", "FileReader", "InputStream",
    "OutputStream", "PrintStream", "File", "URL", "URLConnection", "Socket", "InetAddress",
    "HttpURLConnection", "Component", "Container", "Graphics", "Color", "Font", "Image",
    "AppletContext", "Applet", "BigInteger", "CRC32", "GZIPInputStream", "Arrays",
    "Collections", "List", "ArrayList", "HashMap", "HashSet", "Map", "Set", "Iterator",
];

const BUILTIN_PREFIXES: [&str; 5] = ["java.", "javax.", "sun.", "com.sun.", "org."];

/// JDK and platform classes that never count as project references.
pub fn is_builtin_class(name: &str) -> bool {
    let name = name.replace('/', ".");
    if BUILTIN_PREFIXES.iter().any(|p| name.starts_with(p)) {
        return true;
    }
    BUILTIN_CLASSES.contains(&name.as_str()) || is_primitive(&name)
}

/// Normalizes a raw reference target and decides whether it is worth
/// recording for `owner`. Returns the name to record.
pub fn reference_target(raw: &str, owner: &str) -> Option<String> {
    let raw = raw.trim().trim_matches('"');
    if raw.is_empty() {
        return None;
    }
    let dotted = raw.replace('/', ".");
    let element = element_type(&dotted);
    if element.len() < 2 || is_builtin_class(element) || is_primitive(element) {
        return None;
    }
    let name = simple_name(element);
    if name == owner || name == simple_name(owner) {
        return None;
    }
    Some(name.to_string())
}
