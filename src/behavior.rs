//! Internal behavioral fingerprints of a class: the intra-class call graph,
//! field read/write traffic, loop and iterator usage, method-name idioms and
//! array-access shape.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;
use tree_sitter::Node;

use crate::classify::{Classification, classify};
use crate::model::{ClassStructure, MethodInfo};
use crate::structure::{callable_members, descendants, find_body, node_text};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallGraph {
    /// caller -> distinct callees, in first-call order
    pub calls: BTreeMap<String, Vec<String>>,
    pub call_frequency: BTreeMap<String, usize>,
    pub recursive: BTreeSet<String>,
}

impl CallGraph {
    pub fn callers(&self) -> usize {
        self.calls.values().filter(|c| !c.is_empty()).count()
    }

    pub fn total_calls(&self) -> usize {
        self.call_frequency.values().sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateProfile {
    pub field_reads: BTreeMap<String, usize>,
    pub field_writes: BTreeMap<String, usize>,
    pub set_state_calls: usize,
}

impl StateProfile {
    pub fn total_reads(&self) -> usize {
        self.field_reads.values().sum()
    }

    pub fn total_writes(&self) -> usize {
        self.field_writes.values().sum()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationProfile {
    pub for_loops: usize,
    pub while_loops: usize,
    pub iterator_usage: usize,
    pub stream_operations: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticMethods {
    pub getters: Vec<String>,
    pub setters: Vec<String>,
    pub builders: Vec<String>,
    pub factories: Vec<String>,
    pub event_handlers: Vec<String>,
    pub utilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMetrics {
    pub single_dim_access: usize,
    pub multi_dim_access: usize,
    pub loop_array_access: usize,
    pub bulk_operations: usize,
    pub nested_depth: usize,
    pub algorithms: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalBehavior {
    pub call_graph: CallGraph,
    pub state: StateProfile,
    pub iteration: IterationProfile,
    pub semantics: SemanticMethods,
    pub arrays: ArrayMetrics,
    pub classification: Classification,
}

static GETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^get[A-Z]").unwrap());
static SETTER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^set[A-Z]").unwrap());
static BUILDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:with|add)[A-Z]").unwrap());
static FACTORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:create|newInstance)[A-Z]").unwrap());
static EVENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:on|handle)[A-Z]").unwrap());
static UTILITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:format|parse|validate)").unwrap());

const STREAM_OPERATIONS: [&str; 5] = ["stream", "map", "filter", "collect", "forEach"];

pub fn classify_method_names(methods: &[MethodInfo]) -> SemanticMethods {
    let mut out = SemanticMethods::default();
    for method in methods {
        let name = method.name.as_str();
        let buckets: [(&LazyLock<Regex>, &mut Vec<String>); 6] = [
            (&GETTER, &mut out.getters),
            (&SETTER, &mut out.setters),
            (&BUILDER, &mut out.builders),
            (&FACTORY, &mut out.factories),
            (&EVENT, &mut out.event_handlers),
            (&UTILITY, &mut out.utilities),
        ];
        for (re, bucket) in buckets {
            if re.is_match(name) {
                bucket.push(name.to_string());
            }
        }
    }
    out
}

/// Extracts behavior from a parsed type declaration. `source` is the full
/// file text; it also feeds the structural classifier.
pub fn extract_behavior(decl: &Node, source: &str, class: &ClassStructure) -> InternalBehavior {
    let bytes = source.as_bytes();
    let members = find_body(decl)
        .map(|body| callable_members(&body, bytes, &class.name))
        .unwrap_or_default();

    let method_names: HashSet<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
    let field_names: HashSet<&str> = class.fields.iter().map(|f| f.name.as_str()).collect();

    let mut call_graph = CallGraph::default();
    let mut state = StateProfile::default();
    let mut iteration = IterationProfile::default();
    let mut arrays = ArrayMetrics::default();

    for (member, node) in &members {
        let nodes = descendants(node);
        let locals = local_names(&nodes, bytes);

        for n in &nodes {
            match n.kind() {
                "method_invocation" => {
                    record_invocation(n, bytes, member, &method_names, &mut call_graph);
                    let name = field_text(n, "name", bytes);
                    if name == "setState" {
                        state.set_state_calls += 1;
                    }
                    if name == "iterator" {
                        iteration.iterator_usage += 1;
                    }
                    if n.child_by_field_name("object").is_some() && STREAM_OPERATIONS.contains(&name) {
                        iteration.stream_operations += 1;
                    }
                    record_bulk_operation(n, bytes, &mut arrays);
                }
                "for_statement" => {
                    iteration.for_loops += 1;
                    if n
                        .child_by_field_name("condition")
                        .is_some_and(|c| mentions_length(&c, bytes))
                    {
                        arrays.loop_array_access += 1;
                        arrays.algorithms.insert("search".into());
                    }
                }
                "enhanced_for_statement" => iteration.for_loops += 1,
                "while_statement" | "do_statement" => iteration.while_loops += 1,
                "local_variable_declaration" => {
                    if field_text(n, "type", bytes).starts_with("Iterator") {
                        iteration.iterator_usage += 1;
                    }
                }
                "field_access" => {
                    let is_this = n
                        .child_by_field_name("object")
                        .is_some_and(|o| o.kind() == "this");
                    if is_this {
                        let field = field_text(n, "field", bytes);
                        record_field_use(n, field, &mut state);
                    }
                }
                "identifier" => {
                    let name = node_text(n, bytes);
                    if field_names.contains(name) && !locals.contains(name) && is_value_position(n) {
                        record_field_use(n, name, &mut state);
                    }
                }
                "array_access" => record_array_access(n, &mut arrays),
                "if_statement" => {
                    if let Some(cond) = n.child_by_field_name("condition") {
                        record_array_comparison(&cond, bytes, &mut arrays);
                    }
                }
                "assignment_expression" => {
                    let left_is_array = n
                        .child_by_field_name("left")
                        .is_some_and(|l| l.kind() == "array_access");
                    let right_is_array = n
                        .child_by_field_name("right")
                        .is_some_and(|r| r.kind() == "array_access");
                    if left_is_array && right_is_array {
                        arrays.algorithms.insert("filter".into());
                    }
                }
                _ => {}
            }
        }
    }

    let classification = classify(&arrays, source);
    InternalBehavior {
        call_graph,
        state,
        iteration,
        semantics: classify_method_names(&class.methods),
        arrays,
        classification,
    }
}

fn field_text<'a>(node: &Node, field: &str, source: &'a [u8]) -> &'a str {
    node.child_by_field_name(field)
        .map(|n| node_text(&n, source))
        .unwrap_or("")
}

fn local_names<'a>(nodes: &[Node], source: &'a [u8]) -> HashSet<&'a str> {
    let mut out = HashSet::new();
    for n in nodes {
        match n.kind() {
            "formal_parameter" | "catch_formal_parameter" | "variable_declarator" => {
                if let Some(name) = n.child_by_field_name("name") {
                    out.insert(node_text(&name, source));
                }
            }
            "enhanced_for_statement" => {
                if let Some(name) = n.child_by_field_name("name") {
                    out.insert(node_text(&name, source));
                }
            }
            _ => {}
        }
    }
    out
}

fn record_invocation(
    node: &Node,
    source: &[u8],
    caller: &str,
    known: &HashSet<&str>,
    graph: &mut CallGraph,
) {
    let on_self = match node.child_by_field_name("object") {
        None => true,
        Some(obj) => obj.kind() == "this",
    };
    if !on_self {
        return;
    }
    let callee = field_text(node, "name", source);
    if !known.contains(callee) {
        return;
    }
    if callee == caller {
        graph.recursive.insert(caller.to_string());
        return;
    }
    let callees = graph.calls.entry(caller.to_string()).or_default();
    if !callees.iter().any(|c| c == callee) {
        callees.push(callee.to_string());
    }
    *graph.call_frequency.entry(callee.to_string()).or_insert(0) += 1;
}

fn record_field_use(node: &Node, field: &str, state: &mut StateProfile) {
    let is_write = node.parent().is_some_and(|p| match p.kind() {
        "assignment_expression" => p
            .child_by_field_name("left")
            .is_some_and(|l| l.id() == node.id()),
        "update_expression" => true,
        _ => false,
    });
    let map = if is_write {
        &mut state.field_writes
    } else {
        &mut state.field_reads
    };
    *map.entry(field.to_string()).or_insert(0) += 1;
}

/// Identifiers that name a value rather than a declaration, a member
/// selector or a label.
fn is_value_position(node: &Node) -> bool {
    let Some(parent) = node.parent() else {
        return false;
    };
    let is_field = |name: &str| {
        parent
            .child_by_field_name(name)
            .is_some_and(|c| c.id() == node.id())
    };
    match parent.kind() {
        "field_access" => is_field("object"),
        "method_invocation" => is_field("object"),
        "variable_declarator" => is_field("value"),
        "enhanced_for_statement" => is_field("value"),
        "formal_parameter" | "catch_formal_parameter" | "spread_parameter" | "labeled_statement"
        | "break_statement" | "continue_statement" | "method_reference" | "lambda_expression"
        | "inferred_parameters" | "method_declaration" | "constructor_declaration"
        | "class_declaration" | "scoped_identifier" => false,
        _ => true,
    }
}

fn mentions_length(node: &Node, source: &[u8]) -> bool {
    descendants(node)
        .iter()
        .any(|n| n.kind() == "field_access" && field_text(n, "field", source) == "length")
}

fn record_array_access(node: &Node, arrays: &mut ArrayMetrics) {
    // Only the outermost access of a chain like a[i][j] is counted.
    if node.parent().is_some_and(|p| {
        p.kind() == "array_access"
            && p.child_by_field_name("array")
                .is_some_and(|a| a.id() == node.id())
    }) {
        return;
    }
    let mut depth = 1;
    let mut current = node.child_by_field_name("array");
    while let Some(inner) = current {
        if inner.kind() != "array_access" {
            break;
        }
        depth += 1;
        current = inner.child_by_field_name("array");
    }
    if depth == 1 {
        arrays.single_dim_access += 1;
    } else {
        arrays.multi_dim_access += 1;
    }
    arrays.nested_depth = arrays.nested_depth.max(depth);
}

fn record_bulk_operation(node: &Node, source: &[u8], arrays: &mut ArrayMetrics) {
    let object = field_text(node, "object", source);
    let name = field_text(node, "name", source);
    match (object, name) {
        ("System", "arraycopy") => {
            arrays.bulk_operations += 1;
            arrays.algorithms.insert("copy".into());
        }
        ("Arrays", "sort") => {
            arrays.bulk_operations += 1;
            arrays.algorithms.insert("sort".into());
        }
        ("Arrays", "fill" | "copyOf") => arrays.bulk_operations += 1,
        _ => {}
    }
}

fn record_array_comparison(cond: &Node, source: &[u8], arrays: &mut ArrayMetrics) {
    for n in descendants(cond) {
        if n.kind() != "binary_expression" {
            continue;
        }
        let op = field_text(&n, "operator", source);
        let left = n.child_by_field_name("left").is_some_and(|l| l.kind() == "array_access");
        let right = n.child_by_field_name("right").is_some_and(|r| r.kind() == "array_access");
        if op == ">" && left && right {
            arrays.algorithms.insert("sort".into());
        }
        if matches!(op, "<" | ">" | "<=" | ">=" | "==" | "!=") && (left || right) {
            arrays.algorithms.insert("filter".into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{extract_package, extract_shape, parse_java, primary_type_declaration};

    fn behavior_of(source: &str) -> InternalBehavior {
        let tree = parse_java(source).unwrap();
        let root = tree.root_node();
        let decl = primary_type_declaration(&root).unwrap();
        let class = extract_shape(&decl, source.as_bytes(), &extract_package(&root, source.as_bytes()));
        extract_behavior(&decl, source, &class)
    }

    const SOURCE: &str = r#"
public class Counter {
    private int count;
    private int[] values;
    private int[][] grid;

    public int getCount() {
        return count;
    }

    public void setCount(int count) {
        this.count = count;
    }

    public void reset() {
        count = 0;
        setCount(0);
        setCount(1);
        reset();
    }

    public int sum() {
        int total = 0;
        for (int i = 0; i < values.length; i++) {
            total += values[i];
        }
        while (total > 100) {
            total -= grid[0][1];
        }
        System.arraycopy(values, 0, values, 1, 2);
        return total;
    }
}
"#;

    #[test]
    fn call_graph_tracks_self_calls_and_recursion() {
        let b = behavior_of(SOURCE);
        assert_eq!(b.call_graph.calls["reset"], vec!["setCount"]);
        assert_eq!(b.call_graph.call_frequency["setCount"], 2);
        assert!(b.call_graph.recursive.contains("reset"));
        assert_eq!(b.call_graph.callers(), 1);
    }

    #[test]
    fn state_separates_reads_and_writes() {
        let b = behavior_of(SOURCE);
        assert_eq!(b.state.field_writes["count"], 2);
        assert_eq!(b.state.field_reads["count"], 1);
        assert_eq!(b.state.field_reads["values"], 4);
    }

    #[test]
    fn iteration_and_arrays() {
        let b = behavior_of(SOURCE);
        assert_eq!(b.iteration.for_loops, 1);
        assert_eq!(b.iteration.while_loops, 1);
        assert_eq!(b.arrays.single_dim_access, 1);
        assert_eq!(b.arrays.multi_dim_access, 1);
        assert_eq!(b.arrays.nested_depth, 2);
        assert_eq!(b.arrays.loop_array_access, 1);
        assert_eq!(b.arrays.bulk_operations, 1);
        assert!(b.arrays.algorithms.contains("copy"));
        assert!(b.arrays.algorithms.contains("search"));
    }

    #[test]
    fn method_names_fall_into_buckets() {
        let methods = vec![
            MethodInfo::new("int", "getCount", &[]),
            MethodInfo::new("void", "setCount", &["int"]),
            MethodInfo::new("void", "onClick", &[]),
            MethodInfo::new("String", "format", &[]),
            MethodInfo::new("void", "a", &[]),
        ];
        let s = classify_method_names(&methods);
        assert_eq!(s.getters, vec!["getCount"]);
        assert_eq!(s.setters, vec!["setCount"]);
        assert_eq!(s.event_handlers, vec!["onClick"]);
        assert_eq!(s.utilities, vec!["format"]);
        assert!(s.builders.is_empty());
    }
}
