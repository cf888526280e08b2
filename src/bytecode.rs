//! Extractor for `javap -c -p` disassembly listings of obfuscated classes.
//!
//! The class declaration and member signatures give the shape; the
//! constant-pool comments on instructions (`// Method gh.a:(I)V`) give the
//! cross-references. Listings carry no usable internal-behavior signal.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use crate::crossref::{CrossReferenceGraph, Reference, ReferenceKind, reference_target};
use crate::ingest::ClassStructureProvider;
use crate::model::{ClassSource, ClassStructure, FieldInfo, MethodInfo, normalize_type_name, simple_name, strip_generics};

pub const BYTECODE_SUFFIX: &str = ".bytecode.txt";

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*((?:[a-z][a-z-]*\s+)*?)(class|interface|enum)\s+([\w$.]+)(.*)$").unwrap()
});
static INSTRUCTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\d+:").unwrap());
static CONSTANT_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\d+:\s+(\w+)\s.*//\s*(class|Method|InterfaceMethod|Field)\s+(\S+)").unwrap()
});

const MODIFIERS: [&str; 14] = [
    "public",
    "private",
    "protected",
    "static",
    "final",
    "abstract",
    "synchronized",
    "native",
    "transient",
    "volatile",
    "strictfp",
    "default",
    "sealed",
    "non-sealed",
];

fn is_modifier(token: &str) -> bool {
    MODIFIERS.contains(&token)
}

/// Parses one listing. Fails when no class declaration is present.
pub fn parse_javap(text: &str) -> Result<ClassStructure> {
    let mut lines = text.lines().enumerate();

    let mut class = loop {
        let Some((_, line)) = lines.next() else {
            bail!("No class declaration in disassembly");
        };
        if INSTRUCTION.is_match(line) {
            continue;
        }
        let line = strip_generics(line);
        if let Some(class) = parse_class_decl(&line) {
            break class;
        }
    };

    let mut graph = CrossReferenceGraph::new();
    let mut current = String::from("<clinit>");

    for (index, line) in lines {
        if let Some(caps) = CONSTANT_REF.captures(line) {
            if let Some(reference) = instruction_reference(&caps[1], &caps[2], &caps[3], index + 1) {
                if let Some(target) = reference_target(&reference.target_class, &class.name) {
                    graph.push(current.clone(), Reference { target_class: target, ..reference });
                }
            }
            continue;
        }
        if INSTRUCTION.is_match(line) {
            continue;
        }
        let member = strip_generics(line.trim());
        let Some(member) = member.strip_suffix(';') else {
            continue;
        };
        if member.starts_with("static {") {
            current = "<clinit>".to_string();
            continue;
        }
        if member.contains('(') {
            if let Some((is_constructor, method)) = parse_method(member, &class.name) {
                current = method.name.clone();
                if is_constructor {
                    class.constructors.push(method);
                } else {
                    class.methods.push(method);
                }
            }
        } else if let Some(field) = parse_field(member) {
            class.fields.push(field);
        }
    }

    graph.normalize();
    class.cross_references = Some(graph);
    Ok(class)
}

fn parse_class_decl(line: &str) -> Option<ClassStructure> {
    let caps = CLASS_DECL.captures(line)?;
    let modifiers: Vec<&str> = caps[1].split_whitespace().collect();
    if !modifiers.iter().all(|m| is_modifier(m)) {
        return None;
    }
    let kind = &caps[2];
    let qualified = &caps[3];
    let name = simple_name(qualified);
    let package = qualified
        .strip_suffix(name)
        .map(|p| p.trim_end_matches('.'))
        .unwrap_or("");

    let mut class = ClassStructure::new(name, ClassSource::Obfuscated).with_modifiers(&modifiers);
    class.package = package.to_string();

    let rest = caps[4].trim().trim_end_matches('{').trim();
    let (extends, implements) = match rest.split_once("implements") {
        Some((e, i)) => (e.trim(), i.trim()),
        None => (rest, ""),
    };
    let extends = extends.strip_prefix("extends").unwrap_or("").trim();
    let names = |list: &str| -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    };

    if kind == "interface" {
        for parent in names(extends) {
            class.add_interface(&parent);
        }
    } else if let Some(parent) = names(extends).first() {
        class = class.with_superclass(parent);
    }
    for iface in names(implements) {
        class.add_interface(&iface);
    }
    Some(class)
}

/// `(is_constructor, signature)` for a method line without its `;`.
fn parse_method(line: &str, class_name: &str) -> Option<(bool, MethodInfo)> {
    let open = line.find('(')?;
    let close = line[open..].find(')')? + open;
    let head: Vec<&str> = line[..open].split_whitespace().collect();
    let (raw_name, before) = head.split_last()?;
    let name = simple_name(raw_name.trim_matches('"'));

    let parameter_types: Vec<String> = line[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(normalize_type_name)
        .collect();

    if name == class_name || name == "<init>" {
        return Some((
            true,
            MethodInfo {
                return_type: String::new(),
                name: class_name.to_string(),
                parameter_types,
            },
        ));
    }
    let return_type = before.last().filter(|t| !is_modifier(t))?;
    Some((
        false,
        MethodInfo {
            return_type: normalize_type_name(return_type),
            name: name.to_string(),
            parameter_types,
        },
    ))
}

fn parse_field(line: &str) -> Option<FieldInfo> {
    let line = line.split('=').next().unwrap_or(line);
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (name, rest) = tokens.split_last()?;
    let (type_name, modifiers) = rest.split_last()?;
    if is_modifier(type_name) || type_name.ends_with(':') || !modifiers.iter().all(|m| is_modifier(m)) {
        return None;
    }
    Some(FieldInfo {
        type_name: normalize_type_name(type_name),
        name: name.to_string(),
        modifiers: modifiers.iter().map(|m| m.to_string()).collect(),
    })
}

/// Reference described by one commented instruction. The target still
/// needs filtering through [`reference_target`].
fn instruction_reference(opcode: &str, kind: &str, target: &str, line: usize) -> Option<Reference> {
    let reference_kind = match (opcode, kind) {
        ("new", "class") => ReferenceKind::Instantiation,
        ("anewarray" | "multianewarray", "class") => ReferenceKind::ArrayAccess,
        ("invokestatic", "Method" | "InterfaceMethod") => ReferenceKind::StaticCall,
        (op, "Method" | "InterfaceMethod") if op.starts_with("invoke") => ReferenceKind::MethodCall,
        (op, "Field") if matches!(op, "getfield" | "putfield" | "getstatic" | "putstatic") => {
            ReferenceKind::FieldAccess
        }
        _ => return None,
    };

    if kind == "class" {
        let member = if reference_kind == ReferenceKind::Instantiation { "<init>" } else { "[]" };
        return Some(Reference::new(reference_kind, target, member, line));
    }

    // Owner.member:descriptor; no owner means the class itself.
    let qualified = target.split(':').next().unwrap_or(target);
    let (owner, member) = qualified.rsplit_once('.')?;
    Some(Reference::new(reference_kind, owner, member.trim_matches('"'), line))
}

/// Obfuscated-side extractor for `*.bytecode.txt` listings.
#[derive(Debug, Clone, Default)]
pub struct BytecodeProvider;

impl ClassStructureProvider for BytecodeProvider {
    fn kind(&self) -> &'static str {
        "javap-text-v1"
    }

    fn accepts(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(BYTECODE_SUFFIX))
    }

    fn parse(&self, path: &Path, content: &[u8]) -> Result<ClassStructure> {
        let text = std::str::from_utf8(content)
            .with_context(|| format!("Disassembly is not valid UTF-8: {}", path.display()))?;
        parse_javap(text).with_context(|| format!("Failed to parse disassembly: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"Compiled from "Unknown Source"
public final class ab extends cd implements java.lang.Runnable, ef {
  private int a;
  static final int[] b;
  public gh c;
  public ab(int);
    Code:
       0: aload_0
       1: invokespecial #1                  // Method cd."<init>":()V
       4: return

  public void run();
    Code:
       0: aload_0
       1: getfield      #2                  // Field a:I
       4: new           #3                  // class gh
       7: dup
       8: invokespecial #4                  // Method gh."<init>":()V
      11: invokevirtual #5                  // Method gh.a:(I)V
      14: invokestatic  #6                  // Method ij.b:()V
      17: getstatic     #7                  // Field kl.c:[I
      20: anewarray     #8                  // class mn
      23: invokevirtual #9                  // Method java/lang/StringBuilder.append:(I)Ljava/lang/StringBuilder;
      26: invokevirtual #10                 // Method c:()V
      29: return

  java.util.List<gh> d(java.lang.String, int[]) throws java.io.IOException;
    Code:
       0: aconst_null
       1: areturn

  static {};
    Code:
       0: iconst_1
       1: putstatic     #11                 // Field op.d:I
       4: return
}
"#;

    #[test]
    fn extracts_shape() {
        let class = parse_javap(LISTING).unwrap();
        assert_eq!(class.name, "ab");
        assert_eq!(class.source, ClassSource::Obfuscated);
        assert_eq!(class.modifiers, vec!["public", "final"]);
        assert_eq!(class.superclass, "cd");
        assert_eq!(class.interfaces, vec!["Runnable", "ef"]);

        let fields: Vec<(&str, &str)> = class
            .fields
            .iter()
            .map(|f| (f.type_name.as_str(), f.name.as_str()))
            .collect();
        assert_eq!(fields, vec![("int", "a"), ("int[]", "b"), ("gh", "c")]);
        assert_eq!(class.fields[1].modifiers, vec!["static", "final"]);

        assert_eq!(class.constructors.len(), 1);
        assert_eq!(class.constructors[0].parameter_types, vec!["int"]);
        let methods: Vec<&str> = class.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["run", "d"]);
        assert_eq!(class.methods[1].return_type, "List");
        assert_eq!(class.methods[1].parameter_types, vec!["String", "int[]"]);
        assert!(class.behavior.is_none());
    }

    #[test]
    fn extracts_references_from_comments() {
        let class = parse_javap(LISTING).unwrap();
        let graph = class.cross_references.unwrap();
        assert_eq!(graph.count(ReferenceKind::Instantiation), 1);
        assert_eq!(graph.count(ReferenceKind::MethodCall), 3);
        assert_eq!(graph.count(ReferenceKind::StaticCall), 1);
        assert_eq!(graph.count(ReferenceKind::FieldAccess), 2);
        assert_eq!(graph.count(ReferenceKind::ArrayAccess), 1);
        assert!(graph.unique_targets.contains_key("cd"));
        assert!(!graph.unique_targets.contains_key("StringBuilder"));
        assert_eq!(graph.method_references["<clinit>"][0].target_class, "op");
        assert_eq!(graph.method_references["run"].len(), 6);
    }

    #[test]
    fn interface_extends_list_becomes_interfaces() {
        let class = parse_javap("public interface qr extends st, uv {\n  public abstract void a();\n}\n").unwrap();
        assert_eq!(class.interfaces, vec!["st", "uv"]);
        assert!(class.superclass.is_empty());
        assert_eq!(class.methods.len(), 1);
    }

    #[test]
    fn missing_declaration_is_an_error() {
        assert!(parse_javap("Compiled from \"x\"\n  0: return\n").is_err());
        let err = BytecodeProvider
            .parse(Path::new("bad.bytecode.txt"), b"garbage")
            .unwrap_err();
        assert!(format!("{err:#}").contains("bad.bytecode.txt"));
    }

    #[test]
    fn accepts_only_listing_suffix() {
        assert!(BytecodeProvider.accepts(Path::new("out/ab.bytecode.txt")));
        assert!(!BytecodeProvider.accepts(Path::new("out/ab.txt")));
        assert!(!BytecodeProvider.accepts(Path::new("out/Ab.java")));
    }
}
