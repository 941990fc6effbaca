//! Rust entity extraction
//!
//! Functions become methods when enclosed by an `impl` block, with the impl's
//! type as the parent (one level of generics unwrapped, so `impl Foo<T>`
//! parents to `Foo`). Doc text is the contiguous run of `///` / `//!` lines
//! above the item; attribute items do not break the run.

use super::{complexity_of, end_line, loc_of, node_text, parse_tree, start_line, Extractor};
use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

const BRANCH_KINDS: &[&str] = &[
    "if_expression",
    "while_expression",
    "for_expression",
    "match_arm",
    "&&",
    "||",
];

pub struct RustExtractor;

impl Extractor for RustExtractor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".rs"]
    }

    fn parse_content(&self, content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
        let lang: tree_sitter::Language = tree_sitter_rust::LANGUAGE.into();
        match parse_tree(content, &lang) {
            Some(tree) => structured(&tree, content, file_path, repo_name),
            None => {
                tracing::warn!(file = file_path, "rust parse failed, using regex fallback");
                fallback(content, file_path, repo_name)
            }
        }
    }
}

// =============================================================================
// STRUCTURED MODE
// =============================================================================

fn structured(
    tree: &tree_sitter::Tree,
    source: &str,
    file_path: &str,
    repo_name: &str,
) -> Vec<CodeEntity> {
    let mut entities = Vec::new();

    let mut stack: Vec<(Node, Option<String>)> = vec![(tree.root_node(), None)];
    while let Some((node, impl_ctx)) = stack.pop() {
        match node.kind() {
            "function_item" => {
                if let Some(e) =
                    parse_function(node, source, file_path, repo_name, impl_ctx.as_deref())
                {
                    entities.push(e);
                }
                // nested helper fns inside the body are extracted too
                push_children(&mut stack, node, &impl_ctx);
            }
            "struct_item" => {
                if let Some(e) =
                    parse_type_item(node, source, file_path, repo_name, EntityKind::Struct)
                {
                    entities.push(e);
                }
            }
            "enum_item" => {
                if let Some(e) =
                    parse_type_item(node, source, file_path, repo_name, EntityKind::Enum)
                {
                    entities.push(e);
                }
            }
            "trait_item" => {
                if let Some(e) =
                    parse_type_item(node, source, file_path, repo_name, EntityKind::Interface)
                {
                    entities.push(e);
                }
                // default trait methods are plain functions (no impl parent)
                push_children(&mut stack, node, &None);
            }
            "impl_item" => {
                let impl_type = impl_type_name(node, source);
                push_children(&mut stack, node, &impl_type);
            }
            _ => {
                push_children(&mut stack, node, &impl_ctx);
            }
        }
    }

    entities
}

fn push_children<'t>(stack: &mut Vec<(Node<'t>, Option<String>)>, node: Node<'t>, ctx: &Option<String>) {
    for i in (0..node.named_child_count()).rev() {
        if let Some(child) = node.named_child(i) {
            stack.push((child, ctx.clone()));
        }
    }
}

fn parse_function(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    impl_type: Option<&str>,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| node_text(n, source).to_string());

    let is_public = has_visibility(node, source);
    let is_async = is_async_fn(node, source);

    let mut sig_parts: Vec<String> = Vec::new();
    if is_public {
        sig_parts.push("pub".to_string());
    }
    if is_async {
        sig_parts.push("async".to_string());
    }
    sig_parts.push("fn".to_string());
    sig_parts.push(format!("{}({})", name, parameters.join(", ")));
    if let Some(ret) = &return_type {
        sig_parts.push(format!("-> {}", ret));
    }

    let kind = if impl_type.is_some() {
        EntityKind::Method
    } else {
        EntityKind::Function
    };

    Some(CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start_line(node), &name, kind),
        name,
        kind,
        language: Language::Rust,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code: node_text(node, source).to_string(),
        docstring: extract_doc(node, source),
        signature: Some(sig_parts.join(" ")),
        parameters,
        return_type,
        decorators: Vec::new(),
        parent_class: impl_type.map(|s| s.to_string()),
        complexity: Some(complexity_of(node, BRANCH_KINDS)),
        loc: loc_of(node),
        created_at: Utc::now(),
    })
}

fn parse_type_item(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    kind: EntityKind,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let keyword = match kind {
        EntityKind::Struct => "struct",
        EntityKind::Enum => "enum",
        _ => "trait",
    };
    let signature = if has_visibility(node, source) {
        format!("pub {} {}", keyword, name)
    } else {
        format!("{} {}", keyword, name)
    };

    Some(CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start_line(node), &name, kind),
        name,
        kind,
        language: Language::Rust,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code: node_text(node, source).to_string(),
        docstring: extract_doc(node, source),
        signature: Some(signature),
        parameters: Vec::new(),
        return_type: None,
        decorators: Vec::new(),
        parent_class: None,
        complexity: Some(1),
        loc: loc_of(node),
        created_at: Utc::now(),
    })
}

/// Type name of an impl block, unwrapping one level of generics.
fn impl_type_name(node: Node, source: &str) -> Option<String> {
    let ty = node.child_by_field_name("type")?;
    match ty.kind() {
        "type_identifier" => Some(node_text(ty, source).to_string()),
        "generic_type" => {
            for i in 0..ty.named_child_count() {
                if let Some(child) = ty.named_child(i) {
                    if child.kind() == "type_identifier" {
                        return Some(node_text(child, source).to_string());
                    }
                }
            }
            None
        }
        _ => None,
    }
}

fn has_visibility(node: Node, source: &str) -> bool {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == "visibility_modifier" {
                return node_text(child, source).contains("pub");
            }
        }
    }
    false
}

fn is_async_fn(node: Node, source: &str) -> bool {
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if child.kind() == "function_modifiers" {
                return node_text(child, source).contains("async");
            }
        }
    }
    false
}

/// Full parameter text, including the self parameter.
fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..params.named_child_count() {
        if let Some(child) = params.named_child(i) {
            if child.kind() == "parameter" || child.kind() == "self_parameter" {
                out.push(node_text(child, source).trim().to_string());
            }
        }
    }
    out
}

/// Contiguous `///` / `//!` run above the item; attributes are skipped
/// without breaking the run, a plain `//` comment ends it.
fn extract_doc(node: Node, source: &str) -> Option<String> {
    let mut doc_lines = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        match p.kind() {
            "line_comment" | "block_comment" => {
                let text = node_text(p, source).trim();
                if let Some(rest) = text.strip_prefix("///").or_else(|| text.strip_prefix("//!")) {
                    doc_lines.insert(0, rest.trim().to_string());
                } else if let Some(rest) =
                    text.strip_prefix("/**").or_else(|| text.strip_prefix("/*!"))
                {
                    let inner = rest.strip_suffix("*/").unwrap_or(rest).trim();
                    doc_lines.insert(0, inner.to_string());
                } else {
                    break;
                }
            }
            "attribute_item" => {}
            _ => break,
        }
        prev = p.prev_sibling();
    }
    if doc_lines.is_empty() {
        None
    } else {
        Some(doc_lines.join(" "))
    }
}

// =============================================================================
// FALLBACK MODE
// =============================================================================

static FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\s*)(pub\s+)?(async\s+)?fn\s+(\w+)\s*(<[^>]*>)?\s*\(([^)]*)\)").unwrap()
});
static STRUCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)(pub\s+)?struct\s+(\w+)").unwrap());
static ENUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)(pub\s+)?enum\s+(\w+)").unwrap());
static TRAIT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\s*)(pub\s+)?trait\s+(\w+)").unwrap());
static IMPL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^impl\s*(?:<[^>]*>\s*)?(\w+)").unwrap());

fn fallback(content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
    let mut entities = Vec::new();
    let mut current_impl: Option<String> = None;

    for (i, line) in content.lines().enumerate() {
        let line_no = i as u32 + 1;

        if let Some(caps) = IMPL_RE.captures(line) {
            current_impl = Some(caps[1].to_string());
            continue;
        }

        if let Some(caps) = FUNC_RE.captures(line) {
            let is_pub = caps.get(2).is_some();
            let is_async = caps.get(3).is_some();
            let name = caps[4].to_string();
            let params = caps.get(6).map_or("", |m| m.as_str());

            let mut sig_parts: Vec<String> = Vec::new();
            if is_pub {
                sig_parts.push("pub".to_string());
            }
            if is_async {
                sig_parts.push("async".to_string());
            }
            sig_parts.push(format!("fn {}({})", name, params));

            let kind = if current_impl.is_some() {
                EntityKind::Method
            } else {
                EntityKind::Function
            };
            entities.push(line_entity(
                &name,
                kind,
                file_path,
                repo_name,
                line_no,
                line,
                sig_parts.join(" "),
                current_impl.clone(),
            ));
            continue;
        }

        for (re, kind, keyword) in [
            (&STRUCT_RE, EntityKind::Struct, "struct"),
            (&ENUM_RE, EntityKind::Enum, "enum"),
            (&TRAIT_RE, EntityKind::Interface, "trait"),
        ] {
            if let Some(caps) = re.captures(line) {
                let is_pub = caps.get(2).is_some();
                let name = caps[3].to_string();
                let signature = if is_pub {
                    format!("pub {} {}", keyword, name)
                } else {
                    format!("{} {}", keyword, name)
                };
                entities.push(line_entity(
                    &name,
                    kind,
                    file_path,
                    repo_name,
                    line_no,
                    line,
                    signature,
                    None,
                ));
                current_impl = None;
                break;
            }
        }

        if line.trim() == "}" && !line.starts_with(' ') {
            current_impl = None;
        }
    }

    entities
}

#[allow(clippy::too_many_arguments)]
fn line_entity(
    name: &str,
    kind: EntityKind,
    file_path: &str,
    repo_name: &str,
    line_no: u32,
    line: &str,
    signature: String,
    parent_class: Option<String>,
) -> CodeEntity {
    CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, line_no, name, kind),
        name: name.to_string(),
        kind,
        language: Language::Rust,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: line_no,
        end_line: line_no,
        source_code: line.to_string(),
        docstring: None,
        signature: Some(signature),
        parameters: Vec::new(),
        return_type: None,
        decorators: Vec::new(),
        parent_class,
        complexity: None,
        loc: 1,
        created_at: Utc::now(),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> Vec<CodeEntity> {
        RustExtractor.parse_content(code, "src/lib.rs", "test-repo")
    }

    #[test]
    fn test_free_function() {
        let code = "/// Adds two numbers.\npub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n";
        let entities = parse(code);
        assert_eq!(entities.len(), 1);
        let func = &entities[0];
        assert_eq!(func.name, "add");
        assert_eq!(func.kind, EntityKind::Function);
        assert_eq!(func.parameters, vec!["a: i32", "b: i32"]);
        assert_eq!(func.return_type.as_deref(), Some("i32"));
        assert_eq!(
            func.signature.as_deref(),
            Some("pub fn add(a: i32, b: i32) -> i32")
        );
        assert_eq!(func.docstring.as_deref(), Some("Adds two numbers."));
    }

    #[test]
    fn test_impl_method_parent() {
        let code = "struct HttpClient;\n\nimpl HttpClient {\n    pub fn new(base: String) -> Self {\n        Self\n    }\n}\n";
        let entities = parse(code);

        let method = entities.iter().find(|e| e.name == "new").unwrap();
        assert_eq!(method.kind, EntityKind::Method);
        assert_eq!(method.parent_class.as_deref(), Some("HttpClient"));
        assert!(method.signature.as_deref().unwrap().starts_with("pub fn new"));
    }

    #[test]
    fn test_generic_impl_unwrapped() {
        let code = "impl Wrapper<T> {\n    fn get(&self) -> &T {\n        &self.0\n    }\n}\n";
        let entities = parse(code);
        assert_eq!(entities[0].parent_class.as_deref(), Some("Wrapper"));
    }

    #[test]
    fn test_struct_enum_trait() {
        let code = "pub struct Point {\n    x: f32,\n}\n\nenum Shape {\n    Circle,\n}\n\npub trait Draw {\n    fn draw(&self);\n}\n";
        let entities = parse(code);

        let st = entities.iter().find(|e| e.name == "Point").unwrap();
        assert_eq!(st.kind, EntityKind::Struct);
        assert_eq!(st.signature.as_deref(), Some("pub struct Point"));

        let en = entities.iter().find(|e| e.name == "Shape").unwrap();
        assert_eq!(en.kind, EntityKind::Enum);
        assert_eq!(en.signature.as_deref(), Some("enum Shape"));

        let tr = entities.iter().find(|e| e.name == "Draw").unwrap();
        assert_eq!(tr.kind, EntityKind::Interface);
        assert_eq!(tr.signature.as_deref(), Some("pub trait Draw"));
    }

    #[test]
    fn test_async_signature() {
        let code = "pub async fn fetch(url: &str) -> String {\n    String::new()\n}\n";
        let entities = parse(code);
        assert!(entities[0]
            .signature
            .as_deref()
            .unwrap()
            .starts_with("pub async fn fetch"));
    }

    #[test]
    fn test_doc_run_skips_attributes() {
        let code = "/// Keeps the run going\n#[inline]\n/// even across attributes.\nfn hot() {}\n";
        let entities = parse(code);
        assert_eq!(
            entities[0].docstring.as_deref(),
            Some("Keeps the run going even across attributes.")
        );
    }

    #[test]
    fn test_plain_comment_breaks_doc_run() {
        let code = "// not a doc comment\nfn plain() {}\n";
        let entities = parse(code);
        assert!(entities[0].docstring.is_none());
    }

    #[test]
    fn test_match_arms_count_toward_complexity() {
        let code = "fn classify(x: u8) -> &'static str {\n    match x {\n        0 => \"zero\",\n        1 => \"one\",\n        _ => \"many\",\n    }\n}\n";
        let entities = parse(code);
        assert_eq!(entities[0].complexity, Some(4));
    }

    #[test]
    fn test_fallback_parse() {
        let code = "impl Engine {\npub fn start(&self) {\n}\npub struct Engine {\nenum Mode {\ntrait Runner {\n";
        let entities = fallback(code, "src/lib.rs", "test-repo");

        let method = entities.iter().find(|e| e.name == "start").unwrap();
        assert_eq!(method.kind, EntityKind::Method);
        assert_eq!(method.parent_class.as_deref(), Some("Engine"));
        assert_eq!(method.signature.as_deref(), Some("pub fn start(&self)"));

        assert!(entities.iter().any(|e| e.kind == EntityKind::Struct));
        assert!(entities.iter().any(|e| e.kind == EntityKind::Enum));
        assert!(entities.iter().any(|e| e.kind == EntityKind::Interface));
    }
}
