//! Go entity extraction
//!
//! Functions, receiver methods (parent class = receiver type with `*`
//! stripped), and `type` declarations of struct or interface shape. Doc text
//! is the run of `//` / `/* */` comments immediately above the declaration.

use super::{complexity_of, end_line, loc_of, node_text, parse_tree, start_line, Extractor};
use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "expression_case",
    "type_case",
    "communication_case",
    "&&",
    "||",
];

pub struct GoExtractor;

impl Extractor for GoExtractor {
    fn language(&self) -> Language {
        Language::Go
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".go"]
    }

    fn parse_content(&self, content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
        let lang: tree_sitter::Language = tree_sitter_go::LANGUAGE.into();
        match parse_tree(content, &lang) {
            Some(tree) => structured(&tree, content, file_path, repo_name),
            None => {
                tracing::warn!(file = file_path, "go parse failed, using regex fallback");
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

    let mut stack: Vec<Node> = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "function_declaration" => {
                if let Some(e) = parse_function(node, source, file_path, repo_name) {
                    entities.push(e);
                }
            }
            "method_declaration" => {
                if let Some(e) = parse_method(node, source, file_path, repo_name) {
                    entities.push(e);
                }
            }
            "type_declaration" => {
                for i in 0..node.named_child_count() {
                    if let Some(spec) = node.named_child(i) {
                        if spec.kind() == "type_spec" {
                            if let Some(e) = parse_type_spec(node, spec, source, file_path, repo_name)
                            {
                                entities.push(e);
                            }
                        }
                    }
                }
            }
            _ => {
                for i in (0..node.named_child_count()).rev() {
                    if let Some(child) = node.named_child(i) {
                        stack.push(child);
                    }
                }
            }
        }
    }

    entities
}

fn parse_function(node: Node, source: &str, file_path: &str, repo_name: &str) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("result")
        .map(|n| node_text(n, source).to_string());

    let mut signature = format!("func {}({})", name, parameters.join(", "));
    if let Some(ret) = &return_type {
        signature.push_str(&format!(" {}", ret));
    }

    Some(entity(
        node,
        source,
        file_path,
        repo_name,
        name,
        EntityKind::Function,
        signature,
        parameters,
        return_type,
        None,
        extract_doc(node, source),
        Some(complexity_of(node, BRANCH_KINDS)),
    ))
}

fn parse_method(node: Node, source: &str, file_path: &str, repo_name: &str) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let receiver = node.child_by_field_name("receiver")?;
    let receiver_text = receiver_declaration(receiver, source);
    let receiver_type = receiver_type_name(receiver, source);
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("result")
        .map(|n| node_text(n, source).to_string());

    let mut signature = format!(
        "func ({}) {}({})",
        receiver_text,
        name,
        parameters.join(", ")
    );
    if let Some(ret) = &return_type {
        signature.push_str(&format!(" {}", ret));
    }

    Some(entity(
        node,
        source,
        file_path,
        repo_name,
        name,
        EntityKind::Method,
        signature,
        parameters,
        return_type,
        receiver_type,
        extract_doc(node, source),
        Some(complexity_of(node, BRANCH_KINDS)),
    ))
}

fn parse_type_spec(
    declaration: Node,
    spec: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
) -> Option<CodeEntity> {
    let name = node_text(spec.child_by_field_name("name")?, source).to_string();
    let kind = match spec.child_by_field_name("type")?.kind() {
        "struct_type" => EntityKind::Struct,
        "interface_type" => EntityKind::Interface,
        _ => return None,
    };

    let signature = if kind == EntityKind::Struct {
        format!("type {} struct", name)
    } else {
        format!("type {} interface", name)
    };

    Some(entity(
        spec,
        source,
        file_path,
        repo_name,
        name,
        kind,
        signature,
        Vec::new(),
        None,
        None,
        extract_doc(declaration, source),
        Some(1),
    ))
}

#[allow(clippy::too_many_arguments)]
fn entity(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    name: String,
    kind: EntityKind,
    signature: String,
    parameters: Vec<String>,
    return_type: Option<String>,
    parent_class: Option<String>,
    docstring: Option<String>,
    complexity: Option<u32>,
) -> CodeEntity {
    CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start_line(node), &name, kind),
        name,
        kind,
        language: Language::Go,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code: node_text(node, source).to_string(),
        docstring,
        signature: Some(signature),
        parameters,
        return_type,
        decorators: Vec::new(),
        parent_class,
        complexity,
        loc: loc_of(node),
        created_at: Utc::now(),
    }
}

/// Full parameter declarations, e.g. `w http.ResponseWriter`.
fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..params.named_child_count() {
        if let Some(child) = params.named_child(i) {
            if child.kind() == "parameter_declaration"
                || child.kind() == "variadic_parameter_declaration"
            {
                out.push(node_text(child, source).trim().to_string());
            }
        }
    }
    out
}

/// Receiver declaration text, e.g. `s *Server`.
fn receiver_declaration(receiver: Node, source: &str) -> String {
    for i in 0..receiver.named_child_count() {
        if let Some(child) = receiver.named_child(i) {
            if child.kind() == "parameter_declaration" {
                return node_text(child, source).trim().to_string();
            }
        }
    }
    String::new()
}

/// Receiver type identifier, with any `*` stripped.
fn receiver_type_name(receiver: Node, source: &str) -> Option<String> {
    for i in 0..receiver.named_child_count() {
        let Some(child) = receiver.named_child(i) else {
            continue;
        };
        if child.kind() == "parameter_declaration" {
            if let Some(ty) = child.child_by_field_name("type") {
                let text = node_text(ty, source).trim_start_matches('*').trim();
                return Some(text.to_string());
            }
        }
    }
    None
}

/// Concatenation of contiguous `//` / `/* */` comments preceding the node.
fn extract_doc(node: Node, source: &str) -> Option<String> {
    let mut doc_lines = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if p.kind() != "comment" {
            break;
        }
        let text = node_text(p, source).trim();
        let cleaned = if let Some(inner) = text.strip_prefix("/*") {
            inner.strip_suffix("*/").unwrap_or(inner).trim()
        } else {
            text.trim_start_matches('/').trim()
        };
        if !cleaned.is_empty() {
            doc_lines.insert(0, cleaned.to_string());
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

static FUNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s+(\w+)\s*\(([^)]*)\)\s*(\S.*)?\{").unwrap());
static METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^func\s+\((\w+)\s+\*?(\w+)\)\s+(\w+)\s*\(([^)]*)\)").unwrap());
static STRUCT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^type\s+(\w+)\s+struct\s*\{").unwrap());
static INTERFACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^type\s+(\w+)\s+interface\s*\{").unwrap());

fn fallback(content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
    let mut entities = Vec::new();

    for (i, line) in content.lines().enumerate() {
        let line_no = i as u32 + 1;

        if let Some(caps) = FUNC_RE.captures(line) {
            let name = caps[1].to_string();
            let params = caps.get(2).map_or("", |m| m.as_str());
            let ret = caps.get(3).map_or("", |m| m.as_str());
            entities.push(line_entity(
                &name,
                EntityKind::Function,
                file_path,
                repo_name,
                line_no,
                line,
                format!("func {}({}) {}", name, params, ret).trim().to_string(),
                None,
            ));
            continue;
        }

        if let Some(caps) = METHOD_RE.captures(line) {
            let receiver_name = &caps[1];
            let receiver_type = caps[2].to_string();
            let name = caps[3].to_string();
            let params = caps.get(4).map_or("", |m| m.as_str());
            entities.push(line_entity(
                &name,
                EntityKind::Method,
                file_path,
                repo_name,
                line_no,
                line,
                format!("func ({} {}) {}({})", receiver_name, receiver_type, name, params),
                Some(receiver_type),
            ));
            continue;
        }

        if let Some(caps) = STRUCT_RE.captures(line) {
            let name = caps[1].to_string();
            entities.push(line_entity(
                &name,
                EntityKind::Struct,
                file_path,
                repo_name,
                line_no,
                line,
                format!("type {} struct", name),
                None,
            ));
            continue;
        }

        if let Some(caps) = INTERFACE_RE.captures(line) {
            let name = caps[1].to_string();
            entities.push(line_entity(
                &name,
                EntityKind::Interface,
                file_path,
                repo_name,
                line_no,
                line,
                format!("type {} interface", name),
                None,
            ));
        }
    }

    entities
}

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
        language: Language::Go,
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
