//! Python entity extraction
//!
//! Structured mode walks the tree-sitter grammar; functions nested inside
//! class bodies become methods, every `class_definition` becomes a class
//! entity carrying its base classes in `parameters`.

use super::{complexity_of, end_line, loc_of, node_text, parse_tree, start_line, Extractor};
use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

/// Branching node kinds counted toward complexity
const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "elif_clause",
    "for_statement",
    "while_statement",
    "except_clause",
    "with_statement",
    "conditional_expression",
    "and",
    "or",
];

pub struct PythonExtractor;

impl Extractor for PythonExtractor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".py", ".pyw"]
    }

    fn parse_content(&self, content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
        let lang: tree_sitter::Language = tree_sitter_python::LANGUAGE.into();
        match parse_tree(content, &lang) {
            Some(tree) => structured(&tree, content, file_path, repo_name),
            None => {
                tracing::warn!(file = file_path, "python parse failed, using regex fallback");
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

    // Pre-order walk; the class context travels with each frame. Function
    // bodies are not descended into, so only top-level functions and
    // class-body methods are emitted.
    let mut stack: Vec<(Node, Option<String>)> = vec![(tree.root_node(), None)];
    while let Some((node, class_ctx)) = stack.pop() {
        match node.kind() {
            "function_definition" => {
                if let Some(entity) =
                    parse_function(node, source, file_path, repo_name, class_ctx.as_deref())
                {
                    entities.push(entity);
                }
            }
            "class_definition" => {
                let class_name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, source).to_string());
                if let Some(entity) = parse_class(node, source, file_path, repo_name) {
                    entities.push(entity);
                }
                if let Some(body) = node.child_by_field_name("body") {
                    for i in (0..body.child_count()).rev() {
                        if let Some(child) = body.child(i) {
                            stack.push((child, class_name.clone()));
                        }
                    }
                }
            }
            _ => {
                for i in (0..node.child_count()).rev() {
                    if let Some(child) = node.child(i) {
                        stack.push((child, class_ctx.clone()));
                    }
                }
            }
        }
    }

    entities
}

fn parse_function(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    parent_class: Option<&str>,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| node_text(n, source).to_string());

    let mut signature = format!("def {}({})", name, parameters.join(", "));
    if let Some(ret) = &return_type {
        signature.push_str(&format!(" -> {}", ret));
    }

    let kind = if parent_class.is_some() {
        EntityKind::Method
    } else {
        EntityKind::Function
    };

    Some(CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start_line(node), &name, kind),
        name,
        kind,
        language: Language::Python,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code: node_text(node, source).to_string(),
        docstring: extract_docstring(node, source),
        signature: Some(signature),
        parameters,
        return_type,
        decorators: extract_decorators(node, source),
        parent_class: parent_class.map(|s| s.to_string()),
        complexity: Some(complexity_of(node, BRANCH_KINDS)),
        loc: loc_of(node),
        created_at: Utc::now(),
    })
}

fn parse_class(node: Node, source: &str, file_path: &str, repo_name: &str) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();

    // Base classes live in the superclasses argument list
    let mut bases = Vec::new();
    if let Some(superclasses) = node.child_by_field_name("superclasses") {
        for i in 0..superclasses.named_child_count() {
            if let Some(arg) = superclasses.named_child(i) {
                if arg.kind() == "identifier" || arg.kind() == "attribute" {
                    bases.push(node_text(arg, source).to_string());
                }
            }
        }
    }

    let signature = if bases.is_empty() {
        format!("class {}", name)
    } else {
        format!("class {}({})", name, bases.join(", "))
    };

    Some(CodeEntity {
        id: CodeEntity::make_id(
            repo_name,
            file_path,
            start_line(node),
            &name,
            EntityKind::Class,
        ),
        name,
        kind: EntityKind::Class,
        language: Language::Python,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code: node_text(node, source).to_string(),
        docstring: extract_docstring(node, source),
        signature: Some(signature),
        parameters: bases,
        return_type: None,
        decorators: extract_decorators(node, source),
        parent_class: None,
        complexity: Some(complexity_of(node, BRANCH_KINDS)),
        loc: loc_of(node),
        created_at: Utc::now(),
    })
}

/// Parameter names, with `*` / `**` prefixes preserved.
fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..params.named_child_count() {
        let Some(child) = params.named_child(i) else {
            continue;
        };
        match child.kind() {
            "identifier" => out.push(node_text(child, source).to_string()),
            "typed_parameter" | "default_parameter" | "typed_default_parameter" => {
                if let Some(ident) = first_identifier(child) {
                    out.push(node_text(ident, source).to_string());
                }
            }
            "list_splat_pattern" => {
                if let Some(ident) = first_identifier(child) {
                    out.push(format!("*{}", node_text(ident, source)));
                }
            }
            "dictionary_splat_pattern" => {
                if let Some(ident) = first_identifier(child) {
                    out.push(format!("**{}", node_text(ident, source)));
                }
            }
            _ => {}
        }
    }
    out
}

fn first_identifier(node: Node) -> Option<Node> {
    for i in 0..node.named_child_count() {
        if let Some(child) = node.named_child(i) {
            if child.kind() == "identifier" {
                return Some(child);
            }
        }
    }
    None
}

/// Docstring: the first statement of the body when it is a string literal,
/// with surrounding quotes stripped.
fn extract_docstring(node: Node, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let expr = first.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    let raw = node_text(expr, source);
    let cleaned = raw.trim_matches(|c| c == '"' || c == '\'').trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Decorators are contiguous preceding siblings inside a decorated_definition.
fn extract_decorators(node: Node, source: &str) -> Vec<String> {
    let mut decorators = Vec::new();
    let mut prev = node.prev_sibling();
    while let Some(p) = prev {
        if p.kind() != "decorator" {
            break;
        }
        decorators.insert(0, node_text(p, source).to_string());
        prev = p.prev_sibling();
    }
    decorators
}

// =============================================================================
// FALLBACK MODE
// =============================================================================

static FUNC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)def\s+(\w+)\s*\(([^)]*)\)").unwrap());
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\s*)class\s+(\w+)(?:\s*\(([^)]*)\))?").unwrap());

/// Line-anchored regex fallback. Function bodies are closed off by scanning
/// for the next line at the same or lower indent; classes span one line.
fn fallback(content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
    let mut entities = Vec::new();
    let lines: Vec<&str> = content.lines().collect();

    let mut current_class: Option<String> = None;
    let mut class_indent = 0usize;

    for (i, line) in lines.iter().enumerate() {
        if let Some(caps) = CLASS_RE.captures(line) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let name = caps[2].to_string();
            let bases_raw = caps.get(3).map_or("", |m| m.as_str());
            let bases: Vec<String> = bases_raw
                .split(',')
                .map(|b| b.trim().to_string())
                .filter(|b| !b.is_empty())
                .collect();

            current_class = Some(name.clone());
            class_indent = indent;

            let signature = if bases.is_empty() {
                format!("class {}", name)
            } else {
                format!("class {}({})", name, bases_raw)
            };
            entities.push(line_entity(
                &name,
                EntityKind::Class,
                file_path,
                repo_name,
                i as u32 + 1,
                i as u32 + 1,
                line,
                Some(signature),
                bases,
                None,
            ));
            continue;
        }

        if let Some(caps) = FUNC_RE.captures(line) {
            let indent = caps.get(1).map_or(0, |m| m.as_str().len());
            let name = caps[2].to_string();
            let params_raw = caps.get(3).map_or("", |m| m.as_str());
            let params: Vec<String> = params_raw
                .split(',')
                .map(|p| {
                    p.trim()
                        .split(':')
                        .next()
                        .unwrap_or("")
                        .split('=')
                        .next()
                        .unwrap_or("")
                        .trim()
                        .to_string()
                })
                .filter(|p| !p.is_empty())
                .collect();

            let is_method = current_class.is_some() && indent > class_indent;
            let parent = if is_method { current_class.clone() } else { None };

            // Find the end of the body by tracking indentation
            let mut func_end = i;
            for (j, next_line) in lines.iter().enumerate().skip(i + 1) {
                if next_line.trim().is_empty() {
                    continue;
                }
                let next_indent = next_line.len() - next_line.trim_start().len();
                if next_indent <= indent {
                    break;
                }
                func_end = j;
            }
            let source: String = lines[i..=func_end].join("\n");

            let kind = if is_method {
                EntityKind::Method
            } else {
                EntityKind::Function
            };
            let mut entity = line_entity(
                &name,
                kind,
                file_path,
                repo_name,
                i as u32 + 1,
                func_end as u32 + 1,
                &source,
                Some(format!("def {}({})", name, params_raw)),
                params,
                parent,
            );
            entity.loc = (func_end - i) as u32 + 1;
            entities.push(entity);
            continue;
        }

        // Back at column zero: leave the class scope
        if !line.trim().is_empty() && !line.starts_with(' ') && !line.starts_with('\t') {
            current_class = None;
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
    start: u32,
    end: u32,
    source: &str,
    signature: Option<String>,
    parameters: Vec<String>,
    parent_class: Option<String>,
) -> CodeEntity {
    CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start, name, kind),
        name: name.to_string(),
        kind,
        language: Language::Python,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start,
        end_line: end,
        source_code: source.to_string(),
        docstring: None,
        signature,
        parameters,
        return_type: None,
        decorators: Vec::new(),
        parent_class,
        complexity: None,
        loc: end - start + 1,
        created_at: Utc::now(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
