//! JavaScript / TypeScript entity extraction
//!
//! One extractor serves both languages; the language tag and the grammar are
//! chosen by file extension. Arrow functions and function expressions bound
//! to `const`/`let`/`var` are emitted as functions, `export` wrappers are
//! walked through transparently.

use super::{complexity_of, end_line, loc_of, node_text, parse_tree, start_line, Extractor};
use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::Node;

const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "catch_clause",
    "ternary_expression",
    "switch_case",
    "&&",
    "||",
];

pub struct JavaScriptExtractor;

impl JavaScriptExtractor {
    fn language_for(file_path: &str) -> Language {
        if file_path.ends_with(".ts") || file_path.ends_with(".tsx") {
            Language::Typescript
        } else {
            Language::Javascript
        }
    }

    fn grammar_for(file_path: &str) -> tree_sitter::Language {
        if file_path.ends_with(".tsx") {
            tree_sitter_typescript::LANGUAGE_TSX.into()
        } else if file_path.ends_with(".ts") {
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()
        } else {
            tree_sitter_javascript::LANGUAGE.into()
        }
    }
}

impl Extractor for JavaScriptExtractor {
    fn language(&self) -> Language {
        Language::Javascript
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".js", ".jsx", ".mjs", ".cjs", ".ts", ".tsx"]
    }

    fn parse_content(&self, content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
        let grammar = Self::grammar_for(file_path);
        let lang = Self::language_for(file_path);
        match parse_tree(content, &grammar) {
            Some(tree) => structured(&tree, content, file_path, repo_name, lang),
            None => {
                tracing::warn!(
                    file = file_path,
                    "javascript parse failed, using regex fallback"
                );
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
    lang: Language,
) -> Vec<CodeEntity> {
    let mut entities = Vec::new();

    let mut stack: Vec<Node> = vec![tree.root_node()];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "function_declaration" => {
                if let Some(e) = parse_function(node, source, file_path, repo_name, lang) {
                    entities.push(e);
                }
            }
            "lexical_declaration" | "variable_declaration" => {
                for i in 0..node.named_child_count() {
                    if let Some(declarator) = node.named_child(i) {
                        if declarator.kind() == "variable_declarator" {
                            if let Some(e) = parse_variable_function(
                                node, declarator, source, file_path, repo_name, lang,
                            ) {
                                entities.push(e);
                            }
                        }
                    }
                }
            }
            "class_declaration" => {
                if let Some(class) = parse_class(node, source, file_path, repo_name, lang) {
                    let class_name = class.name.clone();
                    entities.push(class);
                    if let Some(body) = node.child_by_field_name("body") {
                        for i in 0..body.named_child_count() {
                            if let Some(member) = body.named_child(i) {
                                if member.kind() == "method_definition" {
                                    if let Some(m) = parse_method(
                                        member,
                                        source,
                                        file_path,
                                        repo_name,
                                        lang,
                                        &class_name,
                                    ) {
                                        entities.push(m);
                                    }
                                }
                            }
                        }
                    }
                }
            }
            // export wrappers are transparent
            "export_statement" => {
                for i in (0..node.named_child_count()).rev() {
                    if let Some(child) = node.named_child(i) {
                        stack.push(child);
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

fn parse_function(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    lang: Language,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();

    Some(entity(
        node,
        source,
        file_path,
        repo_name,
        lang,
        name.clone(),
        EntityKind::Function,
        format!("function {}({})", name, parameters.join(", ")),
        parameters,
        None,
        extract_jsdoc(node, source),
        node_text(node, source).to_string(),
    ))
}

fn parse_variable_function(
    declaration: Node,
    declarator: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    lang: Language,
) -> Option<CodeEntity> {
    let name_node = declarator.child_by_field_name("name")?;
    if name_node.kind() != "identifier" {
        return None;
    }
    let value = declarator.child_by_field_name("value")?;
    if !matches!(
        value.kind(),
        "arrow_function" | "function_expression" | "function"
    ) {
        return None;
    }

    let name = node_text(name_node, source).to_string();
    let parameters = match value.child_by_field_name("parameters") {
        Some(p) => extract_parameters(p, source),
        // single-parameter arrow: x => x + 1
        None => value
            .child_by_field_name("parameter")
            .map(|p| vec![node_text(p, source).to_string()])
            .unwrap_or_default(),
    };

    let mut e = entity(
        declarator,
        source,
        file_path,
        repo_name,
        lang,
        name.clone(),
        EntityKind::Function,
        format!("const {} = ({}) =>", name, parameters.join(", ")),
        parameters,
        None,
        extract_jsdoc(declaration, source),
        node_text(declaration, source).to_string(),
    );
    e.complexity = Some(complexity_of(value, BRANCH_KINDS));
    Some(e)
}

fn parse_class(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    lang: Language,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let extends = extract_heritage(node, source);

    let mut signature = format!("class {}", name);
    if let Some(parent) = &extends {
        signature.push_str(&format!(" extends {}", parent));
    }

    Some(entity(
        node,
        source,
        file_path,
        repo_name,
        lang,
        name,
        EntityKind::Class,
        signature,
        extends.clone().into_iter().collect(),
        None,
        extract_jsdoc(node, source),
        node_text(node, source).to_string(),
    ))
}

fn parse_method(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    lang: Language,
    parent_class: &str,
) -> Option<CodeEntity> {
    let name = node_text(node.child_by_field_name("name")?, source).to_string();
    let parameters = node
        .child_by_field_name("parameters")
        .map(|p| extract_parameters(p, source))
        .unwrap_or_default();

    Some(entity(
        node,
        source,
        file_path,
        repo_name,
        lang,
        name.clone(),
        EntityKind::Method,
        format!("{}({})", name, parameters.join(", ")),
        parameters,
        Some(parent_class.to_string()),
        extract_jsdoc(node, source),
        node_text(node, source).to_string(),
    ))
}

#[allow(clippy::too_many_arguments)]
fn entity(
    node: Node,
    source: &str,
    file_path: &str,
    repo_name: &str,
    lang: Language,
    name: String,
    kind: EntityKind,
    signature: String,
    parameters: Vec<String>,
    parent_class: Option<String>,
    docstring: Option<String>,
    source_code: String,
) -> CodeEntity {
    CodeEntity {
        id: CodeEntity::make_id(repo_name, file_path, start_line(node), &name, kind),
        name,
        kind,
        language: lang,
        file_path: file_path.to_string(),
        repo_name: repo_name.to_string(),
        start_line: start_line(node),
        end_line: end_line(node),
        source_code,
        docstring,
        signature: Some(signature),
        parameters,
        return_type: None,
        decorators: Vec::new(),
        parent_class,
        complexity: Some(complexity_of(node, BRANCH_KINDS)),
        loc: loc_of(node),
        created_at: Utc::now(),
    }
}

/// The identifier named in an `extends` clause, if any.
fn extract_heritage(class_node: Node, source: &str) -> Option<String> {
    for i in 0..class_node.child_count() {
        let child = class_node.child(i)?;
        if child.kind() == "class_heritage" {
            let mut stack = vec![child];
            while let Some(n) = stack.pop() {
                if n.kind() == "identifier" {
                    return Some(node_text(n, source).to_string());
                }
                for j in (0..n.named_child_count()).rev() {
                    if let Some(c) = n.named_child(j) {
                        stack.push(c);
                    }
                }
            }
        }
    }
    None
}

fn extract_parameters(params: Node, source: &str) -> Vec<String> {
    let mut out = Vec::new();
    for i in 0..params.named_child_count() {
        let Some(child) = params.named_child(i) else {
            continue;
        };
        match child.kind() {
            "identifier" => out.push(node_text(child, source).to_string()),
            "required_parameter" | "optional_parameter" => {
                if let Some(ident) = first_of_kind(child, "identifier") {
                    out.push(node_text(ident, source).to_string());
                }
            }
            "rest_pattern" => {
                if let Some(ident) = first_of_kind(child, "identifier") {
                    out.push(format!("...{}", node_text(ident, source)));
                }
            }
            _ => {}
        }
    }
    out
}

fn first_of_kind<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    let mut stack = vec![node];
    while let Some(n) = stack.pop() {
        if n.kind() == kind && n.id() != node.id() {
            return Some(n);
        }
        for i in (0..n.named_child_count()).rev() {
            if let Some(c) = n.named_child(i) {
                stack.push(c);
            }
        }
    }
    None
}

/// JSDoc block immediately preceding the node; `@tag` lines are dropped.
fn extract_jsdoc(node: Node, source: &str) -> Option<String> {
    let prev = node.prev_sibling()?;
    if prev.kind() != "comment" {
        return None;
    }
    let text = node_text(prev, source);
    if !text.starts_with("/**") {
        return None;
    }

    let mut clean_lines = Vec::new();
    for line in text.lines() {
        let mut line = line.trim();
        line = line.strip_prefix("/**").unwrap_or(line);
        line = line.strip_suffix("*/").unwrap_or(line);
        line = line.strip_prefix('*').unwrap_or(line).trim();
        if !line.is_empty() && !line.starts_with('@') {
            clean_lines.push(line);
        }
    }
    if clean_lines.is_empty() {
        None
    } else {
        Some(clean_lines.join(" "))
    }
}

// =============================================================================
// FALLBACK MODE
// =============================================================================

static FUNC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:async\s+)?function\s+(\w+)\s*\(([^)]*)\)").unwrap()
});
static ARROW_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:export\s+)?(?:const|let|var)\s+(\w+)\s*=\s*(?:async\s+)?\([^)]*\)\s*=>")
        .unwrap()
});
static CLASS_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:export\s+)?class\s+(\w+)(?:\s+extends\s+(\w+))?").unwrap());
static METHOD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s+(?:async\s+)?(\w+)\s*\([^)]*\)\s*\{").unwrap());

fn fallback(content: &str, file_path: &str, repo_name: &str) -> Vec<CodeEntity> {
    let lang = JavaScriptExtractor::language_for(file_path);
    let mut entities = Vec::new();
    let mut current_class: Option<String> = None;

    for (i, line) in content.lines().enumerate() {
        let line_no = i as u32 + 1;

        if let Some(caps) = CLASS_RE.captures(line) {
            let name = caps[1].to_string();
            let extends = caps.get(2).map(|m| m.as_str().to_string());
            current_class = Some(name.clone());
            let mut signature = format!("class {}", name);
            if let Some(parent) = &extends {
                signature.push_str(&format!(" extends {}", parent));
            }
            entities.push(line_entity(
                &name,
                EntityKind::Class,
                lang,
                file_path,
                repo_name,
                line_no,
                line,
                signature,
                None,
            ));
            continue;
        }

        if let Some(caps) = FUNC_RE.captures(line) {
            let name = caps[1].to_string();
            let params = caps.get(2).map_or("", |m| m.as_str());
            entities.push(line_entity(
                &name,
                EntityKind::Function,
                lang,
                file_path,
                repo_name,
                line_no,
                line,
                format!("function {}({})", name, params),
                None,
            ));
            continue;
        }

        if let Some(caps) = ARROW_RE.captures(line) {
            let name = caps[1].to_string();
            entities.push(line_entity(
                &name,
                EntityKind::Function,
                lang,
                file_path,
                repo_name,
                line_no,
                line,
                format!("const {} = () =>", name),
                None,
            ));
            continue;
        }

        if let Some(class_name) = current_class.clone() {
            if let Some(caps) = METHOD_RE.captures(line) {
                let name = caps[1].to_string();
                if !matches!(name.as_str(), "if" | "for" | "while" | "switch" | "catch") {
                    entities.push(line_entity(
                        &name,
                        EntityKind::Method,
                        lang,
                        file_path,
                        repo_name,
                        line_no,
                        line,
                        format!("{}()", name),
                        Some(class_name),
                    ));
                }
            }
        }

        if line.trim() == "}" {
            current_class = None;
        }
    }

    entities
}

#[allow(clippy::too_many_arguments)]
fn line_entity(
    name: &str,
    kind: EntityKind,
    lang: Language,
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
        language: lang,
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
