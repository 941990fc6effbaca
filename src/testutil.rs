//! Shared test fixtures

use crate::models::{CodeEntity, EntityKind, Language};
use chrono::Utc;

/// Minimal Python entity for index and ranking tests.
pub(crate) fn entity(name: &str, kind: EntityKind) -> CodeEntity {
    entity_in("repo", "src/lib.py", name, kind)
}

/// Entity with explicit repo and path, for filter and boost tests.
pub(crate) fn entity_in(repo: &str, path: &str, name: &str, kind: EntityKind) -> CodeEntity {
    CodeEntity {
        id: CodeEntity::make_id(repo, path, 1, name, kind),
        name: name.to_string(),
        kind,
        language: Language::Python,
        file_path: path.to_string(),
        repo_name: repo.to_string(),
        start_line: 1,
        end_line: 3,
        source_code: format!("def {}():\n    pass\n", name),
        docstring: None,
        signature: None,
        parameters: Vec::new(),
        return_type: None,
        decorators: Vec::new(),
        parent_class: None,
        complexity: Some(1),
        loc: 3,
        created_at: Utc::now(),
    }
}

/// Entity whose docstring/signature carry the given text, to steer BM25.
pub(crate) fn entity_with_doc(name: &str, doc: &str) -> CodeEntity {
    let mut e = entity(name, EntityKind::Function);
    e.docstring = Some(doc.to_string());
    e.signature = Some(format!("def {}()", name));
    e
}
