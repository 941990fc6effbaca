//! Domain boost rules
//!
//! A boost table is a list of multiplicative rules keyed on a path substring
//! and a name predicate, evaluated in order with first match winning. The
//! table fires only when the original query contains one of its trigger
//! terms; otherwise every multiplier is 1.0. Boosts are pure functions of
//! (query, file_path, name).

/// Predicate over the lowercased entity name
#[derive(Debug, Clone)]
pub enum NameMatch {
    /// Name equals one of the listed values
    OneOf(&'static [&'static str]),
    /// Name contains the substring
    Contains(&'static str),
    /// Name starts with one of the listed prefixes
    StartsWithAny(&'static [&'static str]),
    /// Any name
    Any,
}

impl NameMatch {
    fn matches(&self, name: &str) -> bool {
        match self {
            Self::OneOf(values) => values.contains(&name),
            Self::Contains(needle) => name.contains(needle),
            Self::StartsWithAny(prefixes) => prefixes.iter().any(|p| name.starts_with(p)),
            Self::Any => true,
        }
    }
}

/// One multiplicative rule
#[derive(Debug, Clone)]
pub struct BoostRule {
    /// Substring the lowercased file path must contain (None matches any)
    pub path_contains: Option<&'static str>,
    pub name: NameMatch,
    pub multiplier: f32,
}

impl BoostRule {
    fn matches(&self, path: &str, name: &str) -> bool {
        if let Some(needle) = self.path_contains {
            if !path.contains(needle) {
                return false;
            }
        }
        self.name.matches(name)
    }
}

/// An ordered rule table gated on query trigger terms.
#[derive(Debug, Clone)]
pub struct BoostTable {
    trigger_terms: &'static [&'static str],
    rules: Vec<BoostRule>,
}

impl BoostTable {
    pub fn new(trigger_terms: &'static [&'static str], rules: Vec<BoostRule>) -> Self {
        Self {
            trigger_terms,
            rules,
        }
    }

    /// The built-in HTTP table: favors real request functions over handlers
    /// and tests when the query is about HTTP.
    pub fn http_default() -> Self {
        Self::new(
            &["http", "request", "api"],
            vec![
                BoostRule {
                    path_contains: Some("api.py"),
                    name: NameMatch::OneOf(&[
                        "request", "get", "post", "put", "patch", "delete", "head", "options",
                    ]),
                    multiplier: 1.5,
                },
                // anything else in api.py keeps its score, shielded from the
                // handler penalty below
                BoostRule {
                    path_contains: Some("api.py"),
                    name: NameMatch::Any,
                    multiplier: 1.0,
                },
                BoostRule {
                    path_contains: Some("sessions.py"),
                    name: NameMatch::Contains("send"),
                    multiplier: 1.5,
                },
                BoostRule {
                    path_contains: Some("adapters.py"),
                    name: NameMatch::Contains("send"),
                    multiplier: 1.3,
                },
                BoostRule {
                    path_contains: None,
                    name: NameMatch::StartsWithAny(&["handle_", "test_"]),
                    multiplier: 0.7,
                },
            ],
        )
    }

    /// Whether this table fires for the given original query.
    pub fn applies_to(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.trigger_terms.iter().any(|t| query.contains(t))
    }

    /// Multiplier for an entity, first matching rule wins. 1.0 when nothing
    /// matches.
    pub fn multiplier(&self, file_path: &str, name: &str) -> f32 {
        let path = file_path.to_lowercase();
        let name = name.to_lowercase();
        for rule in &self.rules {
            if rule.matches(&path, &name) {
                return rule.multiplier;
            }
        }
        1.0
    }
}

impl Default for BoostTable {
    fn default() -> Self {
        Self::http_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_terms() {
        let table = BoostTable::http_default();
        assert!(table.applies_to("send HTTP request"));
        assert!(table.applies_to("call the API"));
        assert!(!table.applies_to("parse json config"));
    }

    #[test]
    fn test_api_py_verbs_boosted() {
        let table = BoostTable::http_default();
        assert_eq!(table.multiplier("requests/api.py", "get"), 1.5);
        assert_eq!(table.multiplier("requests/api.py", "request"), 1.5);
        // other names in api.py are shielded, not penalized
        assert_eq!(table.multiplier("requests/api.py", "handle_thing"), 1.0);
    }

    #[test]
    fn test_send_rules() {
        let table = BoostTable::http_default();
        assert_eq!(table.multiplier("requests/sessions.py", "send"), 1.5);
        assert_eq!(table.multiplier("requests/adapters.py", "send_request"), 1.3);
    }

    #[test]
    fn test_handler_and_test_penalty() {
        let table = BoostTable::http_default();
        assert_eq!(table.multiplier("app/views.py", "handle_request"), 0.7);
        assert_eq!(table.multiplier("tests/x.py", "test_get"), 0.7);
    }

    #[test]
    fn test_default_multiplier() {
        let table = BoostTable::http_default();
        assert_eq!(table.multiplier("app/core.py", "process"), 1.0);
    }

    #[test]
    fn test_case_insensitive() {
        let table = BoostTable::http_default();
        assert_eq!(table.multiplier("Requests/API.PY", "GET"), 1.5);
    }
}
