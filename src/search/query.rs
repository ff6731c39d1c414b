/// Advanced keyword query grammar
///
/// Parses a web-search style query into a typed clause list and compiles it to a
/// PostgreSQL tsquery expression whose user-supplied text only ever travels as
/// bound parameters.
///
/// Grammar:
///   "some phrase"   exact phrase, required
///   +term           required term (also +"phrase")
///   -term           excluded term (also -"phrase"); overrides any positive match
///   term            optional term; bare terms are OR-ed, at least one must match
///   OR              accepted and ignored, bare terms are already disjunctive

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Text search configuration used for every tsquery built by this module.
pub const TS_CONFIG: &str = "english";

/// A single leaf of the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clause {
    Term(String),
    Phrase(String),
}

impl Clause {
    pub fn text(&self) -> &str {
        match self {
            Clause::Term(t) | Clause::Phrase(t) => t,
        }
    }

    fn to_sql(&self, param: usize) -> String {
        match self {
            Clause::Term(_) => format!("plainto_tsquery('{}', ${})", TS_CONFIG, param),
            Clause::Phrase(_) => format!("phraseto_tsquery('{}', ${})", TS_CONFIG, param),
        }
    }
}

/// Parsed advanced query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    /// Every one of these must match
    pub required: Vec<Clause>,
    /// At least one of these must match (when non-empty)
    pub optional: Vec<Clause>,
    /// None of these may match
    pub excluded: Vec<Clause>,
}

/// A tsquery SQL expression plus the parameters it references, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTsQuery {
    pub expr: String,
    pub params: Vec<String>,
}

/// Keyword query handed to the document store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeywordQuery {
    /// All words must match (`plainto_tsquery`)
    Plain(String),
    Advanced(ParsedQuery),
}

impl KeywordQuery {
    /// True when the query cannot match anything, so the store need not be asked.
    pub fn is_empty(&self) -> bool {
        match self {
            KeywordQuery::Plain(text) => text.trim().is_empty(),
            KeywordQuery::Advanced(parsed) => !parsed.has_positive_clause(),
        }
    }

    /// Compile to a tsquery expression with parameters numbered from `first_param`.
    ///
    /// Returns None for an empty query.
    pub fn compile(&self, first_param: usize) -> Option<CompiledTsQuery> {
        match self {
            KeywordQuery::Plain(text) if text.trim().is_empty() => None,
            KeywordQuery::Plain(text) => Some(CompiledTsQuery {
                expr: format!("plainto_tsquery('{}', ${})", TS_CONFIG, first_param),
                params: vec![text.clone()],
            }),
            KeywordQuery::Advanced(parsed) => parsed.compile(first_param),
        }
    }
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Group 1: sign before a quote, group 2: quoted text (closing quote optional), group 3: bare token
    RE.get_or_init(|| {
        Regex::new(r#"([+-]?)"([^"]*)"?|(\S+)"#).expect("token pattern is valid")
    })
}

/// Parse advanced query text into clauses.
pub fn parse(input: &str) -> ParsedQuery {
    let mut parsed = ParsedQuery::default();

    for caps in token_regex().captures_iter(input) {
        if let Some(phrase) = caps.get(2) {
            let text = phrase.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                continue;
            }
            let clause = Clause::Phrase(text);
            match caps.get(1).map(|m| m.as_str()) {
                Some("-") => parsed.excluded.push(clause),
                _ => parsed.required.push(clause),
            }
            continue;
        }

        let Some(token) = caps.get(3).map(|m| m.as_str()) else {
            continue;
        };
        if token == "OR" {
            continue;
        }
        if let Some(rest) = token.strip_prefix('-') {
            if !rest.is_empty() {
                parsed.excluded.push(Clause::Term(rest.to_string()));
            }
        } else if let Some(rest) = token.strip_prefix('+') {
            if !rest.is_empty() {
                parsed.required.push(Clause::Term(rest.to_string()));
            }
        } else {
            parsed.optional.push(Clause::Term(token.to_string()));
        }
    }

    parsed
}

impl ParsedQuery {
    pub fn has_positive_clause(&self) -> bool {
        !self.required.is_empty() || !self.optional.is_empty()
    }

    /// Compile to `required && ... && (optional || ...) && !!(excluded) && ...`.
    pub fn compile(&self, first_param: usize) -> Option<CompiledTsQuery> {
        if !self.has_positive_clause() {
            return None;
        }

        let mut params = Vec::new();
        let mut next = first_param;
        let mut bind = |clause: &Clause, params: &mut Vec<String>| {
            params.push(clause.text().to_string());
            let sql = clause.to_sql(next);
            next += 1;
            sql
        };

        let mut parts: Vec<String> = Vec::new();
        for clause in &self.required {
            parts.push(bind(clause, &mut params));
        }
        if !self.optional.is_empty() {
            let any: Vec<String> = self.optional.iter().map(|c| bind(c, &mut params)).collect();
            parts.push(format!("({})", any.join(" || ")));
        }
        for clause in &self.excluded {
            parts.push(format!("!!({})", bind(clause, &mut params)));
        }

        Some(CompiledTsQuery {
            expr: format!("({})", parts.join(" && ")),
            params,
        })
    }
}
