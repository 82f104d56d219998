//! `only` filters: narrow a generated matrix down to matching posters.
//!
//! A filter is written `field:pattern` or just `pattern`. Both sides are
//! case-insensitive globs (`*` any run of characters, `?` one character).
//! The field side is resolved against [`PosterDescriptor::FIELD_NAMES`] when
//! the filter is parsed, so a typo fails before any request is sent instead
//! of silently matching nothing.
//!
//! ```text
//! mapStyle:petrol        one field, exact value
//! *Style:bw              posterStyle or mapStyle equal to bw
//! size:*inch             every inch-sized poster
//! tokyo*                 any field starting with tokyo
//! ```

use crate::error::SnapshotError;
use crate::poster::PosterDescriptor;
use regex::Regex;

/// One `field:pattern` constraint.
#[derive(Debug, Clone)]
pub struct FieldPattern {
    source: String,
    fields: Vec<&'static str>,
    value: Regex,
}

impl FieldPattern {
    pub fn parse(raw: &str) -> Result<Self, SnapshotError> {
        let (field_glob, value_glob) = match raw.split_once(':') {
            Some((field, value)) => (field, value),
            None => ("**", raw),
        };

        let field_re = glob_to_regex(field_glob, raw)?;
        let fields: Vec<&'static str> = PosterDescriptor::FIELD_NAMES
            .iter()
            .copied()
            .filter(|name| field_re.is_match(name))
            .collect();
        if fields.is_empty() {
            return Err(SnapshotError::InvalidFilter {
                pattern: raw.to_string(),
                reason: format!(
                    "'{}' matches no poster field (known: {})",
                    field_glob,
                    PosterDescriptor::FIELD_NAMES.join(", ")
                ),
            });
        }

        Ok(Self {
            source: raw.to_string(),
            fields,
            value: glob_to_regex(value_glob, raw)?,
        })
    }

    pub fn matches(&self, poster: &PosterDescriptor) -> bool {
        self.fields.iter().any(|name| {
            poster
                .field(name)
                .is_some_and(|value| self.value.is_match(&value))
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

/// Conjunction of [`FieldPattern`]s. Empty matches everything.
#[derive(Debug, Clone, Default)]
pub struct PosterFilter {
    patterns: Vec<FieldPattern>,
}

impl PosterFilter {
    pub fn parse<S: AsRef<str>>(exprs: &[S]) -> Result<Self, SnapshotError> {
        let patterns = exprs
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty() && *s != "**")
            .map(FieldPattern::parse)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn matches(&self, poster: &PosterDescriptor) -> bool {
        self.patterns.iter().all(|p| p.matches(poster))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn apply(&self, posters: Vec<PosterDescriptor>) -> Vec<PosterDescriptor> {
        if self.is_empty() {
            return posters;
        }
        posters.into_iter().filter(|p| self.matches(p)).collect()
    }
}

fn glob_to_regex(glob: &str, raw: &str) -> Result<Regex, SnapshotError> {
    let mut pattern = String::from("(?i)^");
    for ch in glob.chars() {
        match ch {
            '*' => {
                if !pattern.ends_with(".*") {
                    pattern.push_str(".*");
                }
            }
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    Regex::new(&pattern).map_err(|e| SnapshotError::InvalidFilter {
        pattern: raw.to_string(),
        reason: e.to_string(),
    })
}
