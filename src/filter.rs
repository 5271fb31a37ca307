use regex::{Regex, RegexBuilder};

use crate::model::Tag;

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    /// Lower-cased needle used when the query is not a valid regex.
    Literal(String),
}

#[derive(Debug, Clone, Default)]
pub struct TileFilter {
    query: String,
    matcher: Option<Matcher>,
}

impl TileFilter {
    pub fn new(query: &str) -> Self {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        let matcher = match RegexBuilder::new(trimmed).case_insensitive(true).build() {
            Ok(regex) => Matcher::Pattern(regex),
            Err(err) => {
                tracing::debug!(%err, "filter is not a regex, matching literally");
                Matcher::Literal(trimmed.to_lowercase())
            }
        };
        Self {
            query: trimmed.to_string(),
            matcher: Some(matcher),
        }
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_active(&self) -> bool {
        self.matcher.is_some()
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.matcher, Some(Matcher::Literal(_)))
    }

    pub fn matches(&self, tag: &Tag) -> bool {
        let Some(matcher) = &self.matcher else {
            return true;
        };
        let fields = [&tag.epc, &tag.pc_bits, &tag.read_data];
        match matcher {
            Matcher::Pattern(regex) => fields.iter().any(|field| regex.is_match(field)),
            Matcher::Literal(needle) => fields
                .iter()
                .any(|field| field.to_lowercase().contains(needle.as_str())),
        }
    }
}
