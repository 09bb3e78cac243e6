use anyhow::bail;
use regex::Regex;

use crate::{config::sync_config::SyncRule, error::Error};

const EXCLUDE_PATTERN: &str = r"mysql\..*";

/// Decides which `schema.table` names the pipeline acts on: the union of the
/// configured sync tables, minus the mysql system schema.
#[derive(Clone, Debug)]
pub struct TableFilter {
    include: Regex,
    exclude: Regex,
}

impl TableFilter {
    pub fn from_rules(database: &str, rules: &[SyncRule]) -> anyhow::Result<Self> {
        let include_pattern = Self::build_include_pattern(database, rules);
        if include_pattern.is_empty() {
            bail! {Error::ConfigError("table filter requires at least one sync rule".into())}
        }

        let include = Regex::new(&format!("^(?:{})$", include_pattern))
            .map_err(|e| Error::ConfigError(format!("bad include pattern: {}", e)))?;
        let exclude = Regex::new(EXCLUDE_PATTERN)
            .map_err(|e| Error::ConfigError(format!("bad exclude pattern: {}", e)))?;
        Ok(Self { include, exclude })
    }

    pub fn build_include_pattern(database: &str, rules: &[SyncRule]) -> String {
        rules
            .iter()
            .map(|rule| format!("{}\\.{}", regex::escape(database), regex::escape(&rule.source)))
            .collect::<Vec<String>>()
            .join("|")
    }

    pub fn matches(&self, schema: &str, tb: &str) -> bool {
        let name = format!("{}.{}", schema, tb);
        self.include.is_match(&name) && !self.exclude.is_match(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(source: &str) -> SyncRule {
        SyncRule {
            source: source.to_string(),
            index: format!("{}_idx", source),
            primary_key: "id".to_string(),
            fields: Vec::new(),
        }
    }

    #[test]
    fn test_include_pattern_is_union_of_tables() {
        let rules = vec![rule("books"), rule("users")];
        assert_eq!(
            TableFilter::build_include_pattern("app", &rules),
            r"app\.books|app\.users"
        );
    }

    #[test]
    fn test_matches_only_configured_tables() {
        let rules = vec![rule("books"), rule("users")];
        let filter = TableFilter::from_rules("app", &rules).unwrap();

        assert!(filter.matches("app", "books"));
        assert!(filter.matches("app", "users"));
        assert!(!filter.matches("app", "orders"));
        assert!(!filter.matches("other", "books"));
        // no substring matches
        assert!(!filter.matches("app", "books_archive"));
    }

    #[test]
    fn test_mysql_schema_is_excluded() {
        let rules = vec![rule("user")];
        let filter = TableFilter::from_rules("mysql", &rules).unwrap();
        assert!(!filter.matches("mysql", "user"));
    }

    #[test]
    fn test_empty_rules_is_an_error() {
        assert!(TableFilter::from_rules("app", &[]).is_err());
    }
}
