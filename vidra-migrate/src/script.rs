//! Versioned migration scripts.
//!
//! Scripts follow the `V<version>__<description>.sql` naming convention the
//! platform has always used: `V1__create_category.sql`,
//! `V7__add_video_rating.sql`. The version token orders the repository; the
//! description is only for humans. A script is immutable once applied -
//! editing it afterwards shows up as checksum drift, not as a new revision.

use std::fmt;

use crate::checksum;
use crate::error::{MigrateError, Result};

/// Strictly ordered version token of a migration script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(pub i64);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single, versioned, immutable unit of schema change.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub version: Version,
    pub description: String,
    /// Raw SQL as authored, checksummed verbatim.
    pub content: String,
    pub checksum: String,
    /// Where the script came from, for diagnostics only.
    pub origin: String,
}

impl MigrationScript {
    /// Builds a script from already-separated parts, validating that the
    /// content splits into at least one executable statement.
    pub fn new(
        version: Version,
        description: impl Into<String>,
        content: impl Into<String>,
        origin: impl Into<String>,
    ) -> Result<Self> {
        let content = content.into();
        let origin = origin.into();
        // Surface unterminated quotes and empty files at discovery time, not
        // halfway through an apply run.
        let statements = split_statements(&content, &origin)?;
        if statements.is_empty() {
            return Err(MigrateError::MalformedScript {
                name: origin,
                reason: "script contains no executable statements".into(),
            });
        }
        let checksum = checksum::fingerprint(&content);
        Ok(Self {
            version,
            description: description.into(),
            content,
            checksum,
            origin,
        })
    }

    /// Parses a `V<version>__<description>.sql` file name.
    pub fn from_file_name(name: &str, content: impl Into<String>) -> Result<Self> {
        let (version, description) = parse_file_name(name)?;
        Self::new(version, description, content, name)
    }

    /// The script's executable statements, in authored order.
    pub fn statements(&self) -> Result<Vec<String>> {
        split_statements(&self.content, &self.origin)
    }
}

fn malformed(name: &str, reason: impl Into<String>) -> MigrateError {
    MigrateError::MalformedScript {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Splits `V3__add_genre_table.sql` into `(Version(3), "add genre table")`.
pub fn parse_file_name(name: &str) -> Result<(Version, String)> {
    let stem = name
        .strip_suffix(".sql")
        .ok_or_else(|| malformed(name, "expected a `.sql` extension"))?;
    let rest = stem
        .strip_prefix('V')
        .ok_or_else(|| malformed(name, "expected a `V<version>__<description>` prefix"))?;
    let (version, description) = rest
        .split_once("__")
        .ok_or_else(|| malformed(name, "missing `__` separator after version token"))?;
    let version: i64 = version
        .parse()
        .map_err(|_| malformed(name, format!("version token `{version}` is not an integer")))?;
    if version <= 0 {
        return Err(malformed(name, "version token must be positive"));
    }
    if description.is_empty() {
        return Err(malformed(name, "description must not be empty"));
    }
    Ok((Version(version), description.replace('_', " ")))
}

/// Splits raw SQL into individual statements on top-level semicolons.
///
/// Understands `--` line comments, `/* */` block comments, single-quoted
/// strings with `''` escapes, double-quoted identifiers, and dollar-quoted
/// bodies (`$$ ... $$`, `$fn$ ... $fn$`), so function bodies survive intact.
pub fn split_statements(content: &str, name: &str) -> Result<Vec<String>> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = content.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        match ch {
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                // Line comment: skip to end of line, keep nothing.
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                // Block comments nest in PostgreSQL.
                let mut depth = 1usize;
                let mut prev = '\0';
                for (_, c) in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                        prev = '\0';
                    } else if prev == '/' && c == '*' {
                        depth += 1;
                        prev = '\0';
                    } else {
                        prev = c;
                    }
                }
                if depth != 0 {
                    return Err(malformed(name, "unterminated block comment"));
                }
            }
            '\'' | '"' => {
                current.push(ch);
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    current.push(c);
                    if c == ch {
                        // '' inside a single-quoted string is an escape.
                        if ch == '\'' && matches!(chars.peek(), Some((_, '\'')))
                            && let Some((_, esc)) = chars.next()
                        {
                            current.push(esc);
                            continue;
                        }
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(malformed(name, "unterminated quoted literal"));
                }
            }
            '$' => {
                // Possible dollar-quote opener: $tag$ where tag is [A-Za-z0-9_]*.
                let tag_end = content[idx + 1..]
                    .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                    .map(|off| idx + 1 + off);
                match tag_end {
                    Some(end) if content[end..].starts_with('$') => {
                        let delim = &content[idx..=end];
                        current.push_str(delim);
                        for _ in 0..delim.chars().count() - 1 {
                            chars.next();
                        }
                        let body_start = end + 1;
                        match content[body_start..].find(delim) {
                            Some(off) => {
                                let close_end = body_start + off + delim.len();
                                current.push_str(&content[body_start..close_end]);
                                while let Some((i, _)) = chars.peek().copied() {
                                    if i >= close_end {
                                        break;
                                    }
                                    chars.next();
                                }
                            }
                            None => {
                                return Err(malformed(name, "unterminated dollar-quoted body"));
                            }
                        }
                    }
                    _ => current.push(ch),
                }
            }
            ';' => {
                let stmt = current.trim();
                if !stmt.is_empty() {
                    statements.push(stmt.to_string());
                }
                current.clear();
            }
            _ => current.push(ch),
        }
    }

    let trailing = current.trim();
    if !trailing.is_empty() {
        statements.push(trailing.to_string());
    }
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_conventional_file_names() {
        let (version, description) = parse_file_name("V1__create_category_table.sql").unwrap();
        assert_eq!(version, Version(1));
        assert_eq!(description, "create category table");

        let (version, _) = parse_file_name("V20240301__seed_plans.sql").unwrap();
        assert_eq!(version, Version(20_240_301));
    }

    #[test]
    fn rejects_unconventional_file_names() {
        for name in [
            "create_category.sql",
            "V__no_version.sql",
            "V1_missing_separator.sql",
            "V1__.sql",
            "V0__zero.sql",
            "V1__not_sql.txt",
        ] {
            assert!(parse_file_name(name).is_err(), "accepted {name}");
        }
    }

    #[test]
    fn splits_plain_statements() {
        let sql = "CREATE TABLE a (id INT);\nCREATE TABLE b (id INT);";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE TABLE a"));
    }

    #[test]
    fn semicolons_in_literals_do_not_split() {
        let sql = "INSERT INTO genre (name) VALUES ('action; adventure');";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 1);
    }

    #[test]
    fn escaped_quotes_survive() {
        let sql = "INSERT INTO genre (name) VALUES ('it''s; fine');";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("it''s; fine"));
    }

    #[test]
    fn comments_are_stripped() {
        let sql = "-- leading comment\nCREATE TABLE a (id INT); /* block;\ncomment */ CREATE TABLE b (id INT);";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn dollar_quoted_bodies_stay_whole() {
        let sql = "CREATE FUNCTION touch() RETURNS trigger AS $fn$\nBEGIN\n  NEW.updated_at = now();\n  RETURN NEW;\nEND;\n$fn$ LANGUAGE plpgsql;";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(stmts[0].contains("RETURN NEW;"));
    }

    #[test]
    fn nested_block_comments_close_at_matching_depth() {
        let sql = "/* outer /* inner; */ still comment */ CREATE TABLE a (id INT);";
        let stmts = split_statements(sql, "test").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(!stmts[0].contains("comment"));
        assert!(stmts[0].starts_with("CREATE TABLE a"));
    }

    #[test]
    fn unterminated_constructs_are_malformed() {
        assert!(split_statements("SELECT 'oops", "t").is_err());
        assert!(split_statements("/* never closed", "t").is_err());
        assert!(split_statements("/* outer /* inner */ dangling", "t").is_err());
        assert!(split_statements("SELECT $body$ dangling", "t").is_err());
    }

    #[test]
    fn empty_scripts_are_malformed() {
        let err = MigrationScript::from_file_name("V1__empty.sql", "-- nothing here\n");
        assert!(matches!(
            err,
            Err(MigrateError::MalformedScript { .. })
        ));
    }

    #[test]
    fn checksum_tracks_content() {
        let a = MigrationScript::from_file_name("V1__a.sql", "SELECT 1;").unwrap();
        let b = MigrationScript::from_file_name("V1__a.sql", "SELECT 2;").unwrap();
        assert_ne!(a.checksum, b.checksum);
    }
}
