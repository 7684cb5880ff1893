//! SQL dialects.
//!
//! A [`Dialect`] captures the few points where target databases differ in
//! the text the renderer emits: identifier quoting, placeholder spelling,
//! paging syntax and string concatenation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How bound parameters are spelled in command text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?`
    Positional,
    /// `$1`, `$2`, ...
    Dollar,
    /// `?1`, `?2`, ...
    QuestionNumbered,
    /// `@name`
    Named,
}

/// How LIMIT/OFFSET is spelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingStyle {
    /// `LIMIT n OFFSET m`
    LimitOffset,
    /// `OFFSET m ROWS FETCH NEXT n ROWS ONLY`, which requires an ORDER BY
    OffsetFetch,
}

/// Rendering strategy for one database family
pub trait Dialect: Send + Sync {
    /// Unique name for this dialect
    fn name(&self) -> &str;

    fn quote_char(&self) -> char {
        '"'
    }

    fn placeholder_style(&self) -> PlaceholderStyle;

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::LimitOffset
    }

    fn concat_operator(&self) -> &'static str {
        "||"
    }

    /// Whether `OFFSET` may only appear after a `LIMIT`
    fn offset_requires_limit(&self) -> bool {
        false
    }

    /// Placeholder for the parameter at 1-based `position` named `name`
    fn placeholder(&self, position: usize, name: &str) -> String {
        match self.placeholder_style() {
            PlaceholderStyle::Positional => "?".to_string(),
            PlaceholderStyle::Dollar => format!("${}", position),
            PlaceholderStyle::QuestionNumbered => format!("?{}", position),
            PlaceholderStyle::Named => format!("@{}", name),
        }
    }

    fn quote_identifier(&self, ident: &str) -> String {
        quote_identifier(ident, self.quote_char())
    }
}

/// PostgreSQL: `$n` placeholders
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &str {
        "postgres"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Dollar
    }
}

/// SQLite: `?n` placeholders; OFFSET needs a LIMIT (`LIMIT -1` means none)
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionNumbered
    }

    fn offset_requires_limit(&self) -> bool {
        true
    }
}

/// SQL Server: `@name` placeholders, `+` concatenation, OFFSET/FETCH paging
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServer;

impl Dialect for SqlServer {
    fn name(&self) -> &str {
        "sqlserver"
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Named
    }

    fn paging_style(&self) -> PagingStyle {
        PagingStyle::OffsetFetch
    }

    fn concat_operator(&self) -> &'static str {
        "+"
    }
}

/// Dialect selector used by configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    #[default]
    Postgres,
    Sqlite,
    SqlServer,
}

impl DialectKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            Self::Postgres => &Postgres,
            Self::Sqlite => &Sqlite,
            Self::SqlServer => &SqlServer,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dialect().name())
    }
}

/// Wrap `ident` in `quote`, doubling any embedded quote characters
pub fn quote_identifier(ident: &str, quote: char) -> String {
    let mut out = String::with_capacity(ident.len() + 2);
    out.push(quote);
    for c in ident.chars() {
        if c == quote {
            out.push(quote);
        }
        out.push(c);
    }
    out.push(quote);
    out
}

/// Inverse of [`quote_identifier`]; `None` if `text` is not a well-formed quoted identifier
pub fn unquote_identifier(text: &str, quote: char) -> Option<String> {
    let inner = text.strip_prefix(quote)?.strip_suffix(quote)?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == quote {
            // An embedded quote must be doubled
            if chars.next() != Some(quote) {
                return None;
            }
        }
        out.push(c);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("User", r#""User""# ; "plain")]
    #[test_case(r#"we"ird"#, r#""we""ird""# ; "embedded quote")]
    #[test_case("", r#""""# ; "empty")]
    fn test_quote_round_trip(name: &str, quoted: &str) {
        assert_eq!(quote_identifier(name, '"'), quoted);
        assert_eq!(unquote_identifier(quoted, '"').as_deref(), Some(name));
    }

    #[test_case(r#"User"# ; "unquoted")]
    #[test_case(r#""a"b""# ; "lone inner quote")]
    #[test_case(r#"""# ; "single quote char")]
    fn test_unquote_rejects_malformed(text: &str) {
        assert_eq!(unquote_identifier(text, '"'), None);
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Postgres.placeholder(3, "Name"), "$3");
        assert_eq!(Sqlite.placeholder(3, "Name"), "?3");
        assert_eq!(SqlServer.placeholder(3, "Name"), "@Name");
    }

    #[test]
    fn test_dialect_kind_from_config_names() {
        #[derive(Deserialize)]
        struct Wrapper {
            dialect: DialectKind,
        }

        let parsed: Wrapper = toml::from_str(r#"dialect = "sqlserver""#).unwrap();
        assert_eq!(parsed.dialect, DialectKind::SqlServer);
        assert_eq!(DialectKind::default().to_string(), "postgres");
    }
}
