// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Placeholder rebinding.
//!
//! Every repository authors SQL with bare `?` placeholders. [`rebind`]
//! translates a query to the active dialect at execution time:
//!
//! | dialect  | placeholder |
//! |----------|-------------|
//! | SQLite   | `?` (unchanged) |
//! | Postgres | `$1`, `$2`, … in argument order |
//!
//! Dialect-native placeholders (`?1`, `$1`, named `:x`) are rejected — the
//! whole point is that they never appear in repositories, so one slipping
//! through is a bug worth failing loudly on. String literals and quoted
//! identifiers are skipped, so a `?` inside `'...'` is left alone.

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Rebind `?` placeholders in `sql` for `dialect`, returning the effective
/// SQL and the number of placeholders found.
pub fn rebind(dialect: Dialect, sql: &str) -> Result<(String, usize), StoreError> {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0usize;
    let mut chars = sql.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            // Single-quoted string literal; '' escapes a quote.
            '\'' | '"' => {
                let quote = c;
                out.push(c);
                while let Some((_, inner)) = chars.next() {
                    out.push(inner);
                    if inner == quote {
                        if chars.peek().map(|&(_, next)| next) == Some(quote) {
                            let (_, next) = chars.next().expect("peeked");
                            out.push(next);
                        } else {
                            break;
                        }
                    }
                }
            }
            '?' => {
                if matches!(chars.peek(), Some(&(_, '0'..='9'))) {
                    return Err(StoreError::ForbiddenPlaceholder(snippet(sql, i)));
                }
                n += 1;
                match dialect {
                    Dialect::Sqlite => out.push('?'),
                    Dialect::Postgres => {
                        out.push('$');
                        out.push_str(&n.to_string());
                    }
                }
            }
            '$' => {
                if matches!(chars.peek(), Some(&(_, '0'..='9'))) {
                    return Err(StoreError::ForbiddenPlaceholder(snippet(sql, i)));
                }
                out.push(c);
            }
            ':' => {
                // `::` casts are fine; `:name` bindings are not.
                if matches!(chars.peek(), Some(&(_, ':'))) {
                    chars.next();
                    out.push_str("::");
                } else if matches!(chars.peek(), Some(&(_, 'a'..='z' | 'A'..='Z' | '_'))) {
                    return Err(StoreError::ForbiddenPlaceholder(snippet(sql, i)));
                } else {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }

    Ok((out, n))
}

fn snippet(sql: &str, at: usize) -> String {
    let end = sql.len().min(at + 12);
    format!("…{}", &sql[at..end])
}

// ── Unit tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_is_identity_for_plain_placeholders() {
        let (sql, n) = rebind(Dialect::Sqlite, "SELECT * FROM users WHERE id = ?").unwrap();
        assert_eq!(sql, "SELECT * FROM users WHERE id = ?");
        assert_eq!(n, 1);
    }

    #[test]
    fn postgres_numbers_in_order() {
        let (sql, n) = rebind(
            Dialect::Postgres,
            "UPDATE characters SET name = ?, level = ? WHERE id = ?",
        )
        .unwrap();
        assert_eq!(sql, "UPDATE characters SET name = $1, level = $2 WHERE id = $3");
        assert_eq!(n, 3);
    }

    #[test]
    fn question_mark_in_string_literal_untouched() {
        let (sql, n) = rebind(
            Dialect::Postgres,
            "SELECT * FROM t WHERE note = 'why?' AND id = ?",
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE note = 'why?' AND id = $1");
        assert_eq!(n, 1);
    }

    #[test]
    fn escaped_quote_inside_literal_handled() {
        let (sql, _) = rebind(
            Dialect::Postgres,
            "SELECT * FROM t WHERE name = 'it''s?' AND id = ?",
        )
        .unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE name = 'it''s?' AND id = $1");
    }

    #[test]
    fn native_sqlite_numbered_placeholder_rejected() {
        let err = rebind(Dialect::Sqlite, "SELECT * FROM t WHERE id = ?1").unwrap_err();
        assert!(matches!(err, StoreError::ForbiddenPlaceholder(_)));
    }

    #[test]
    fn native_postgres_placeholder_rejected() {
        let err = rebind(Dialect::Postgres, "SELECT * FROM t WHERE id = $1").unwrap_err();
        assert!(matches!(err, StoreError::ForbiddenPlaceholder(_)));
    }

    #[test]
    fn named_placeholder_rejected_but_casts_allowed() {
        assert!(rebind(Dialect::Postgres, "SELECT :name").is_err());
        let (sql, _) = rebind(Dialect::Postgres, "SELECT created_at::date FROM t").unwrap();
        assert_eq!(sql, "SELECT created_at::date FROM t");
    }

    #[test]
    fn no_placeholders_is_fine() {
        let (sql, n) = rebind(Dialect::Postgres, "SELECT 1").unwrap();
        assert_eq!(sql, "SELECT 1");
        assert_eq!(n, 0);
    }

    #[test]
    fn round_trip_same_shape_across_dialects() {
        // The rebind round-trip property: the same source SQL yields an
        // executable statement on both dialects with identical placeholder
        // arity.
        let src = "SELECT id FROM dice_rolls WHERE session_id = ? AND created_at > ? LIMIT ?";
        let (_, sqlite_n) = rebind(Dialect::Sqlite, src).unwrap();
        let (pg, pg_n) = rebind(Dialect::Postgres, src).unwrap();
        assert_eq!(sqlite_n, pg_n);
        assert!(pg.contains("$3"));
    }
}
