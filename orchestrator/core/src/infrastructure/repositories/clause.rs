// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Partial Clause Compilation
//!
//! Turns an authorization [`PartialClause`] into storage filters:
//!
//! - [`push_filter`] appends it to a `sqlx::QueryBuilder`, binding every `?`
//!   placeholder as a query parameter.
//! - [`ClauseMatcher`] evaluates the `column = ?` conjunct subset in memory.

use sqlx::{Postgres, QueryBuilder};

use crate::domain::authorization::{ClauseValue, PartialClause};
use crate::domain::repository::RepositoryError;

/// Append ` AND (<clause>)` to `builder`. Empty clauses append nothing.
pub fn push_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    clause: &PartialClause,
) -> Result<(), RepositoryError> {
    if clause.is_empty() {
        return Ok(());
    }

    let fragments: Vec<&str> = clause.condition.split('?').collect();
    if fragments.len() != clause.args.len() + 1 {
        return Err(RepositoryError::InvalidFilter(format!(
            "'{}' expects {} arguments, got {}",
            clause.condition,
            fragments.len() - 1,
            clause.args.len()
        )));
    }

    builder.push(" AND (");
    for (fragment, arg) in fragments.iter().zip(clause.args.iter()) {
        builder.push(*fragment);
        match arg {
            ClauseValue::Uuid(v) => builder.push_bind(*v),
            ClauseValue::Int(v) => builder.push_bind(*v),
            ClauseValue::Text(v) => builder.push_bind(v.clone()),
        };
    }
    if let Some(last) = fragments.last() {
        builder.push(*last);
    }
    builder.push(")");
    Ok(())
}

/// In-memory evaluation of clauses made of `column = ?` conjuncts.
#[derive(Debug, Clone, Default)]
pub struct ClauseMatcher {
    terms: Vec<(String, ClauseValue)>,
}

impl ClauseMatcher {
    pub fn compile(clause: &PartialClause) -> Result<Self, RepositoryError> {
        if clause.is_empty() {
            return Ok(Self::default());
        }

        let conjuncts = split_conjuncts(&clause.condition);
        if conjuncts.len() != clause.args.len() {
            return Err(RepositoryError::InvalidFilter(format!(
                "'{}' is not a conjunction of `column = ?` terms",
                clause.condition
            )));
        }

        let mut terms = Vec::with_capacity(conjuncts.len());
        for (conjunct, arg) in conjuncts.iter().zip(clause.args.iter()) {
            let (column, placeholder) = conjunct.split_once('=').ok_or_else(|| {
                RepositoryError::InvalidFilter(format!("unsupported term '{}'", conjunct))
            })?;
            let column = column.trim();
            if placeholder.trim() != "?"
                || column.is_empty()
                || !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(RepositoryError::InvalidFilter(format!(
                    "unsupported term '{}'",
                    conjunct
                )));
            }
            terms.push((column.to_string(), arg.clone()));
        }
        Ok(Self { terms })
    }

    /// `column` looks up a row value; unknown columns never match.
    pub fn matches(&self, column: impl Fn(&str) -> Option<ClauseValue>) -> bool {
        self.terms
            .iter()
            .all(|(name, expected)| column(name).as_ref() == Some(expected))
    }
}

fn split_conjuncts(condition: &str) -> Vec<String> {
    let mut conjuncts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for token in condition.split_whitespace() {
        if token.eq_ignore_ascii_case("and") {
            conjuncts.push(current.join(" "));
            current.clear();
        } else {
            current.push(token);
        }
    }
    conjuncts.push(current.join(" "));
    conjuncts
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_push_filter_binds_placeholders() {
        let user = Uuid::new_v4();
        let clause = PartialClause::new(
            "user_id = ? and status = ?",
            vec![ClauseValue::Uuid(user), ClauseValue::Text("ok".into())],
        )
        .unwrap();

        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM scoped WHERE id = ");
        builder.push_bind(Uuid::new_v4());
        push_filter(&mut builder, &clause).unwrap();

        assert_eq!(
            builder.sql(),
            "SELECT * FROM scoped WHERE id = $1 AND (user_id = $2 and status = $3)"
        );
    }

    #[test]
    fn test_push_filter_empty_clause() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1");
        push_filter(&mut builder, &PartialClause::none()).unwrap();
        assert_eq!(builder.sql(), "SELECT 1");
    }

    #[test]
    fn test_value_text_is_never_inlined() {
        let clause = PartialClause {
            condition: "user_id = ?".into(),
            args: vec![ClauseValue::Text("x'; drop table instances; --".into())],
        };
        let mut builder = QueryBuilder::<Postgres>::new("SELECT 1 WHERE true");
        push_filter(&mut builder, &clause).unwrap();
        assert!(!builder.sql().contains("drop table"));
    }

    #[test]
    fn test_matcher() {
        let user = Uuid::new_v4();
        let clause = PartialClause::new("user_id = ? AND status = ?", vec![
            ClauseValue::Uuid(user),
            ClauseValue::Text("ok".into()),
        ])
        .unwrap();
        let matcher = ClauseMatcher::compile(&clause).unwrap();

        let row = |column: &str| match column {
            "user_id" => Some(ClauseValue::Uuid(user)),
            "status" => Some(ClauseValue::Text("ok".into())),
            _ => None,
        };
        assert!(matcher.matches(row));
        assert!(!matcher.matches(|_| None));
    }

    #[test]
    fn test_matcher_rejects_unsupported_terms() {
        let clause = PartialClause::new("user_id IN (?)", vec![ClauseValue::Int(1)]).unwrap();
        assert!(ClauseMatcher::compile(&clause).is_err());

        let clause = PartialClause::new("user_id = ? OR 1 = 1", vec![ClauseValue::Int(1)]).unwrap();
        assert!(ClauseMatcher::compile(&clause).is_err());
    }

    #[test]
    fn test_empty_matcher_matches_everything() {
        let matcher = ClauseMatcher::compile(&PartialClause::none()).unwrap();
        assert!(matcher.matches(|_| None));
    }
}
