use std::collections::BTreeSet;

use regex::Regex;

/// Tables referenced inside a check predicate.
///
/// Picks up `FROM`/`JOIN` targets of subqueries, `schema.table.column`
/// references and whole-word occurrences of `known_tables`. Names are
/// returned without schema prefix, lowercased, excluding `own_table`.
pub fn referenced_tables(
    expression: &str,
    own_table: &str,
    known_tables: &[String],
) -> BTreeSet<String> {
    let expression = strip_keyword_functions(expression);
    let own = base_table(own_table).to_lowercase();
    let mut tables = BTreeSet::new();

    for name in captures(
        r"(?i)\b(?:from|join)\s+([a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)",
        &expression,
        1,
    ) {
        tables.insert(base_table(&name).to_lowercase());
    }

    for name in captures(
        r"(?i)\b[a-z_][a-z0-9_]*\.([a-z_][a-z0-9_]*)\.[a-z_][a-z0-9_]*\b",
        &expression,
        1,
    ) {
        tables.insert(name.to_lowercase());
    }

    for known in known_tables {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(base_table(known)));
        if Regex::new(&pattern).is_ok_and(|re| re.is_match(&expression)) {
            tables.insert(base_table(known).to_lowercase());
        }
    }

    tables.remove(&own);
    tables
}

/// Table name without its schema prefix.
pub fn base_table(table: &str) -> &str {
    table.rsplit('.').next().unwrap_or(table)
}

fn captures(pattern: &str, text: &str, group: usize) -> Vec<String> {
    let Ok(re) = Regex::new(pattern) else {
        return Vec::new();
    };
    re.captures_iter(text)
        .filter_map(|caps| caps.get(group).map(|m| m.as_str().to_string()))
        .collect()
}

/// Drop `EXTRACT(... FROM col)`-style calls whose `FROM` is not a table.
fn strip_keyword_functions(expression: &str) -> String {
    match Regex::new(r"(?i)\b(?:extract|substring|trim|overlay|position)\s*\([^()]*\)") {
        Ok(re) => re.replace_all(expression, "").into_owned(),
        Err(_) => expression.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_subquery_tables() {
        let tables = referenced_tables(
            "EXISTS (SELECT 1 FROM public.organizations o JOIN organization_members m ON m.organization_id = o.id)",
            "accounts",
            &[],
        );
        assert_eq!(
            tables,
            BTreeSet::from(["organization_members".to_string(), "organizations".to_string()])
        );
    }

    #[test]
    fn ignores_extract_from_columns() {
        let tables = referenced_tables(
            "EXTRACT(YEAR FROM created_at) >= 2020 AND status <> 'archived'",
            "projects",
            &[],
        );
        assert!(tables.is_empty());
    }

    #[test]
    fn matches_known_tables_as_whole_words() {
        let known = vec!["plans".to_string(), "accounts".to_string()];
        let tables = referenced_tables(
            "plan_id IS NOT NULL AND check_plan_matches(plans, account_type)",
            "subscriptions",
            &known,
        );
        assert_eq!(tables, BTreeSet::from(["plans".to_string()]));
    }

    #[test]
    fn excludes_own_table_and_reads_qualified_columns() {
        let tables = referenced_tables(
            "public.accounts.account_type = public.subscriptions.kind",
            "public.subscriptions",
            &[],
        );
        assert_eq!(tables, BTreeSet::from(["accounts".to_string()]));
    }
}
