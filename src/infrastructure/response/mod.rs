pub mod formatter;

pub use formatter::format_sql;

use once_cell::sync::Lazy;
use regex::Regex;

static REASONING_BLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<think>[\s\S]*?</think>|<think\s*/>|<reasoning>[\s\S]*?</reasoning>").unwrap()
});

static SQL_FENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```(?:sql)?\s*([\s\S]*?)```").unwrap());

static LINE_COMMENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)--.*$").unwrap());

static BLOCK_COMMENT_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\*[\s\S]*?\*/").unwrap());

/// Turn a raw model reply into a single formatted T-SQL statement ending in `;`.
///
/// Reasoning blocks are dropped, the first fenced block (if any) is taken,
/// prose before the first `SELECT` and after the last `;` is removed, comments
/// are stripped and the result is laid out by [`format_sql`].
pub fn clean_sql_response(response: &str) -> String {
    let without_reasoning = REASONING_BLOCK_PATTERN.replace_all(response, "");
    let mut sql = without_reasoning.trim().to_string();

    if let Some(body) = SQL_FENCE_PATTERN
        .captures(&sql)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
    {
        sql = body;
    }

    if let Some(start) = find_ignore_case(&sql, "SELECT") {
        if start > 0 {
            sql = sql[start..].to_string();
        }
    }

    if let Some(last_semicolon) = sql.rfind(';').filter(|&idx| idx > 0) {
        let trailing = sql[last_semicolon + 1..].trim();
        if !trailing.is_empty() && !starts_with_ignore_case(trailing, "SELECT") {
            sql.truncate(last_semicolon + 1);
        }
    }

    let sql = LINE_COMMENT_PATTERN.replace_all(&sql, "");
    let sql = BLOCK_COMMENT_PATTERN.replace_all(&sql, "");

    let mut formatted = format_sql(sql.trim());
    terminate_statement(&mut formatted);
    formatted
}

/// Collapse any trailing run of semicolons into exactly one.
fn terminate_statement(sql: &mut String) {
    while sql.ends_with(';') || sql.ends_with(char::is_whitespace) {
        sql.pop();
    }
    sql.push(';');
}

fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_uppercase()
        .find(&needle.to_ascii_uppercase())
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}
