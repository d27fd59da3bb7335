//! SQL script handling
//!
//! Backups and migration files are plain SQL scripts. This module splits them
//! back into individual statements.

use crate::db::dialect::Dialect;

/// Split a script into statements on `;` outside of quotes and comments.
///
/// `--` line comments and `/* */` block comments outside of literals are
/// dropped. Returned statements are trimmed and have no trailing `;`.
pub fn split_statements(script: &str, dialect: Dialect) -> Vec<String> {
    let backslash_escapes = dialect.backslash_escapes();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut chars = script.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            current.push(c);
            if backslash_escapes && c == '\\' && q != '`' {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            } else if c == q {
                // doubled quote is an escaped quote
                if chars.peek() == Some(&q) {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match c {
            '\'' | '"' | '`' => {
                quote = Some(c);
                current.push(c);
            }
            '-' if chars.peek() == Some(&'-') => {
                for skipped in chars.by_ref() {
                    if skipped == '\n' {
                        current.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for skipped in chars.by_ref() {
                    if prev == '*' && skipped == '/' {
                        break;
                    }
                    prev = skipped;
                }
                current.push(' ');
            }
            ';' => push_statement(&mut statements, &mut current),
            _ => current.push(c),
        }
    }

    push_statement(&mut statements, &mut current);
    statements
}

fn push_statement(statements: &mut Vec<String>, current: &mut String) {
    let statement = current.trim();
    if !statement.is_empty() {
        statements.push(statement.to_string());
    }
    current.clear();
}
