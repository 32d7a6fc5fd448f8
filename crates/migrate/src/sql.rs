//! SQL script helpers for migration bodies

use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, Tokenizer};

/// Split a migration script into `-- Up migration` and `-- Down migration`
/// sections. Only the marker lines and anything before the first marker are
/// dropped; section bodies keep their text, comments included.
pub fn parse_sections(content: &str) -> (String, String) {
    let mut up_sql = Vec::new();
    let mut down_sql = Vec::new();
    let mut current_section = "";

    for line in content.lines() {
        let trimmed = line.trim().to_lowercase();

        if let Some(comment) = trimmed.strip_prefix("--") {
            match comment.trim() {
                "up" | "up migration" => {
                    current_section = "up";
                    continue;
                }
                "down" | "down migration" => {
                    current_section = "down";
                    continue;
                }
                _ => {}
            }
        }

        match current_section {
            "up" => up_sql.push(line),
            "down" => down_sql.push(line),
            _ => {}
        }
    }

    (
        up_sql.join("\n").trim().to_string(),
        down_sql.join("\n").trim().to_string(),
    )
}

/// Split SQL into individual statements, as written.
///
/// Statement boundaries are the top-level `;` tokens found by the PostgreSQL
/// tokenizer, so semicolons inside string literals, comments and
/// dollar-quoted bodies do not split. Each statement is a slice of the
/// original text; nothing is re-rendered. Text the tokenizer rejects is
/// returned whole.
pub fn split_statements(sql: &str) -> Vec<String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let tokens = match Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize_with_location() {
        Ok(tokens) => tokens,
        Err(e) => {
            tracing::debug!(error = %e, "SQL tokenizing failed, keeping script whole");
            return vec![trimmed.to_string()];
        }
    };

    let line_starts: Vec<usize> = std::iter::once(0)
        .chain(sql.match_indices('\n').map(|(i, _)| i + 1))
        .collect();
    // Locations are 1-based lines and 1-based character columns.
    let byte_offset = |location: &Location| -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *line_starts.get(line)?;
        sql[start..].char_indices().nth(column).map(|(i, _)| start + i)
    };

    let mut statements = Vec::new();
    let mut start = 0;
    let mut has_content = false;
    for token in &tokens {
        match token.token {
            Token::SemiColon => {
                let Some(end) = byte_offset(&token.location) else {
                    return vec![trimmed.to_string()];
                };
                if has_content {
                    statements.push(sql[start..end].trim().to_string());
                }
                start = end + 1;
                has_content = false;
            }
            Token::Whitespace(_) => {}
            _ => has_content = true,
        }
    }
    if has_content {
        statements.push(sql[start..].trim().to_string());
    }
    statements
}
