//! Relational command grammar.
//!
//! Recognises exactly one `SELECT`, `INSERT`, `UPDATE` or `DELETE` statement.
//! The statement is tokenized (strings, quoted identifiers and nesting are
//! respected) rather than matched with substring checks, so keywords inside
//! literals never change the verdict.

use common::errors::{AppError, AppResult};
use common::utils::is_plain_identifier;

use super::ROW_CAP;

/// Statement kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation {
    Select,
    Insert,
    Update,
    Delete,
}

impl SqlOperation {
    pub fn name(&self) -> &'static str {
        match self {
            SqlOperation::Select => "select",
            SqlOperation::Insert => "insert",
            SqlOperation::Update => "update",
            SqlOperation::Delete => "delete",
        }
    }
}

/// A validated relational statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlCommand {
    pub operation: SqlOperation,
    /// Target table as written (quotes removed, schema-qualified if given).
    pub table: String,
    /// Executable text, without a trailing semicolon.
    pub statement: String,
    /// Effective row limit for reads.
    pub limit: Option<u64>,
}

impl std::fmt::Display for SqlCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{};", self.statement)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Number,
    Str,
    Quoted,
    Punct,
    Semicolon,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    start: usize,
    end: usize,
    /// Parenthesis depth at which the token appears.
    depth: usize,
}

impl Token<'_> {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.len() == c.len_utf8() && self.text.starts_with(c)
    }
}

/// Words that never appear bare as a table name in generated text.
const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN",
    "CONDITION", "CREATE", "CROSS", "DATABASE", "DEFAULT", "DELETE", "DESC", "DESCRIBE",
    "DISTINCT", "DROP", "ELSE", "EXISTS", "FOR", "FROM", "GRANT", "GROUP", "HAVING", "IN",
    "INDEX", "INNER", "INSERT", "INTERVAL", "INTO", "IS", "JOIN", "KEY", "KEYS", "LEFT", "LIKE",
    "LIMIT", "LOCK", "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "PROCEDURE", "RANGE",
    "READ", "REFERENCES", "RIGHT", "ROWS", "SCHEMA", "SELECT", "SET", "SHOW", "TABLE", "THEN",
    "TO", "UNION", "UNIQUE", "UPDATE", "USE", "USING", "VALUE", "VALUES", "WHEN", "WHERE",
    "WITH", "WRITE",
];

/// Renders `name` as a table reference.
///
/// Plain identifiers that start with a letter or `_` and are not reserved stay
/// bare; everything else is backtick-quoted.
pub fn quote_identifier(name: &str) -> String {
    let bare = is_plain_identifier(name)
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !RESERVED.iter().any(|word| word.eq_ignore_ascii_case(name));
    if bare {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

fn unsupported(msg: impl Into<String>) -> AppError {
    AppError::UnsupportedOperation(msg.into())
}

fn lex(src: &str) -> AppResult<Vec<Token<'_>>> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut i = 0usize;

    while i < bytes.len() {
        let b = bytes[i];
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        let kind = match b {
            b'#' => return Err(unsupported("SQL comments are not allowed")),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                return Err(unsupported("SQL comments are not allowed"))
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                return Err(unsupported("SQL comments are not allowed"))
            }
            b'\'' | b'"' => {
                i = skip_quoted(bytes, i, b, true)
                    .ok_or_else(|| unsupported("unterminated string literal"))?;
                TokenKind::Str
            }
            b'`' => {
                i = skip_quoted(bytes, i, b'`', false)
                    .ok_or_else(|| unsupported("unterminated quoted identifier"))?;
                TokenKind::Quoted
            }
            b';' => {
                i += 1;
                TokenKind::Semicolon
            }
            b'0'..=b'9' => {
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // `2024_sales` is an identifier, `1.5` and `10` are numbers.
                if i < bytes.len() && is_word_byte(bytes[i]) && !bytes[i].is_ascii_digit() {
                    while i < bytes.len() && is_word_byte(bytes[i]) {
                        i += 1;
                    }
                    TokenKind::Word
                } else {
                    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'.') {
                        i += 1;
                    }
                    TokenKind::Number
                }
            }
            b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                // one (possibly multi-byte) character
                let ch_len = src[i..].chars().next().map(char::len_utf8).unwrap_or(1);
                i += ch_len;
                TokenKind::Punct
            }
        };

        let text = &src[start..i];
        let token_depth = if kind == TokenKind::Punct && text == ")" {
            depth = depth
                .checked_sub(1)
                .ok_or_else(|| unsupported("unbalanced parentheses"))?;
            depth
        } else {
            depth
        };
        if kind == TokenKind::Punct && text == "(" {
            depth += 1;
        }
        tokens.push(Token {
            kind,
            text,
            start,
            end: i,
            depth: token_depth,
        });
    }

    if depth != 0 {
        return Err(unsupported("unbalanced parentheses"));
    }
    Ok(tokens)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// Returns the index just past the closing quote.
fn skip_quoted(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        let b = bytes[i];
        if backslash_escapes && b == b'\\' {
            i += 2;
            continue;
        }
        if b == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

/// Parses and validates one relational statement.
pub fn parse(text: &str) -> AppResult<SqlCommand> {
    let body = text.trim();
    let tokens = lex(body)?;

    let semicolons: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter(|(_, t)| t.kind == TokenKind::Semicolon)
        .map(|(i, _)| i)
        .collect();
    let statement_tokens = match semicolons.as_slice() {
        [] => &tokens[..],
        [only] if *only == tokens.len() - 1 => &tokens[..*only],
        _ => return Err(unsupported("only a single statement is allowed")),
    };
    let Some(first) = statement_tokens.first() else {
        return Err(unsupported("empty query"));
    };
    let statement = match tokens.get(statement_tokens.len()) {
        Some(semi) => body[..semi.start].trim_end(),
        None => body,
    };

    if first.is_keyword("SELECT") {
        parse_select(statement, statement_tokens)
    } else if first.is_keyword("INSERT") {
        parse_insert(statement, statement_tokens)
    } else if first.is_keyword("UPDATE") {
        parse_update(statement, statement_tokens)
    } else if first.is_keyword("DELETE") {
        parse_delete(statement, statement_tokens)
    } else {
        Err(unsupported(format!(
            "{} statements are not supported; allowed: SELECT, INSERT, UPDATE, DELETE",
            first.text.to_uppercase()
        )))
    }
}

/// Reads `name` or `schema.name` starting at `at`; returns the name and the
/// index of the next token.
fn table_ref(tokens: &[Token<'_>], at: usize) -> Option<(String, usize)> {
    let part = |t: &Token<'_>| match t.kind {
        TokenKind::Word => Some(t.text.to_string()),
        TokenKind::Quoted => Some(t.text[1..t.text.len() - 1].replace("``", "`")),
        _ => None,
    };
    let first = part(tokens.get(at)?)?;
    match (tokens.get(at + 1), tokens.get(at + 2)) {
        (Some(dot), Some(next)) if dot.is_punct('.') => {
            let second = part(next)?;
            Some((format!("{}.{}", first, second), at + 3))
        }
        _ => Some((first, at + 1)),
    }
}

fn top_level_keyword(tokens: &[Token<'_>], from: usize, keyword: &str) -> Option<usize> {
    tokens
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, t)| t.depth == 0 && t.is_keyword(keyword))
        .map(|(i, _)| i)
}

fn parse_select(statement: &str, tokens: &[Token<'_>]) -> AppResult<SqlCommand> {
    for forbidden in ["INTO", "FOR", "LOCK", "PROCEDURE"] {
        if top_level_keyword(tokens, 0, forbidden).is_some() {
            return Err(unsupported(format!(
                "SELECT ... {} is not supported",
                forbidden
            )));
        }
    }

    let from = top_level_keyword(tokens, 1, "FROM")
        .ok_or_else(|| unsupported("SELECT requires a FROM <table> clause"))?;
    let (table, _) = table_ref(tokens, from + 1)
        .ok_or_else(|| unsupported("SELECT requires a FROM <table> clause"))?;

    let limit_at = tokens
        .iter()
        .rposition(|t| t.depth == 0 && t.is_keyword("LIMIT"));

    let Some(limit_at) = limit_at else {
        return Ok(SqlCommand {
            operation: SqlOperation::Select,
            table,
            statement: format!("{} LIMIT {}", statement, ROW_CAP),
            limit: Some(ROW_CAP),
        });
    };

    let (first_n, first_tok) = limit_number(tokens, limit_at + 1)?;
    let (count, count_tok, consumed) = match tokens.get(limit_at + 2) {
        Some(t) if t.is_punct(',') => {
            let (n, tok) = limit_number(tokens, limit_at + 3)?;
            (n, tok, limit_at + 4)
        }
        Some(t) if t.is_keyword("OFFSET") => {
            limit_number(tokens, limit_at + 3)?;
            (first_n, first_tok, limit_at + 4)
        }
        _ => (first_n, first_tok, limit_at + 2),
    };
    if consumed != tokens.len() {
        return Err(unsupported("LIMIT must be the last clause of a SELECT"));
    }

    let (statement, limit) = if count > ROW_CAP {
        (
            format!(
                "{}{}{}",
                &statement[..count_tok.start],
                ROW_CAP,
                &statement[count_tok.end..]
            ),
            ROW_CAP,
        )
    } else {
        (statement.to_string(), count)
    };

    Ok(SqlCommand {
        operation: SqlOperation::Select,
        table,
        statement,
        limit: Some(limit),
    })
}

fn limit_number<'a>(tokens: &[Token<'a>], at: usize) -> AppResult<(u64, Token<'a>)> {
    let token = tokens
        .get(at)
        .filter(|t| t.kind == TokenKind::Number)
        .ok_or_else(|| unsupported("LIMIT must be followed by a row count"))?;
    let n = token
        .text
        .parse::<u64>()
        .map_err(|_| unsupported(format!("invalid LIMIT value: {}", token.text)))?;
    Ok((n, *token))
}

/// Index just past the parenthesised group opening at `open`.
fn skip_group(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let opening = tokens.get(open)?;
    if !opening.is_punct('(') {
        return None;
    }
    tokens
        .iter()
        .enumerate()
        .skip(open + 1)
        .find(|(_, t)| t.is_punct(')') && t.depth == opening.depth)
        .map(|(i, _)| i + 1)
}

fn parse_insert(statement: &str, tokens: &[Token<'_>]) -> AppResult<SqlCommand> {
    let shape = || unsupported("INSERT must have the form INSERT INTO <table> (columns) VALUES (...)");

    if !tokens.get(1).is_some_and(|t| t.is_keyword("INTO")) {
        return Err(shape());
    }
    let (table, next) = table_ref(tokens, 2).ok_or_else(shape)?;
    let after_columns = skip_group(tokens, next).ok_or_else(shape)?;
    if after_columns == next + 2 {
        return Err(unsupported("INSERT column list must not be empty"));
    }
    if !tokens
        .get(after_columns)
        .is_some_and(|t| t.is_keyword("VALUES") || t.is_keyword("VALUE"))
    {
        return Err(shape());
    }

    let mut at = after_columns + 1;
    loop {
        at = skip_group(tokens, at).ok_or_else(shape)?;
        match tokens.get(at) {
            None => break,
            Some(t) if t.is_punct(',') => at += 1,
            Some(_) => return Err(shape()),
        }
    }

    Ok(SqlCommand {
        operation: SqlOperation::Insert,
        table,
        statement: statement.to_string(),
        limit: None,
    })
}

/// True if a top-level WHERE after `from` is followed by a condition.
fn has_where_condition(tokens: &[Token<'_>], from: usize) -> bool {
    match top_level_keyword(tokens, from, "WHERE") {
        Some(at) => tokens
            .get(at + 1)
            .is_some_and(|t| !(t.is_keyword("ORDER") || t.is_keyword("LIMIT"))),
        None => false,
    }
}

fn parse_update(statement: &str, tokens: &[Token<'_>]) -> AppResult<SqlCommand> {
    let shape = || unsupported("UPDATE must have the form UPDATE <table> SET ... WHERE ...");

    let (table, next) = table_ref(tokens, 1).ok_or_else(shape)?;
    if !tokens.get(next).is_some_and(|t| t.is_keyword("SET")) {
        return Err(shape());
    }
    if tokens
        .get(next + 1)
        .map_or(true, |t| t.depth == 0 && t.is_keyword("WHERE"))
    {
        return Err(shape());
    }
    if !has_where_condition(tokens, next + 1) {
        return Err(AppError::UnsafeMutation(format!(
            "UPDATE on `{}` has no WHERE clause and would modify every row",
            table
        )));
    }

    Ok(SqlCommand {
        operation: SqlOperation::Update,
        table,
        statement: statement.to_string(),
        limit: None,
    })
}

fn parse_delete(statement: &str, tokens: &[Token<'_>]) -> AppResult<SqlCommand> {
    let shape = || unsupported("DELETE must have the form DELETE FROM <table> WHERE ...");

    if !tokens.get(1).is_some_and(|t| t.is_keyword("FROM")) {
        return Err(shape());
    }
    let (table, next) = table_ref(tokens, 2).ok_or_else(shape)?;
    match tokens.get(next) {
        None => {}
        Some(t) if t.is_keyword("WHERE") => {}
        Some(_) => return Err(shape()),
    }
    if !has_where_condition(tokens, next) {
        return Err(AppError::UnsafeMutation(format!(
            "DELETE on `{}` has no WHERE clause and would remove every row",
            table
        )));
    }

    Ok(SqlCommand {
        operation: SqlOperation::Delete,
        table,
        statement: statement.to_string(),
        limit: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsafe_mutation(text: &str) -> bool {
        matches!(parse(text), Err(AppError::UnsafeMutation(_)))
    }

    fn unsupported_op(text: &str) -> bool {
        matches!(parse(text), Err(AppError::UnsupportedOperation(_)))
    }

    #[test]
    fn test_digit_leading_identifiers_are_words() {
        let cmd = parse("SELECT * FROM 2024_sales WHERE total > 1.5 LIMIT 10").unwrap();
        assert_eq!(cmd.table, "2024_sales");
        assert_eq!(cmd.limit, Some(10));
        let cmd = parse("DELETE FROM 9lives WHERE id = 3").unwrap();
        assert_eq!(cmd.table, "9lives");
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("customers"), "customers");
        assert_eq!(quote_identifier("_audit"), "_audit");
        assert_eq!(quote_identifier("2024_sales"), "`2024_sales`");
        assert_eq!(quote_identifier("lock"), "`lock`");
        assert_eq!(quote_identifier("Order"), "`Order`");

        let cmd = parse(&format!("SELECT * FROM {} LIMIT 5", quote_identifier("for"))).unwrap();
        assert_eq!(cmd.table, "for");
    }

    #[test]
    fn test_update_requires_where() {
        assert!(unsafe_mutation("UPDATE users SET name='x'"));
        assert!(unsafe_mutation("UPDATE users SET name='x' WHERE"));
        let cmd = parse("UPDATE users SET name='x' WHERE id=1").unwrap();
        assert_eq!(cmd.operation, SqlOperation::Update);
        assert_eq!(cmd.table, "users");
    }

    #[test]
    fn test_where_inside_string_does_not_count() {
        assert!(unsafe_mutation("UPDATE users SET note = 'WHERE id = 1'"));
        assert!(unsafe_mutation("UPDATE users SET note = (SELECT 1 WHERE 1 = 1)"));
    }

    #[test]
    fn test_delete_requires_where() {
        assert!(unsafe_mutation("DELETE FROM users"));
        assert!(unsafe_mutation("delete from users;"));
        assert!(unsafe_mutation("DELETE FROM users WHERE LIMIT 5"));
        let cmd = parse("DELETE FROM `users` WHERE id = 7;").unwrap();
        assert_eq!(cmd.table, "users");
        assert_eq!(cmd.statement, "DELETE FROM `users` WHERE id = 7");
    }

    #[test]
    fn test_select_limit_is_appended() {
        let cmd = parse("SELECT * FROM customers").unwrap();
        assert_eq!(cmd.to_string(), "SELECT * FROM customers LIMIT 100;");
        assert_eq!(cmd.limit, Some(100));
    }

    #[test]
    fn test_select_limit_is_capped() {
        let cmd = parse("SELECT id FROM orders WHERE total > 5 LIMIT 500;").unwrap();
        assert_eq!(cmd.statement, "SELECT id FROM orders WHERE total > 5 LIMIT 100");
        let cmd = parse("SELECT id FROM orders LIMIT 20, 1000").unwrap();
        assert_eq!(cmd.statement, "SELECT id FROM orders LIMIT 20, 100");
        let cmd = parse("SELECT id FROM orders LIMIT 1000 OFFSET 20").unwrap();
        assert_eq!(cmd.statement, "SELECT id FROM orders LIMIT 100 OFFSET 20");
    }

    #[test]
    fn test_select_small_limit_is_kept() {
        let cmd = parse("SELECT * FROM customers LIMIT 100;").unwrap();
        assert_eq!(cmd.to_string(), "SELECT * FROM customers LIMIT 100;");
        let cmd = parse("SELECT * FROM t ORDER BY created_at DESC LIMIT 10").unwrap();
        assert_eq!(cmd.limit, Some(10));
    }

    #[test]
    fn test_subquery_limit_is_not_the_outer_limit() {
        let cmd = parse("SELECT * FROM a WHERE id IN (SELECT id FROM b LIMIT 5)").unwrap();
        assert!(cmd.statement.ends_with(") LIMIT 100"));
    }

    #[test]
    fn test_count_query_is_accepted() {
        let cmd = parse("SELECT COUNT(*) as total_count FROM users;").unwrap();
        assert_eq!(cmd.operation, SqlOperation::Select);
        assert_eq!(cmd.table, "users");
    }

    #[test]
    fn test_insert_shape() {
        let cmd =
            parse("INSERT INTO users (name, email) VALUES ('John', 'john@email.com'), ('a', 'b');")
                .unwrap();
        assert_eq!(cmd.operation, SqlOperation::Insert);
        assert!(unsupported_op("INSERT INTO users VALUES (1, 2)"));
        assert!(unsupported_op("INSERT INTO users (id) SELECT id FROM other"));
        assert!(unsupported_op("INSERT INTO users () VALUES ()"));
    }

    #[test]
    fn test_rejects_other_statements() {
        assert!(unsupported_op("DROP TABLE users"));
        assert!(unsupported_op("TRUNCATE users"));
        assert!(unsupported_op("SHOW TABLES"));
        assert!(unsupported_op(""));
        assert!(unsupported_op("SELECT 1"));
    }

    #[test]
    fn test_rejects_multiple_statements_and_comments() {
        assert!(unsupported_op("SELECT * FROM a; DROP TABLE a"));
        assert!(unsupported_op("SELECT * FROM a -- comment"));
        assert!(unsupported_op("SELECT * FROM a /* x */"));
        assert!(unsupported_op("SELECT * FROM a # x"));
        let cmd = parse("SELECT * FROM a WHERE note = 'x; -- y'").unwrap();
        assert_eq!(cmd.table, "a");
    }

    #[test]
    fn test_rejects_select_into_and_locking() {
        assert!(unsupported_op("SELECT * FROM a INTO OUTFILE '/tmp/x'"));
        assert!(unsupported_op("SELECT * FROM a FOR UPDATE"));
    }

    #[test]
    fn test_unterminated_literal() {
        assert!(unsupported_op("SELECT * FROM a WHERE name = 'x"));
        assert!(unsupported_op("SELECT * FROM a WHERE (id = 1"));
    }

    #[test]
    fn test_qualified_table() {
        let cmd = parse("SELECT * FROM shop.`order items`").unwrap();
        assert_eq!(cmd.table, "shop.order items");
    }
}
