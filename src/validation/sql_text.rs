// Lexical helpers shared by SQL generation and validation.
//
// Not a SQL parser: the sqlparser tokenizer gives token kinds and their
// source spans, and every piece of SQL handed back is a slice of the input
// text, so literals and quoting reach the database exactly as written.
use std::ops::Range;

use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::keywords::Keyword;
use sqlparser::tokenizer::{Location, Token, Tokenizer, TokenizerError};

/// Statement keywords that are never allowed anywhere in a query, in scan order
pub const FORBIDDEN_KEYWORDS: [&str; 11] = [
    "insert", "update", "delete", "drop", "truncate", "alter", "create", "grant", "revoke",
    "call", "execute",
];

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"(?im)^```(?:sql)?\s*|\s*```$").unwrap();
    // Only used for text the tokenizer rejects.
    static ref TRAILING_LIMIT: Regex =
        Regex::new(r"(?i)\b(limit\s+(\d+))(\s+offset\s+\d+)?\s*$").unwrap();
    static ref KEYWORD_PATTERNS: Vec<(&'static str, Regex)> = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| (*kw, Regex::new(&format!(r"(?i)\b{}\b", kw)).unwrap()))
        .collect();
}

/// A token and the byte range it covers in the source text
#[derive(Debug, Clone)]
struct SpannedToken {
    token: Token,
    range: Range<usize>,
}

impl SpannedToken {
    /// Whitespace and comments
    fn is_blank(&self) -> bool {
        matches!(self.token, Token::Whitespace(_))
    }
}

/// Maps the tokenizer's 1-based line/column locations to byte offsets
struct LineIndex<'a> {
    source: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(source: &'a str) -> Self {
        let line_starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self {
            source,
            line_starts,
        }
    }

    fn offset(&self, location: Location) -> usize {
        let line = (location.line as usize).saturating_sub(1);
        let Some(&start) = self.line_starts.get(line) else {
            return self.source.len();
        };
        // Columns count characters, not bytes.
        let column = (location.column as usize).saturating_sub(1);
        self.source[start..]
            .char_indices()
            .nth(column)
            .map_or(self.source.len(), |(i, _)| start + i)
    }
}

/// Tokenized view of a piece of SQL text
#[derive(Debug, Clone)]
pub struct SqlTokens<'a> {
    source: &'a str,
    tokens: Vec<SpannedToken>,
}

impl<'a> SqlTokens<'a> {
    pub fn parse(sql: &'a str) -> Result<Self, TokenizerError> {
        let dialect = PostgreSqlDialect {};
        let spanned = Tokenizer::new(&dialect, sql).tokenize_with_location()?;
        let index = LineIndex::new(sql);

        let tokens = spanned
            .into_iter()
            .filter(|t| t.token != Token::EOF)
            .map(|t| SpannedToken {
                range: index.offset(t.span.start)..index.offset(t.span.end),
                token: t.token,
            })
            .collect();

        Ok(Self {
            source: sql,
            tokens,
        })
    }

    fn significant(&self) -> impl Iterator<Item = &SpannedToken> {
        self.tokens.iter().filter(|t| !t.is_blank())
    }

    /// First token that is neither whitespace nor a comment
    pub fn leading_token(&self) -> Option<&Token> {
        self.significant().next().map(|t| &t.token)
    }

    /// True when the text starts with the bare (unquoted) keyword `select`
    pub fn starts_with_select(&self) -> bool {
        matches!(self.leading_token(), Some(Token::Word(word)) if is_keyword(word, Keyword::SELECT))
    }

    /// Split on top-level semicolons. Empty statements are dropped; each
    /// statement is the source text from its first to its last significant
    /// token, so surrounding whitespace and comments are not included.
    pub fn statements(&self) -> Vec<String> {
        self.tokens
            .split(|t| t.token == Token::SemiColon)
            .filter_map(|group| self.source_between(group))
            .map(str::to_string)
            .collect()
    }

    fn source_between(&self, group: &[SpannedToken]) -> Option<&'a str> {
        let first = group.iter().find(|t| !t.is_blank())?;
        let last = group.iter().rev().find(|t| !t.is_blank())?;
        Some(&self.source[first.range.start..last.range.end])
    }

    /// End of the last significant token
    fn content_end(&self) -> usize {
        self.significant().last().map_or(0, |t| t.range.end)
    }

    /// Byte range of a trailing `LIMIT n` (optionally followed by
    /// `OFFSET m`) together with `n`. Values too large for u64 become u64::MAX.
    fn trailing_limit_clause(&self) -> Option<(Range<usize>, u64)> {
        let tokens: Vec<&SpannedToken> = self.significant().collect();

        for tail in [2, 4] {
            let Some(start) = tokens.len().checked_sub(tail) else {
                continue;
            };
            let clause = &tokens[start..];
            let offset_follows = tail == 2
                || (matches!(&clause[2].token, Token::Word(w) if is_keyword(w, Keyword::OFFSET))
                    && matches!(clause[3].token, Token::Number(..)));
            if !offset_follows {
                continue;
            }
            if let (Token::Word(word), Token::Number(value, _)) = (&clause[0].token, &clause[1].token) {
                if is_keyword(word, Keyword::LIMIT) {
                    let limit = value.parse::<u64>().unwrap_or(u64::MAX);
                    return Some((clause[0].range.start..clause[1].range.end, limit));
                }
            }
        }
        None
    }

    /// Names of the relations read by FROM and JOIN items, reduced to their
    /// last dotted segment with quoting removed. Order of appearance is kept;
    /// duplicates are not removed.
    pub fn referenced_tables(&self) -> Vec<String> {
        let tokens: Vec<&Token> = self.significant().map(|t| &t.token).collect();
        let mut tables = Vec::new();

        for (i, token) in tokens.iter().enumerate() {
            if let Token::Word(word) = token {
                if is_keyword(word, Keyword::FROM) || is_keyword(word, Keyword::JOIN) {
                    collect_from_items(&tokens[i + 1..], &mut tables);
                }
            }
        }
        tables
    }
}

fn is_keyword(word: &sqlparser::tokenizer::Word, keyword: Keyword) -> bool {
    word.quote_style.is_none() && word.keyword == keyword
}

/// Keywords that close a FROM list at its own nesting level
fn ends_from_list(token: &Token) -> bool {
    match token {
        Token::Word(word) if word.quote_style.is_none() => matches!(
            word.keyword,
            Keyword::WHERE
                | Keyword::GROUP
                | Keyword::HAVING
                | Keyword::WINDOW
                | Keyword::ORDER
                | Keyword::LIMIT
                | Keyword::OFFSET
                | Keyword::FETCH
                | Keyword::FOR
                | Keyword::UNION
                | Keyword::INTERSECT
                | Keyword::EXCEPT
                | Keyword::RETURNING
        ),
        _ => false,
    }
}

/// Walk a FROM/JOIN list: the first item, then every item after a comma at
/// the list's own depth. Joins nested inside items are picked up by the
/// caller when it reaches their JOIN keyword.
fn collect_from_items(tokens: &[&Token], tables: &mut Vec<String>) {
    tables.extend(from_item_table(tokens, 0));

    let mut depth = 0i32;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth < 0 {
                    break;
                }
            }
            Token::Comma if depth == 0 => tables.extend(from_item_table(tokens, i + 1)),
            Token::SemiColon => break,
            other if depth == 0 && ends_from_list(other) => break,
            _ => {}
        }
    }
}

/// Relation named by the from-item starting at `pos`. Steps into
/// parenthesised joins; subqueries and non-name items give None.
fn from_item_table(tokens: &[&Token], mut pos: usize) -> Option<String> {
    loop {
        match tokens.get(pos) {
            Some(Token::LParen) => pos += 1,
            Some(Token::Word(w)) if is_keyword(w, Keyword::ONLY) || is_keyword(w, Keyword::LATERAL) => {
                pos += 1
            }
            _ => break,
        }
    }

    let Some(Token::Word(word)) = tokens.get(pos) else {
        return None;
    };
    if [Keyword::SELECT, Keyword::WITH, Keyword::VALUES]
        .into_iter()
        .any(|kw| is_keyword(word, kw))
    {
        return None;
    }

    let mut name = word.value.clone();
    while let (Some(Token::Period), Some(Token::Word(part))) = (tokens.get(pos + 1), tokens.get(pos + 2)) {
        name = part.value.clone();
        pos += 2;
    }
    Some(name)
}

/// Split raw text into statements, falling back to a plain `;` split when the
/// text does not tokenize (for example prose with an unbalanced apostrophe).
pub fn split_statements(sql: &str) -> Vec<String> {
    match SqlTokens::parse(sql) {
        Ok(tokens) => tokens.statements(),
        Err(e) => {
            tracing::debug!("Tokenizer rejected text, splitting on ';': {}", e);
            sql.split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        }
    }
}

/// Remove markdown code fences (optionally tagged `sql`) around model output
pub fn strip_code_fences(raw: &str) -> String {
    CODE_FENCE.replace_all(raw.trim(), "").trim().to_string()
}

/// First denylisted keyword present as a whole word, in denylist order
pub fn find_forbidden_keyword(sql: &str) -> Option<&'static str> {
    KEYWORD_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(sql))
        .map(|(kw, _)| *kw)
}

/// Value of a trailing `LIMIT n` (optionally followed by `OFFSET m`).
/// Values too large for u64 are reported as u64::MAX.
pub fn trailing_limit(sql: &str) -> Option<u64> {
    match SqlTokens::parse(sql) {
        Ok(tokens) => tokens.trailing_limit_clause().map(|(_, limit)| limit),
        Err(_) => TRAILING_LIMIT
            .captures(sql)
            .and_then(|caps| caps.get(2))
            .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX)),
    }
}

/// Clamp the trailing LIMIT to `max`, or append `LIMIT max` when there is none.
/// Everything outside the LIMIT value is returned as written.
pub fn enforce_limit(sql: &str, max: u64) -> String {
    let sql = trim_terminator(sql);

    let Ok(tokens) = SqlTokens::parse(sql) else {
        return enforce_limit_lexically(sql, max);
    };

    match tokens.trailing_limit_clause() {
        Some((clause, requested)) if requested > max => {
            format!("{}LIMIT {}{}", &sql[..clause.start], max, &sql[clause.end..])
        }
        Some(_) => sql.to_string(),
        // Appended after the last real token so a trailing comment cannot swallow it
        None => format!("{} LIMIT {}", &sql[..tokens.content_end()], max),
    }
}

fn enforce_limit_lexically(sql: &str, max: u64) -> String {
    let Some(caps) = TRAILING_LIMIT.captures(sql) else {
        return format!("{} LIMIT {}", sql, max);
    };
    let (Some(clause), Some(value)) = (caps.get(1), caps.get(2)) else {
        return sql.to_string();
    };

    let requested = value.as_str().parse::<u64>().unwrap_or(u64::MAX);
    if requested > max {
        format!("{}LIMIT {}{}", &sql[..clause.start()], max, &sql[clause.end()..])
    } else {
        sql.to_string()
    }
}

/// Strip surrounding whitespace and any trailing semicolons
pub fn trim_terminator(sql: &str) -> &str {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

/// Tables read by `sql`. Text that does not tokenize yields no tables.
pub fn referenced_tables(sql: &str) -> Vec<String> {
    SqlTokens::parse(sql)
        .map(|tokens| tokens.referenced_tables())
        .unwrap_or_default()
}
