//! Lexer for Quill source using logos

use logos::{FilterResult, Lexer as LogosLexer, Logos};
use quill_core::{Position, Span};

#[derive(Logos, Debug, PartialEq, Clone)]
pub enum Token<'a> {
    // Keywords
    #[token("if", priority = 10)]
    If,
    #[token("elif", priority = 10)]
    Elif,
    #[token("else", priority = 10)]
    Else,
    #[token("for", priority = 10)]
    For,
    #[token("range", priority = 10)]
    Range,
    #[token("in", priority = 10)]
    In,
    #[token("switch", priority = 10)]
    Switch,
    #[token("case", priority = 10)]
    Case,
    #[token("default", priority = 10)]
    Default,
    #[token("fallthrough", priority = 10)]
    Fallthrough,
    #[token("break", priority = 10)]
    Break,
    #[token("continue", priority = 10)]
    Continue,
    #[token("return", priority = 10)]
    Return,
    #[token("defer", priority = 10)]
    Defer,
    #[token("go", priority = 10)]
    Go,
    #[token("try", priority = 10)]
    Try,
    #[token("catch", priority = 10)]
    Catch,
    #[token("finally", priority = 10)]
    Finally,
    #[token("assert", priority = 10)]
    Assert,
    #[token("func", priority = 10)]
    #[token("fn", priority = 10)]
    Func,
    #[token("var", priority = 10)]
    Var,
    #[token("nil", priority = 10)]
    Nil,
    #[token("undefined", priority = 10)]
    Undefined,
    #[token("true", priority = 10)]
    True,
    #[token("false", priority = 10)]
    False,
    #[token("make", priority = 10)]
    Make,
    #[token("panic", priority = 10)]
    Panic,
    #[token("recover", priority = 10)]
    Recover,

    // Type keywords
    #[token("int", priority = 10)]
    IntType,
    #[token("float", priority = 10)]
    FloatType,
    #[token("string", priority = 10)]
    StringType,
    #[token("bytes", priority = 10)]
    BytesType,
    #[token("bool", priority = 10)]
    BoolType,
    #[token("any", priority = 10)]
    AnyType,
    #[token("map", priority = 10)]
    Map,
    #[token("chan", priority = 10)]
    Chan,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("...")]
    Ellipsis,
    #[token(".")]
    Dot,
    #[token("?")]
    Question,
    #[regex(r"\n")]
    Newline,

    // Assignment
    #[token("=")]
    Assign,
    #[token(":=")]
    Define,
    #[token("+=")]
    PlusEq,
    #[token("-=")]
    MinusEq,
    #[token("*=")]
    StarEq,
    #[token("/=")]
    SlashEq,
    #[token("%=")]
    PercentEq,
    #[token("&=")]
    AmpEq,
    #[token("|=")]
    PipeEq,
    #[token("^=")]
    CaretEq,
    #[token("&^=")]
    AmpCaretEq,
    #[token("<<=")]
    ShlEq,
    #[token(">>=")]
    ShrEq,
    #[token("++")]
    PlusPlus,
    #[token("--")]
    MinusMinus,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("&^")]
    AmpCaret,
    #[token("<<")]
    Shl,
    #[token(">>")]
    Shr,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,
    #[token("!")]
    Bang,
    #[token("<-")]
    Arrow,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    LtEq,
    #[token(">")]
    Gt,
    #[token(">=")]
    GtEq,

    // Literals
    #[regex(r"[0-9][0-9_]*\.[0-9][0-9_]*([eE][+-]?[0-9]+)?", priority = 6)]
    #[regex(r"[0-9][0-9_]*[eE][+-]?[0-9]+", priority = 6)]
    Float(&'a str),

    #[regex(r"0[xX][0-9a-fA-F_]+", priority = 6)]
    #[regex(r"0[oO][0-7_]+", priority = 6)]
    #[regex(r"0[bB][01_]+", priority = 6)]
    #[regex(r"[0-9][0-9_]*", priority = 5)]
    Int(&'a str),

    #[regex(r#""([^"\\\n]|\\.)*""#, priority = 5, callback = |lex| {
        let s = lex.slice();
        process_string_escapes(&s[1..s.len() - 1])
    })]
    #[regex(r"'([^'\\\n]|\\.)*'", priority = 5, callback = |lex| {
        let s = lex.slice();
        process_string_escapes(&s[1..s.len() - 1])
    })]
    #[regex(r"`[^`]*`", priority = 5, callback = |lex| {
        let s = lex.slice();
        Some(s[1..s.len() - 1].to_string())
    })]
    Str(String),

    #[regex(r#"b"([^"\\\n]|\\.)*""#, priority = 7, callback = |lex| {
        let s = lex.slice();
        process_string_escapes(&s[2..s.len() - 1]).map(String::into_bytes)
    })]
    Bytes(Vec<u8>),

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", priority = 3)]
    Ident(&'a str),

    // Comments and whitespace (automatically skipped)
    #[regex(r"//[^\n]*", logos::skip)]
    #[token("/*", block_comment)]
    #[regex(r"[ \t\r\f]+", logos::skip)]
    Error,
}

impl<'a> Token<'a> {
    /// Short description used in error messages
    pub fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier `{}`", name),
            Token::Int(text) | Token::Float(text) => format!("number `{}`", text),
            Token::Str(_) => "string literal".to_string(),
            Token::Bytes(_) => "bytes literal".to_string(),
            Token::Newline => "newline".to_string(),
            other => format!("`{:?}`", other),
        }
    }
}

/// Processes escape sequences; `None` for an unknown escape
pub fn process_string_escapes(s: &str) -> Option<String> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            result.push(ch);
            continue;
        }
        match chars.next()? {
            'n' => result.push('\n'),
            't' => result.push('\t'),
            'r' => result.push('\r'),
            '\\' => result.push('\\'),
            '"' => result.push('"'),
            '\'' => result.push('\''),
            '0' => result.push('\0'),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                let byte = u8::from_str_radix(&hex, 16).ok()?;
                result.push(char::from(byte));
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                result.push(char::from_u32(code)?);
            }
            _ => return None,
        }
    }

    Some(result)
}

/// Converts byte offsets into line/column positions
#[derive(Debug, Clone)]
pub struct LineMap {
    starts: Vec<usize>,
}

impl LineMap {
    pub fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let line = match self.starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        Position::new(line as u32 + 1, (offset - self.starts[line]) as u32 + 1)
    }

    pub fn span(&self, range: std::ops::Range<usize>) -> Span {
        Span::new(self.position(range.start), self.position(range.end))
    }
}

/// A token with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<'a> {
    pub token: Token<'a>,
    pub span: Span,
}

/// Tokenizes the whole input; the error carries the span of the bad input
/// Skips to the closing `*/`; an unterminated comment is an error
fn block_comment<'a>(lex: &mut LogosLexer<'a, Token<'a>>) -> FilterResult<(), ()> {
    match lex.remainder().find("*/") {
        Some(end) => {
            lex.bump(end + 2);
            FilterResult::Skip
        }
        None => {
            lex.bump(lex.remainder().len());
            FilterResult::Error(())
        }
    }
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned<'_>>, Span> {
    let lines = LineMap::new(source);
    let mut lexer: LogosLexer<'_, Token<'_>> = Token::lexer(source);
    let mut out = Vec::new();
    while let Some(result) = lexer.next() {
        let span = lines.span(lexer.span());
        match result {
            Ok(token) => out.push(Spanned { token, span }),
            Err(()) => return Err(span),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token<'_>> {
        tokenize(src).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn test_keywords_and_idents() {
        assert_eq!(
            tokens("for i in range if iffy fn func"),
            vec![
                Token::For,
                Token::Ident("i"),
                Token::In,
                Token::Range,
                Token::If,
                Token::Ident("iffy"),
                Token::Func,
                Token::Func,
            ]
        );
    }

    #[test]
    fn test_numbers() {
        assert_eq!(
            tokens("42 0x1F 0b101 1_000 3.14 2e10"),
            vec![
                Token::Int("42"),
                Token::Int("0x1F"),
                Token::Int("0b101"),
                Token::Int("1_000"),
                Token::Float("3.14"),
                Token::Float("2e10"),
            ]
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(
            tokens(r#""a\tb" 'c' `raw\n` b"\x01""#),
            vec![
                Token::Str("a\tb".into()),
                Token::Str("c".into()),
                Token::Str("raw\\n".into()),
                Token::Bytes(vec![1]),
            ]
        );
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a &^= b <- c ... :="),
            vec![
                Token::Ident("a"),
                Token::AmpCaretEq,
                Token::Ident("b"),
                Token::Arrow,
                Token::Ident("c"),
                Token::Ellipsis,
                Token::Define,
            ]
        );
    }

    #[test]
    fn test_comments_and_newlines() {
        assert_eq!(
            tokens("a // note\n/* block */ b"),
            vec![Token::Ident("a"), Token::Newline, Token::Ident("b")]
        );
        assert_eq!(
            tokens("a /* block */ b /* * / **/ c"),
            vec![Token::Ident("a"), Token::Ident("b"), Token::Ident("c")]
        );
        assert_eq!(
            tokens("x /* spans\nlines */ y"),
            vec![Token::Ident("x"), Token::Ident("y")]
        );
    }

    #[test]
    fn test_unterminated_block_comment_is_error() {
        let span = tokenize("a /* never closed").unwrap_err();
        assert_eq!(span.start, Position::new(1, 3));
    }

    #[test]
    fn test_positions() {
        let toks = tokenize("a\n  bc").unwrap();
        assert_eq!(toks[2].span.start, Position::new(2, 3));
        assert_eq!(toks[2].span.end, Position::new(2, 5));
    }

    #[test]
    fn test_bad_escape_is_error() {
        assert!(tokenize(r#""\q""#).is_err());
        assert!(tokenize("a @ b").is_err());
    }
}
