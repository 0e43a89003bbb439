use std::collections::HashMap;
use std::fmt;

use once_cell::sync::Lazy;

/// A 1-indexed source location. Column 0 only ever appears transiently at the
/// start of a line, before the first character is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Begin/end positions of a token or AST node. `end` is the position of the
/// final character, not one past it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub begin: Position,
    pub end: Position,
}

impl Span {
    pub fn new(begin: Position, end: Position) -> Self {
        Self { begin, end }
    }

    /// The smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            begin: self.begin,
            end: other.end,
        }
    }
}

/// All token kinds in Radish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Illegal,
    Eof,

    // Identifiers and literals
    Identifier,
    Number,
    Str,
    Comment,

    // Operators
    Assign,
    Plus,
    Minus,
    Divide,
    Multiply,
    Modulo,
    Not,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    LogicalAnd,
    LogicalOr,

    // Delimiters
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,

    // Keywords
    Var,
    Function,
    If,
    Else,
    True,
    False,
    Nil,
    Return,
    While,
    Break,
    Continue,
    Defer,
    Assert,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TokenKind::Illegal => "ILLEGAL",
            TokenKind::Eof => "EOF",
            TokenKind::Identifier => "IDENTIFIER",
            TokenKind::Number => "NUMBER",
            TokenKind::Str => "STRING",
            TokenKind::Comment => "COMMENT",
            TokenKind::Assign => "=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Divide => "/",
            TokenKind::Multiply => "*",
            TokenKind::Modulo => "%",
            TokenKind::Not => "!",
            TokenKind::Eq => "==",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Lte => "<=",
            TokenKind::Gt => ">",
            TokenKind::Gte => ">=",
            TokenKind::LogicalAnd => "&&",
            TokenKind::LogicalOr => "||",
            TokenKind::Comma => ",",
            TokenKind::Colon => ":",
            TokenKind::Question => "?",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::Var => "var",
            TokenKind::Function => "fun",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Nil => "nil",
            TokenKind::Return => "return",
            TokenKind::While => "while",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::Defer => "defer",
            TokenKind::Assert => "assert",
        };
        write!(f, "{}", name)
    }
}

static KEYWORDS: Lazy<HashMap<&'static str, TokenKind>> = Lazy::new(|| {
    HashMap::from([
        ("var", TokenKind::Var),
        ("fun", TokenKind::Function),
        ("if", TokenKind::If),
        ("else", TokenKind::Else),
        ("true", TokenKind::True),
        ("false", TokenKind::False),
        ("return", TokenKind::Return),
        ("while", TokenKind::While),
        ("nil", TokenKind::Nil),
        ("break", TokenKind::Break),
        ("continue", TokenKind::Continue),
        ("defer", TokenKind::Defer),
        ("assert", TokenKind::Assert),
    ])
});

fn lookup_identifier(text: &str) -> TokenKind {
    KEYWORDS
        .get(text)
        .copied()
        .unwrap_or(TokenKind::Identifier)
}

/// A token with its kind, raw literal text, and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub literal: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, literal: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            literal: literal.into(),
            span,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Identifier | TokenKind::Number => {
                write!(f, "{} {}", self.kind, self.literal)
            }
            _ => write!(f, "{}", self.literal),
        }
    }
}

/// Single-pass tokenizer with one character of lookahead.
///
/// The tokenizer never fails: anything it does not recognize comes out as an
/// `Illegal` token for the parser to reject with a position attached.
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    read_position: usize,
    ch: char,
    line: u32,
    column: u32,
    tok_begin: Position,
    tok_end: Position,
}

const EOF_CHAR: char = '\0';

impl Tokenizer {
    pub fn new(input: &str) -> Self {
        let mut tokenizer = Self {
            input: input.chars().collect(),
            position: 0,
            read_position: 0,
            ch: EOF_CHAR,
            line: 1,
            column: 0,
            tok_begin: Position::default(),
            tok_end: Position::default(),
        };
        tokenizer.advance();
        tokenizer
    }

    /// Produces the next token. Once the input is exhausted every further
    /// call returns `Eof`.
    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();

        let (kind, literal) = match self.ch {
            '=' => self.two_char_or(TokenKind::Eq, TokenKind::Assign),
            '!' => self.two_char_or(TokenKind::Neq, TokenKind::Not),
            '<' => self.two_char_or(TokenKind::Lte, TokenKind::Lt),
            '>' => self.two_char_or(TokenKind::Gte, TokenKind::Gt),
            '&' => self.twin_or_illegal(TokenKind::LogicalAnd),
            '|' => self.twin_or_illegal(TokenKind::LogicalOr),
            '/' => {
                if self.peek() == '/' {
                    self.mark_begin();
                    let comment = self.read_comment();
                    self.mark_end();
                    (TokenKind::Comment, comment)
                } else {
                    self.single_char(TokenKind::Divide)
                }
            }
            '+' => self.single_char(TokenKind::Plus),
            '-' => self.single_char(TokenKind::Minus),
            '*' => self.single_char(TokenKind::Multiply),
            '%' => self.single_char(TokenKind::Modulo),
            ',' => self.single_char(TokenKind::Comma),
            ':' => self.single_char(TokenKind::Colon),
            '?' => self.single_char(TokenKind::Question),
            '(' => self.single_char(TokenKind::LParen),
            ')' => self.single_char(TokenKind::RParen),
            '{' => self.single_char(TokenKind::LBrace),
            '}' => self.single_char(TokenKind::RBrace),
            '[' => self.single_char(TokenKind::LBracket),
            ']' => self.single_char(TokenKind::RBracket),
            '"' => {
                self.mark_begin();
                let text = self.read_string();
                self.mark_end();
                (TokenKind::Str, text)
            }
            EOF_CHAR => {
                let here = Position::new(self.line, self.column);
                return Token::new(TokenKind::Eof, "0", Span::new(here, here));
            }
            c if is_digit(c) => {
                self.mark_begin();
                let (kind, text) = self.read_number();
                self.mark_end();
                (kind, text)
            }
            c if is_letter(c) => {
                self.mark_begin();
                let text = self.read_identifier();
                self.mark_end();
                (lookup_identifier(&text), text)
            }
            other => {
                self.mark_begin();
                self.mark_end();
                (TokenKind::Illegal, other.to_string())
            }
        };

        let span = Span::new(self.tok_begin, self.tok_end);
        self.advance();
        Token::new(kind, literal, span)
    }

    /// Collects every remaining token including the terminating `Eof`.
    pub fn tokenize(&mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        tokens
    }

    fn single_char(&mut self, kind: TokenKind) -> (TokenKind, String) {
        self.mark_begin();
        self.mark_end();
        (kind, self.ch.to_string())
    }

    /// Emits `twin` when the next character completes an `=`-suffixed pair
    /// (`==`, `!=`, `<=`, `>=`) and `single` otherwise.
    fn two_char_or(&mut self, twin: TokenKind, single: TokenKind) -> (TokenKind, String) {
        self.mark_begin();
        if self.peek() == '=' {
            let first = self.ch;
            self.advance();
            self.mark_end();
            (twin, format!("{}{}", first, self.ch))
        } else {
            self.mark_end();
            (single, self.ch.to_string())
        }
    }

    /// `&` and `|` only exist doubled; a lone one is illegal.
    fn twin_or_illegal(&mut self, twin: TokenKind) -> (TokenKind, String) {
        self.mark_begin();
        if self.peek() == self.ch {
            let first = self.ch;
            self.advance();
            self.mark_end();
            (twin, format!("{}{}", first, self.ch))
        } else {
            self.mark_end();
            (TokenKind::Illegal, self.ch.to_string())
        }
    }

    fn mark_begin(&mut self) {
        self.tok_begin = Position::new(self.line, self.column);
    }

    fn mark_end(&mut self) {
        self.tok_end = Position::new(self.line, self.column);
    }

    fn advance(&mut self) {
        self.ch = self
            .input
            .get(self.read_position)
            .copied()
            .unwrap_or(EOF_CHAR);
        self.position = self.read_position;
        self.read_position += 1;
        self.column += 1;
    }

    fn rewind(&mut self) {
        self.position -= 1;
        self.read_position -= 1;
        self.column -= 1;
        self.ch = self.input.get(self.position).copied().unwrap_or(EOF_CHAR);
    }

    fn peek(&self) -> char {
        self.input
            .get(self.read_position)
            .copied()
            .unwrap_or(EOF_CHAR)
    }

    fn read_number(&mut self) -> (TokenKind, String) {
        let start = self.position;
        let mut decimal_count = 0;
        while is_digit(self.ch) || self.ch == '.' {
            if self.ch == '.' {
                decimal_count += 1;
            }
            if decimal_count > 1 {
                // The second dot is the offending character; the scan stops
                // right on it and the token carries only that dot.
                return (TokenKind::Illegal, self.ch.to_string());
            }
            self.advance();
        }
        let text: String = self.input[start..self.position].iter().collect();
        self.rewind();
        (TokenKind::Number, text)
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;
        while is_letter(self.ch) || is_digit(self.ch) {
            self.advance();
        }
        let text: String = self.input[start..self.position].iter().collect();
        self.rewind();
        text
    }

    fn read_string(&mut self) -> String {
        self.advance();
        let start = self.position;
        while self.ch != '"' && self.ch != EOF_CHAR {
            if self.ch == '\n' || self.ch == '\r' {
                self.line_feed();
            }
            self.advance();
        }
        self.input[start..self.position].iter().collect()
    }

    fn read_comment(&mut self) -> String {
        let start = self.position;
        while !is_newline(self.ch) && self.ch != EOF_CHAR {
            self.advance();
        }
        let text: String = self.input[start..self.position].iter().collect();
        self.rewind();
        text
    }

    fn skip_whitespace(&mut self) {
        // Semicolons separate statements in surface syntax but the grammar
        // needs no terminator, so they are skipped with the whitespace.
        while is_whitespace(self.ch) || self.ch == ';' {
            if is_newline(self.ch) {
                self.line_feed();
            }
            self.advance();
        }
    }

    fn line_feed(&mut self) {
        self.column = 0;
        self.line += 1;
    }
}

fn is_digit(c: char) -> bool {
    c.is_ascii_digit()
}

fn is_letter(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\n' || c == '\r'
}

fn is_newline(c: char) -> bool {
    c == '\n' || c == '\r'
}
