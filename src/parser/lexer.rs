//! Lexer for rewrite configuration syntax.
//!
//! The format is line oriented: one directive per logical line, a `#`
//! outside quotes starts a comment running to the end of the line, a
//! trailing backslash continues the line. Arguments are whitespace
//! separated and may be double-quoted to include whitespace.

use std::iter::Peekable;
use std::str::Chars;

/// Token produced by the lexer.
#[derive(Debug, Clone)]
pub struct Token {
    /// The type of token.
    pub kind: TokenKind,
    /// Line number (1-indexed).
    pub line: usize,
    /// Column number (1-indexed).
    pub column: usize,
}

/// Types of tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A directive name at the start of a logical line (e.g., RewriteRule).
    Directive(String),
    /// An unquoted word.
    Word(String),
    /// A double-quoted string.
    QuotedString(String),
    /// A comment line (starting with #).
    Comment,
    /// A newline.
    Newline,
}

/// Lexer for rewrite configuration.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    line: usize,
    column: usize,
    at_line_start: bool,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given input.
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.chars().peekable(),
            line: 1,
            column: 1,
            at_line_start: true,
        }
    }

    /// Peek at the next character without consuming it.
    pub fn peek(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    /// Consume the next character.
    fn advance(&mut self) -> Option<char> {
        let c = self.input.next();
        if let Some(ch) = c {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
                self.at_line_start = true;
            } else {
                self.column += 1;
                if !ch.is_whitespace() {
                    self.at_line_start = false;
                }
            }
        }
        c
    }

    /// Skip spaces and tabs (but not newlines).
    pub fn skip_whitespace(&mut self) {
        while let Some(&c) = self.input.peek() {
            if c == ' ' || c == '\t' || c == '\r' {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Get the next token, or `None` at end of input.
    pub fn next_token(&mut self) -> Option<Token> {
        self.skip_whitespace();

        let line = self.line;
        let column = self.column;

        match self.peek()? {
            '\n' => {
                self.advance();
                Some(Token {
                    kind: TokenKind::Newline,
                    line,
                    column,
                })
            }
            '#' => {
                // Comment - skip to end of line. A # inside an argument is
                // an ordinary character, only a # starting a token opens a
                // comment.
                while let Some(&c) = self.input.peek() {
                    if c == '\n' {
                        break;
                    }
                    self.advance();
                }
                Some(Token {
                    kind: TokenKind::Comment,
                    line,
                    column,
                })
            }
            '"' => {
                self.advance();
                let s = self.read_quoted_string();
                Some(Token {
                    kind: TokenKind::QuotedString(s),
                    line,
                    column,
                })
            }
            '\\' => {
                // Either a line continuation or a word starting with a
                // literal backslash (e.g. an escaped substitution).
                self.advance();
                match self.peek() {
                    Some('\n') => {
                        self.advance();
                        self.next_token()
                    }
                    Some('\r') => {
                        self.advance();
                        if self.peek() == Some('\n') {
                            self.advance();
                        }
                        self.next_token()
                    }
                    _ => {
                        let rest = self.read_word();
                        Some(Token {
                            kind: TokenKind::Word(format!("\\{rest}")),
                            line,
                            column,
                        })
                    }
                }
            }
            _ => {
                // read_word flips at_line_start, capture it first
                let was_at_line_start = self.at_line_start;
                let word = self.read_word();
                if word.is_empty() {
                    return None;
                }

                // Directives all share the Rewrite prefix; anything else at
                // line start is rejected later by the parser.
                let kind = if was_at_line_start && word.to_lowercase().starts_with("rewrite") {
                    TokenKind::Directive(word)
                } else {
                    TokenKind::Word(word)
                };

                Some(Token { kind, line, column })
            }
        }
    }

    /// Read a double-quoted string. `\"` and `\\` are unescaped and a
    /// backslash-newline continues the string on the next line; any other
    /// backslash sequence is kept verbatim for the substitution parser.
    /// An unterminated quote stops at the line break, keeping the text
    /// read so far.
    fn read_quoted_string(&mut self) -> String {
        let mut s = String::new();
        let mut escaped = false;

        loop {
            let Some(c) = self.peek() else { break };
            if c == '\n' && !escaped {
                break;
            }
            self.advance();
            if escaped {
                match c {
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    '\n' => {}
                    '\r' => {
                        if self.peek() == Some('\n') {
                            self.advance();
                        }
                    }
                    _ => {
                        s.push('\\');
                        s.push(c);
                    }
                }
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                break;
            } else {
                s.push(c);
            }
        }

        s
    }

    /// Read an unquoted word, handling backslash-newline continuation.
    fn read_word(&mut self) -> String {
        let mut s = String::new();

        while let Some(&c) = self.input.peek() {
            if c == '\\' {
                // Check for line continuation
                self.advance();
                match self.peek() {
                    Some('\n') => {
                        self.advance();
                        continue;
                    }
                    Some('\r') => {
                        self.advance();
                        if self.peek() == Some('\n') {
                            self.advance();
                        }
                        continue;
                    }
                    _ => {
                        // Not a line continuation, include the backslash
                        s.push('\\');
                        continue;
                    }
                }
            }
            if c.is_whitespace() || c == '"' {
                break;
            }
            s.push(c);
            self.advance();
        }

        s
    }
}
