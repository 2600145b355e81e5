//! Rewrite configuration parser module.
//!
//! This module handles parsing of the rewrite directives:
//! - RewriteRule: pattern, substitution and flags
//! - RewriteCond: a condition attached to the next rule
//! - RewriteMap: a named lookup table
//!
//! ## Syntax
//!
//! ```text
//! RewriteCond TestString CondPattern [Flags]
//! RewriteRule Pattern Substitution [Flags]
//! RewriteMap name providerSpec [params...]
//! ```
//!
//! Directive order matters for conditions (they attach to the next rule)
//! but not for maps, which are visible to every rule in the ruleset.

mod directive;
mod flags;
mod lexer;

pub use directive::{CondDirective, Directive, MapDirective, RuleDirective};
pub use flags::{parse_cond_flags, parse_rule_flags, CondFlags, CookieFlag, RuleFlags};
pub use lexer::{Lexer, Token, TokenKind};

use crate::error::{Error, Result, SourceLocation};
use std::path::Path;

/// Parser for rewrite configuration files.
pub struct Parser {
    /// Parsed directives.
    directives: Vec<Directive>,
    /// Current source location for error reporting.
    location: SourceLocation,
}

impl Parser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            directives: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    /// Parse a configuration string.
    pub fn parse(&mut self, input: &str) -> Result<()> {
        self.parse_with_location(input, None)
    }

    /// Parse a configuration string with file location.
    pub fn parse_with_location(&mut self, input: &str, file: Option<&Path>) -> Result<()> {
        self.location.file = file.map(|p| p.to_path_buf());
        self.location.line = 1;
        self.location.column = 1;

        let mut lexer = Lexer::new(input);

        while let Some(token) = lexer.next_token() {
            self.location.line = token.line;
            self.location.column = token.column;

            match token.kind {
                TokenKind::Directive(name) => {
                    let directive = self.parse_directive(&name, &mut lexer)?;
                    self.directives.push(directive);
                }
                TokenKind::Comment => {
                    // Skip comments
                }
                TokenKind::Newline => {
                    // Skip blank lines
                }
                TokenKind::Word(word) => {
                    return Err(Error::parse(
                        format!("unknown directive: {word}"),
                        self.location.to_string(),
                    ));
                }
                _ => {
                    return Err(Error::parse(
                        format!("unexpected token: {:?}", token.kind),
                        self.location.to_string(),
                    ));
                }
            }
        }

        Ok(())
    }

    /// Parse a configuration file.
    pub fn parse_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::ConfigFileLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.parse_with_location(&content, Some(path))
    }

    /// Parse files matching a glob pattern.
    pub fn parse_glob(&mut self, pattern: &str) -> Result<()> {
        let paths = glob::glob(pattern)
            .map_err(|e| Error::parse(format!("invalid glob pattern: {e}"), pattern))?;

        for entry in paths {
            match entry {
                Ok(path) => {
                    if path.is_file() {
                        self.parse_file(&path)?;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "error reading glob entry");
                }
            }
        }

        Ok(())
    }

    /// Get the parsed directives.
    pub fn into_directives(self) -> Vec<Directive> {
        self.directives
    }

    /// Get a reference to the parsed directives.
    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// Parse a directive starting from the directive name. Unknown
    /// directives are an error: a ruleset that parses is a ruleset that
    /// will be enforced in full.
    fn parse_directive(&mut self, name: &str, lexer: &mut Lexer) -> Result<Directive> {
        match name.to_lowercase().as_str() {
            "rewriterule" => self.parse_rule(lexer),
            "rewritecond" => self.parse_cond(lexer),
            "rewritemap" => self.parse_map(lexer),
            _ => Err(Error::parse(
                format!("unknown directive: {name}"),
                self.location.to_string(),
            )),
        }
    }

    /// Parse a RewriteRule directive.
    fn parse_rule(&mut self, lexer: &mut Lexer) -> Result<Directive> {
        let pattern = self.expect_argument(lexer, "RewriteRule pattern")?;
        let substitution = self.expect_argument(lexer, "RewriteRule substitution")?;

        let flags = if self.line_has_more(lexer) {
            let list = self.expect_flag_list(lexer, "RewriteRule")?;
            parse_rule_flags(&list).map_err(|e| e.at(&self.location))?
        } else {
            RuleFlags::default()
        };

        self.expect_end_of_line(lexer, "RewriteRule")?;

        Ok(Directive::Rule(RuleDirective {
            pattern,
            substitution,
            flags,
            location: self.location.clone(),
        }))
    }

    /// Parse a RewriteCond directive.
    fn parse_cond(&mut self, lexer: &mut Lexer) -> Result<Directive> {
        let test = self.expect_argument(lexer, "RewriteCond test string")?;
        let pattern = self.expect_argument(lexer, "RewriteCond pattern")?;

        let flags = if self.line_has_more(lexer) {
            let list = self.expect_flag_list(lexer, "RewriteCond")?;
            parse_cond_flags(&list).map_err(|e| e.at(&self.location))?
        } else {
            CondFlags::default()
        };

        self.expect_end_of_line(lexer, "RewriteCond")?;

        Ok(Directive::Cond(CondDirective {
            test,
            pattern,
            flags,
            location: self.location.clone(),
        }))
    }

    /// Parse a RewriteMap directive.
    fn parse_map(&mut self, lexer: &mut Lexer) -> Result<Directive> {
        let name = self.expect_argument(lexer, "RewriteMap name")?;
        let provider = self.expect_argument(lexer, "RewriteMap provider")?;

        let mut params = Vec::new();
        while self.line_has_more(lexer) {
            params.push(self.expect_argument(lexer, "RewriteMap parameter")?);
        }

        Ok(Directive::Map(MapDirective {
            name,
            provider,
            params,
            location: self.location.clone(),
        }))
    }

    /// Expect an argument (word or quoted string).
    fn expect_argument(&mut self, lexer: &mut Lexer, context: &str) -> Result<String> {
        match lexer.next_token() {
            Some(token) => match token.kind {
                TokenKind::Word(s) | TokenKind::QuotedString(s) => Ok(s),
                _ => Err(Error::parse(
                    format!("expected {} but got {:?}", context, token.kind),
                    self.location.to_string(),
                )),
            },
            None => Err(Error::parse(
                format!("expected {context} but got end of input"),
                self.location.to_string(),
            )),
        }
    }

    /// Expect a bracketed flag list and return its body.
    fn expect_flag_list(&mut self, lexer: &mut Lexer, context: &str) -> Result<String> {
        let token = self.expect_argument(lexer, "flag list")?;
        match token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            Some(inner) => Ok(inner.to_string()),
            None => Err(Error::parse(
                format!("expected {context} flags in brackets, got '{token}'"),
                self.location.to_string(),
            )),
        }
    }

    /// Check whether the current line has further arguments. A `#` here
    /// opens a trailing comment, so the line is done.
    fn line_has_more(&self, lexer: &mut Lexer) -> bool {
        lexer.skip_whitespace();
        !matches!(lexer.peek(), None | Some('\n') | Some('#'))
    }

    /// Error out if the current line still has arguments.
    fn expect_end_of_line(&self, lexer: &mut Lexer, context: &str) -> Result<()> {
        if self.line_has_more(lexer) {
            return Err(Error::parse(
                format!("unexpected trailing argument after {context}"),
                self.location.to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}
