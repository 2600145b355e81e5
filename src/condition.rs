//! Compiled RewriteCond conditions.
//!
//! A condition expands its test string, then compares it against the
//! pattern: a regular expression (which must match the whole value), a
//! lexical comparison (`<x`, `>x`, `=x`) or a filesystem test (`-d`, `-f`,
//! `-s`). A leading `!` negates the outcome.

use crate::error::Result;
use crate::maps::MapRegistry;
use crate::parser::CondDirective;
use crate::resolver::{Resolver, ResourceKind};
use crate::rule::anchored_regex;
use crate::substitution::{MatchGroups, Substitution};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;

enum CondKind {
    /// Full regex match, recording capture groups.
    Pattern(Regex),
    /// Lexical string comparison.
    Lexical { op: LexicalOp, operand: String },
    /// Filesystem test on the expanded test string.
    Resource(ResourceKind),
}

#[derive(Clone, Copy)]
enum LexicalOp {
    Less,
    Greater,
    Equal,
}

/// A compiled condition.
pub struct Condition {
    test: Substitution,
    kind: CondKind,
    negated: bool,
    nocase: bool,
    pattern_source: String,
    /// OR this condition with the next one instead of AND.
    pub ornext: bool,
}

/// Outcome of evaluating a single condition.
pub struct CondMatch {
    /// Whether the condition held.
    pub matched: bool,
    /// Capture groups, present when a regex condition matched positively.
    pub captures: Option<MatchGroups>,
}

impl Condition {
    /// Compile a condition directive against the map registry.
    pub fn compile(directive: &CondDirective, maps: &MapRegistry) -> Result<Self> {
        let test = Substitution::compile(&directive.test, maps, false)
            .map_err(|e| e.at(&directive.location))?;

        let (pattern, negated) = match directive.pattern.strip_prefix('!') {
            Some(rest) => (rest, true),
            None => (directive.pattern.as_str(), false),
        };

        let kind = match pattern {
            "-d" => CondKind::Resource(ResourceKind::Directory),
            "-f" => CondKind::Resource(ResourceKind::File),
            "-s" => CondKind::Resource(ResourceKind::NonEmptyFile),
            _ => {
                if let Some(operand) = pattern.strip_prefix('<') {
                    CondKind::Lexical {
                        op: LexicalOp::Less,
                        operand: operand.to_string(),
                    }
                } else if let Some(operand) = pattern.strip_prefix('>') {
                    CondKind::Lexical {
                        op: LexicalOp::Greater,
                        operand: operand.to_string(),
                    }
                } else if let Some(operand) = pattern.strip_prefix('=') {
                    CondKind::Lexical {
                        op: LexicalOp::Equal,
                        operand: operand.to_string(),
                    }
                } else {
                    CondKind::Pattern(
                        anchored_regex(pattern, directive.flags.nocase)
                            .map_err(|e| e.at(&directive.location))?,
                    )
                }
            }
        };

        Ok(Self {
            test,
            kind,
            negated,
            nocase: directive.flags.nocase,
            pattern_source: directive.pattern.clone(),
            ornext: directive.flags.ornext,
        })
    }

    /// Evaluate the condition. `last_cond` carries the groups of the most
    /// recently matched condition for `%N` references in the test string.
    pub fn evaluate(
        &self,
        rule_match: &MatchGroups,
        last_cond: &MatchGroups,
        resolver: &dyn Resolver,
    ) -> CondMatch {
        let value = self.test.evaluate(rule_match, last_cond, resolver);

        let (matched, captures) = match &self.kind {
            CondKind::Pattern(regex) => match regex.captures(&value) {
                Some(caps) => (true, Some(MatchGroups::from_captures(&caps))),
                None => (false, None),
            },
            CondKind::Lexical { op, operand } => {
                let ordering = if self.nocase {
                    value.to_lowercase().cmp(&operand.to_lowercase())
                } else {
                    value.cmp(operand)
                };
                let held = matches!(
                    (op, ordering),
                    (LexicalOp::Less, Ordering::Less)
                        | (LexicalOp::Greater, Ordering::Greater)
                        | (LexicalOp::Equal, Ordering::Equal)
                );
                (held, None)
            }
            CondKind::Resource(kind) => (resolver.resolve_resource(*kind, &value), None),
        };

        if self.negated {
            // A negated condition never contributes capture groups.
            return CondMatch {
                matched: !matched,
                captures: None,
            };
        }

        CondMatch { matched, captures }
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("test", &self.test.source())
            .field("pattern", &self.pattern_source)
            .field("ornext", &self.ornext)
            .finish()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.test.source(), self.pattern_source)?;
        match (self.nocase, self.ornext) {
            (true, true) => write!(f, " [NC,OR]"),
            (true, false) => write!(f, " [NC]"),
            (false, true) => write!(f, " [OR]"),
            (false, false) => Ok(()),
        }
    }
}
