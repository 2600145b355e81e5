//! Directive types for rewrite configuration.

use super::{CondFlags, RuleFlags};
use crate::error::SourceLocation;

/// A parsed rewrite directive.
#[derive(Debug, Clone)]
pub enum Directive {
    /// RewriteRule directive - pattern, substitution and flags.
    Rule(RuleDirective),
    /// RewriteCond directive - condition attached to the next rule.
    Cond(CondDirective),
    /// RewriteMap directive - named lookup table.
    Map(MapDirective),
}

/// A RewriteRule directive.
#[derive(Debug, Clone)]
pub struct RuleDirective {
    /// Regular expression tested against the current path. A leading `!`
    /// negates the match.
    pub pattern: String,
    /// Substitution template, or `-` to leave the path unchanged.
    pub substitution: String,
    /// Parsed rule flags.
    pub flags: RuleFlags,
    /// Source location for error reporting.
    pub location: SourceLocation,
}

/// A RewriteCond directive.
#[derive(Debug, Clone)]
pub struct CondDirective {
    /// Test string template, expanded before the condition is evaluated.
    pub test: String,
    /// Condition pattern: a regex, a lexical comparison (`<x`, `>x`, `=x`)
    /// or a resource test (`-d`, `-f`, `-s`). A leading `!` negates it.
    pub pattern: String,
    /// Parsed condition flags.
    pub flags: CondFlags,
    /// Source location for error reporting.
    pub location: SourceLocation,
}

/// A RewriteMap directive.
#[derive(Debug, Clone)]
pub struct MapDirective {
    /// Name used to reference the map in `${name:key}` lookups.
    pub name: String,
    /// Provider specification, e.g. `int:tolower` or `txt:/path/to/map`.
    pub provider: String,
    /// Optional provider parameters.
    pub params: Vec<String>,
    /// Source location for error reporting.
    pub location: SourceLocation,
}
