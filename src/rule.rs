//! Compiled rewrite rules.
//!
//! A rule pairs an anchored pattern with a substitution template and an
//! optional block of conditions. Evaluation matches the pattern against the
//! current subject, walks the conditions, and on success expands the
//! substitution and any per-rule side effects (environment entries, a
//! cookie, a content type override).

use crate::condition::Condition;
use crate::engine::outcome::Cookie;
use crate::error::{Error, Result, SourceLocation};
use crate::maps::MapRegistry;
use crate::parser::{CondDirective, RuleDirective, RuleFlags};
use crate::resolver::Resolver;
use crate::substitution::{MatchGroups, Substitution};
use regex::{Regex, RegexBuilder};
use std::fmt;

/// Build a regex that must match the whole subject. The non-capturing
/// wrapper keeps the pattern's own group numbers stable.
pub(crate) fn anchored_regex(pattern: &str, nocase: bool) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(nocase)
        .build()
        .map_err(|source| Error::RegexCompile {
            pattern: pattern.to_string(),
            source,
        })
}

#[derive(Debug)]
struct CompiledCookie {
    name: String,
    value: Substitution,
    domain: Option<String>,
    lifetime: i64,
    path: Option<String>,
    secure: bool,
    http_only: bool,
}

/// A compiled RewriteRule together with its preceding conditions.
#[derive(Debug)]
pub struct Rule {
    pattern: Regex,
    pattern_source: String,
    negative: bool,
    /// `None` for a `-` substitution, which keeps the subject as is.
    substitution: Option<Substitution>,
    conditions: Vec<Condition>,
    /// Parsed rule flags.
    pub flags: RuleFlags,
    env: Vec<(String, Substitution)>,
    cookie: Option<CompiledCookie>,
    content_type: Option<Substitution>,
    /// Where the rule was declared, for diagnostics.
    pub location: SourceLocation,
}

/// What a matched rule produced.
pub struct RuleEvaluation {
    /// Substitution output, or the unchanged subject for `-` rules.
    pub output: String,
    /// Expanded environment entries from `E=` flags.
    pub env: Vec<(String, String)>,
    /// Cookie from a `CO=` flag.
    pub cookie: Option<Cookie>,
    /// Content type from a `T=` flag.
    pub content_type: Option<String>,
}

impl Rule {
    /// Compile a rule directive and the conditions that precede it.
    pub fn compile(
        directive: RuleDirective,
        cond_directives: Vec<CondDirective>,
        maps: &MapRegistry,
    ) -> Result<Self> {
        let location = directive.location;
        let flags = directive.flags;

        let (pattern_text, negative) = match directive.pattern.strip_prefix('!') {
            Some(rest) => (rest.to_string(), true),
            None => (directive.pattern.clone(), false),
        };
        let pattern = anchored_regex(&pattern_text, flags.nocase).map_err(|e| e.at(&location))?;

        let substitution = if directive.substitution == "-" {
            None
        } else {
            Some(
                Substitution::compile(&directive.substitution, maps, flags.escape_backrefs)
                    .map_err(|e| e.at(&location))?,
            )
        };

        let mut conditions = cond_directives
            .iter()
            .map(|cond| Condition::compile(cond, maps))
            .collect::<Result<Vec<_>>>()?;

        // An OR flag spills over onto the condition that follows it, so a
        // trailing AND condition joins the OR group in front of it.
        for i in (1..conditions.len()).rev() {
            if conditions[i - 1].ornext {
                conditions[i].ornext = true;
            }
        }

        let env = flags
            .env
            .iter()
            .map(|(name, value)| {
                Substitution::compile(value, maps, false)
                    .map(|template| (name.clone(), template))
                    .map_err(|e| e.at(&location))
            })
            .collect::<Result<Vec<_>>>()?;

        let cookie = match &flags.cookie {
            Some(c) => Some(CompiledCookie {
                name: c.name.clone(),
                value: Substitution::compile(&c.value, maps, false)
                    .map_err(|e| e.at(&location))?,
                domain: c.domain.clone(),
                lifetime: c.lifetime,
                path: c.path.clone(),
                secure: c.secure,
                http_only: c.http_only,
            }),
            None => None,
        };

        let content_type = match &flags.content_type {
            Some(value) => Some(
                Substitution::compile(value, maps, false).map_err(|e| e.at(&location))?,
            ),
            None => None,
        };

        Ok(Self {
            pattern,
            pattern_source: directive.pattern,
            negative,
            substitution,
            conditions,
            flags,
            env,
            cookie,
            content_type,
            location,
        })
    }

    /// Evaluate the rule against `subject`. Returns `None` when the pattern
    /// or the condition block does not hold.
    pub fn evaluate(&self, subject: &str, resolver: &dyn Resolver) -> Option<RuleEvaluation> {
        // A negated pattern matches by failing and never yields groups.
        let rule_groups = if self.negative {
            if self.pattern.is_match(subject) {
                return None;
            }
            MatchGroups::empty()
        } else {
            match self.pattern.captures(subject) {
                Some(caps) => MatchGroups::from_captures(&caps),
                None => return None,
            }
        };

        let mut cond_groups = MatchGroups::empty();
        if !self.walk_conditions(&rule_groups, &mut cond_groups, resolver) {
            return None;
        }

        let env = self
            .env
            .iter()
            .map(|(name, template)| {
                (
                    name.clone(),
                    template.evaluate(&rule_groups, &cond_groups, resolver),
                )
            })
            .collect();

        let cookie = self.cookie.as_ref().map(|c| Cookie {
            name: c.name.clone(),
            value: c.value.evaluate(&rule_groups, &cond_groups, resolver),
            domain: c.domain.clone(),
            lifetime: c.lifetime,
            path: c.path.clone(),
            secure: c.secure,
            http_only: c.http_only,
        });

        let content_type = self
            .content_type
            .as_ref()
            .map(|template| template.evaluate(&rule_groups, &cond_groups, resolver));

        let output = match &self.substitution {
            Some(template) => template.evaluate(&rule_groups, &cond_groups, resolver),
            None => subject.to_string(),
        };

        Some(RuleEvaluation {
            output,
            env,
            cookie,
            content_type,
        })
    }

    /// Walk the condition block. On a hold, the rest of its OR group is
    /// skipped; a failed AND condition fails the block. The groups of the
    /// most recent positive regex match stay visible as `%N`.
    fn walk_conditions(
        &self,
        rule_groups: &MatchGroups,
        cond_groups: &mut MatchGroups,
        resolver: &dyn Resolver,
    ) -> bool {
        let conditions = &self.conditions;
        let mut holds = true;
        let mut pos = 0;
        while pos < conditions.len() {
            let result = conditions[pos].evaluate(rule_groups, cond_groups, resolver);
            holds = result.matched;
            if result.matched {
                if let Some(captures) = result.captures {
                    *cond_groups = captures;
                }
                while pos < conditions.len() && conditions[pos].ornext {
                    pos += 1;
                }
            } else if !conditions[pos].ornext {
                return false;
            }
            pos += 1;
        }
        holds
    }

    /// The conditions attached to this rule, in file order.
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// The pattern text this rule was compiled from.
    pub fn pattern_source(&self) -> &str {
        &self.pattern_source
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for cond in &self.conditions {
            writeln!(f, "RewriteCond {cond}")?;
        }
        let substitution = self.substitution.as_ref().map_or("-", |s| s.source());
        write!(f, "RewriteRule {} {}", self.pattern_source, substitution)?;
        let flags = self.flags.to_string();
        if !flags.is_empty() {
            write!(f, " [{flags}]")?;
        }
        Ok(())
    }
}
