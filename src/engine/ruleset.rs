//! Compiled ruleset: rewrite maps plus rules ready for evaluation.

use crate::error::Result;
use crate::maps::{self, MapRegistry};
use crate::parser::{CondDirective, Directive, Parser};
use crate::rule::Rule;
use std::path::Path;

/// A fully compiled ruleset.
///
/// Maps are registered before any rule is compiled, so a rule may reference
/// a map declared further down the file.
pub struct CompiledRuleset {
    rules: Vec<Rule>,
    maps: MapRegistry,
}

impl CompiledRuleset {
    /// Create an empty ruleset.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            maps: MapRegistry::new(),
        }
    }

    /// Load and compile rules from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut parser = Parser::new();
        parser.parse_file(path)?;
        Self::compile(parser.into_directives())
    }

    /// Load and compile rules from a string.
    pub fn from_string(rules: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser.parse(rules)?;
        Self::compile(parser.into_directives())
    }

    /// Compile parsed directives into a ruleset.
    pub fn compile(directives: Vec<Directive>) -> Result<Self> {
        let mut registry = MapRegistry::new();
        for directive in &directives {
            if let Directive::Map(map) = directive {
                let compiled = maps::compile_map(map)?;
                if registry.insert(map.name.clone(), compiled).is_some() {
                    tracing::warn!(
                        name = %map.name,
                        location = %map.location,
                        "rewrite map declared twice, later declaration wins"
                    );
                }
            }
        }

        let mut rules = Vec::new();
        let mut pending: Vec<CondDirective> = Vec::new();
        for directive in directives {
            match directive {
                Directive::Cond(cond) => pending.push(cond),
                Directive::Rule(rule) => {
                    rules.push(Rule::compile(rule, std::mem::take(&mut pending), &registry)?);
                }
                Directive::Map(_) => {}
            }
        }

        if !pending.is_empty() {
            tracing::warn!(
                count = pending.len(),
                "conditions without a following rule were dropped"
            );
        }

        Ok(Self {
            rules,
            maps: registry,
        })
    }

    /// Compiled rules, in file order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Total rule count.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Number of registered rewrite maps.
    pub fn map_count(&self) -> usize {
        self.maps.len()
    }
}

impl Default for CompiledRuleset {
    fn default() -> Self {
        Self::new()
    }
}
