//! Rewrite engine: compiled rulesets and the per-request pass.

mod driver;
pub mod outcome;
pub mod ruleset;

pub use outcome::{Cookie, RewriteOutcome, SideEffects, TerminalAction};
pub use ruleset::CompiledRuleset;

use crate::error::Result;
use crate::resolver::Resolver;
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;

/// Main rewrite engine.
///
/// Holds a compiled ruleset behind a read-write lock so the ruleset can be
/// swapped atomically while requests are in flight. Rewriting never blocks
/// a reload for longer than an `Arc` clone.
pub struct RewriteEngine {
    ruleset: RwLock<Arc<CompiledRuleset>>,
    /// Prefix for relative redirect targets when serving a mounted
    /// application, e.g. `/app`.
    context_path: Option<String>,
}

impl RewriteEngine {
    /// Create a new engine with the given ruleset.
    pub fn new(ruleset: CompiledRuleset) -> Self {
        Self {
            ruleset: RwLock::new(Arc::new(ruleset)),
            context_path: None,
        }
    }

    /// Load rules from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let ruleset = CompiledRuleset::from_file(path)?;
        Ok(Self::new(ruleset))
    }

    /// Load rules from a string.
    pub fn from_string(rules: &str) -> Result<Self> {
        let ruleset = CompiledRuleset::from_string(rules)?;
        Ok(Self::new(ruleset))
    }

    /// Set the context path prepended to relative redirect targets.
    pub fn set_context_path(&mut self, path: impl Into<String>) {
        self.context_path = Some(path.into());
    }

    /// Replace the active ruleset. Requests already past the swap keep the
    /// ruleset they started with.
    pub fn reload(&self, ruleset: CompiledRuleset) {
        *self.ruleset.write() = Arc::new(ruleset);
    }

    /// Run one rewrite pass for a request.
    ///
    /// `path` is the decoded request path and `query` the raw query string
    /// as received. Rules with the `H` flag test and rewrite `host`; all
    /// others test the path. The pass restarts at most ten times under the
    /// `N` flag before it is cut short.
    pub fn rewrite(
        &self,
        path: &str,
        host: &str,
        query: Option<&str>,
        resolver: &dyn Resolver,
    ) -> RewriteOutcome {
        let ruleset = Arc::clone(&self.ruleset.read());
        driver::run(
            &ruleset,
            path,
            host,
            query,
            self.context_path.as_deref(),
            resolver,
        )
    }

    /// Get the active ruleset.
    pub fn ruleset(&self) -> Arc<CompiledRuleset> {
        Arc::clone(&self.ruleset.read())
    }

    /// Get the number of rules in the active ruleset.
    pub fn rule_count(&self) -> usize {
        self.ruleset.read().rule_count()
    }
}

impl std::fmt::Debug for RewriteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RewriteEngine")
            .field("rule_count", &self.rule_count())
            .field("context_path", &self.context_path)
            .finish()
    }
}
