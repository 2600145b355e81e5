//! # zentinel-rewrite
//!
//! Rule-based request rewriting engine speaking the Apache
//! `mod_rewrite` configuration language.
//!
//! Rulesets are plain text files of `RewriteRule`, `RewriteCond` and
//! `RewriteMap` directives. They compile once into a [`CompiledRuleset`]
//! and are then run against individual requests, producing a
//! [`RewriteOutcome`]: the rewritten path and query string, or a terminal
//! action such as a redirect or a 403.
//!
//! ## Features
//!
//! - `RewriteRule`, `RewriteCond` and `RewriteMap` directives
//! - The full flag set: chain, last, next, skip, redirect, cookies,
//!   request attributes, query string control
//! - Server variables, condition backreferences and rewrite maps with
//!   defaults
//! - Atomic ruleset reload for long-running services
//! - No unsafe code
//!
//! ## Quick Start
//!
//! ```ignore
//! use zentinel_rewrite::{RequestContext, RewriteEngine};
//!
//! let engine = RewriteEngine::from_string(
//!     r"
//!     RewriteCond %{HTTP:accept-language} ^fr [NC]
//!     RewriteRule ^/docs/(.*)$ /docs/fr/$1 [L]
//! ",
//! )?;
//!
//! let ctx = RequestContext::new("/docs/guide").with_header("Accept-Language", "fr-CA");
//! let outcome = engine.rewrite("/docs/guide", "example.com", None, &ctx);
//! assert_eq!(outcome.path, "/docs/fr/guide");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod error;
pub mod encode;
pub mod parser;
pub mod resolver;
pub mod maps;
pub mod substitution;
pub mod condition;
pub mod rule;
pub mod engine;

// Re-export main types at crate root
pub use engine::{
    CompiledRuleset, Cookie, RewriteEngine, RewriteOutcome, SideEffects, TerminalAction,
};
pub use error::{Error, Result};
pub use resolver::{RequestContext, Resolver, ResourceKind};

/// Engine name reported by the command line tools.
pub const ENGINE_NAME: &str = "zentinel-rewrite";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
