//! Substitution templates.
//!
//! The same template grammar is used by rule substitutions, condition test
//! strings, and the value parts of cookie, env and type flags:
//!
//! - `$0`..`$9` insert rule pattern groups
//! - `%0`..`%9` insert groups of the last matched condition
//! - `%{NAME}` inserts a server variable; `%{ENV:n}`, `%{SSL:n}` and
//!   `%{HTTP:n}` select the other resolver namespaces
//! - `${map:key|default}` looks `key` up in a named map, falling back to
//!   `default` when the key is absent; key and default are themselves
//!   templates
//! - `\x` inserts `x` literally
//!
//! Templates are compiled once at ruleset build time; map references are
//! resolved eagerly, so a lookup into an undeclared map refuses to compile.

use crate::encode;
use crate::error::{Error, Result};
use crate::maps::{MapRegistry, RewriteMap};
use crate::resolver::Resolver;
use std::fmt;
use std::sync::Arc;

/// Capture groups from a successful match, detached from the regex
/// lifetime so they can be carried across the pass.
#[derive(Debug, Clone, Default)]
pub struct MatchGroups {
    groups: Vec<Option<String>>,
}

impl MatchGroups {
    /// Copy all groups out of a regex match.
    pub fn from_captures(caps: &regex::Captures<'_>) -> Self {
        Self {
            groups: (0..caps.len())
                .map(|i| caps.get(i).map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// A group set with no groups; every reference resolves empty.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Group `n` as text. Out-of-range and non-participating groups are
    /// the empty string.
    pub fn group(&self, n: usize) -> &str {
        self.groups.get(n).and_then(|g| g.as_deref()).unwrap_or("")
    }
}

enum Element {
    Literal(String),
    RuleBackref(usize),
    CondBackref(usize),
    ServerVariable(String),
    EnvVariable(String),
    SslVariable(String),
    HttpHeader(String),
    MapLookup {
        map: Arc<dyn RewriteMap>,
        key: Substitution,
        default: Option<Substitution>,
    },
}

/// A compiled substitution template.
pub struct Substitution {
    elements: Vec<Element>,
    escape_backrefs: bool,
    source: String,
}

impl Substitution {
    /// Compile a template. Map lookups are resolved against `maps`; with
    /// `escape_backrefs`, text inserted by `$N` is percent-encoded.
    pub fn compile(template: &str, maps: &MapRegistry, escape_backrefs: bool) -> Result<Self> {
        let elements = parse_elements(template, maps)?;
        Ok(Self {
            elements,
            escape_backrefs,
            source: template.to_string(),
        })
    }

    /// Expand the template.
    pub fn evaluate(
        &self,
        rule_match: &MatchGroups,
        cond_match: &MatchGroups,
        resolver: &dyn Resolver,
    ) -> String {
        let mut out = String::new();
        for element in &self.elements {
            match element {
                Element::Literal(text) => out.push_str(text),
                Element::RuleBackref(n) => {
                    let group = rule_match.group(*n);
                    if self.escape_backrefs {
                        out.push_str(&encode::encode_path(group));
                    } else {
                        out.push_str(group);
                    }
                }
                Element::CondBackref(n) => out.push_str(cond_match.group(*n)),
                Element::ServerVariable(name) => out.push_str(&resolver.resolve(name)),
                Element::EnvVariable(name) => out.push_str(&resolver.resolve_env(name)),
                Element::SslVariable(name) => out.push_str(&resolver.resolve_ssl(name)),
                Element::HttpHeader(name) => out.push_str(&resolver.resolve_http(name)),
                Element::MapLookup { map, key, default } => {
                    let key = key.evaluate(rule_match, cond_match, resolver);
                    match map.lookup(&key) {
                        Some(value) => out.push_str(&value),
                        None => {
                            if let Some(default) = default {
                                out.push_str(&default.evaluate(rule_match, cond_match, resolver));
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// The template text this substitution was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Substitution")
            .field("source", &self.source)
            .finish()
    }
}

impl fmt::Display for Substitution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn parse_elements(template: &str, maps: &MapRegistry) -> Result<Vec<Element>> {
    let chars: Vec<char> = template.chars().collect();
    let mut elements = Vec::new();
    let mut literal = String::new();
    let mut i = 0;

    let malformed = |message: String| Error::Config {
        message: format!("{message} in '{template}'"),
    };

    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let Some(&next) = chars.get(i + 1) else {
                    return Err(malformed("dangling backslash".to_string()));
                };
                literal.push(next);
                i += 2;
            }
            marker @ ('$' | '%') => {
                if !literal.is_empty() {
                    elements.push(Element::Literal(std::mem::take(&mut literal)));
                }
                match chars.get(i + 1) {
                    Some(&d) if d.is_ascii_digit() => {
                        let n = d as usize - '0' as usize;
                        elements.push(if marker == '$' {
                            Element::RuleBackref(n)
                        } else {
                            Element::CondBackref(n)
                        });
                        i += 2;
                    }
                    Some('{') => {
                        let close = find_matching_brace(&chars, i + 1)
                            .ok_or_else(|| malformed(format!("unbalanced brace after '{marker}'")))?;
                        let inner: String = chars[i + 2..close].iter().collect();
                        if marker == '$' {
                            elements.push(map_lookup_element(&inner, maps, template)?);
                        } else {
                            elements.push(variable_element(&inner));
                        }
                        i = close + 1;
                    }
                    _ => {
                        return Err(malformed(format!(
                            "expected digit or brace after '{marker}'"
                        )));
                    }
                }
            }
            c => {
                literal.push(c);
                i += 1;
            }
        }
    }

    if !literal.is_empty() {
        elements.push(Element::Literal(literal));
    }

    Ok(elements)
}

fn variable_element(name: &str) -> Element {
    if let Some(rest) = name.strip_prefix("ENV:") {
        Element::EnvVariable(rest.to_string())
    } else if let Some(rest) = name.strip_prefix("SSL:") {
        Element::SslVariable(rest.to_string())
    } else if let Some(rest) = name.strip_prefix("HTTP:") {
        Element::HttpHeader(rest.to_string())
    } else {
        Element::ServerVariable(name.to_string())
    }
}

fn map_lookup_element(inner: &str, maps: &MapRegistry, template: &str) -> Result<Element> {
    let Some((name, rest)) = inner.split_once(':') else {
        return Err(Error::Config {
            message: format!("map lookup '${{{inner}}}' is missing ':' in '{template}'"),
        });
    };

    let map = maps.get(name).cloned().ok_or_else(|| Error::UnknownMap {
        name: name.to_string(),
    })?;

    let (key_src, default_src) = split_top_level_pipe(rest);
    let key = Substitution::compile(&key_src, maps, false)?;
    let default = default_src
        .map(|d| Substitution::compile(&d, maps, false))
        .transpose()?;

    Ok(Element::MapLookup { map, key, default })
}

/// Find the `}` closing the brace at `open`. Only braces preceded by `$`
/// or `%` open a nested level; any other `{` is literal text.
fn find_matching_brace(chars: &[char], open: usize) -> Option<usize> {
    let mut nesting = 1;
    for i in open + 1..chars.len() {
        match chars[i] {
            '{' if chars[i - 1] == '$' || chars[i - 1] == '%' => nesting += 1,
            '}' => {
                nesting -= 1;
                if nesting == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split `key|default` at the first pipe outside nested expansions.
fn split_top_level_pipe(rest: &str) -> (String, Option<String>) {
    let chars: Vec<char> = rest.chars().collect();
    let mut depth = 0usize;
    for i in 0..chars.len() {
        match chars[i] {
            '{' if i > 0 && (chars[i - 1] == '$' || chars[i - 1] == '%') => depth += 1,
            '}' if depth > 0 => depth -= 1,
            '|' if depth == 0 => {
                let key: String = chars[..i].iter().collect();
                let default: String = chars[i + 1..].iter().collect();
                return (key, Some(default));
            }
            _ => {}
        }
    }
    (rest.to_string(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maps::MapRegistry;
    use crate::resolver::RequestContext;
    use std::collections::HashMap;

    struct TableMap(HashMap<String, String>);

    impl RewriteMap for TableMap {
        fn lookup(&self, key: &str) -> Option<String> {
            self.0.get(key).cloned()
        }

        fn name(&self) -> &'static str {
            "test"
        }
    }

    fn test_maps() -> MapRegistry {
        let mut table = HashMap::new();
        table.insert("a".to_string(), "aa".to_string());
        table.insert("aa".to_string(), "aaaa".to_string());

        let mut maps = MapRegistry::new();
        maps.insert(
            "m".to_string(),
            Arc::new(TableMap(table)) as Arc<dyn RewriteMap>,
        );
        maps.insert("lc".to_string(), Arc::new(crate::maps::LowerMap));
        maps
    }

    fn compile(template: &str) -> Substitution {
        Substitution::compile(template, &test_maps(), false).unwrap()
    }

    fn groups(values: &[&str]) -> MatchGroups {
        let joined = values.join("\n");
        let pattern = format!("^{}$", vec!["(.*)"; values.len()].join("\n"));
        let re = regex::Regex::new(&pattern).unwrap();
        let caps = re.captures(&joined).unwrap();
        MatchGroups::from_captures(&caps)
    }

    #[test]
    fn test_literal_only() {
        let sub = compile("/plain/path");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/plain/path");
    }

    #[test]
    fn test_escapes() {
        let sub = compile(r"\$1 and \%2 and \\");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, r"$1 and %2 and \");
    }

    #[test]
    fn test_dangling_backslash_refused() {
        assert!(Substitution::compile(r"/a\", &test_maps(), false).is_err());
    }

    #[test]
    fn test_rule_backrefs() {
        let sub = compile("/c/$1/$2");
        let out = sub.evaluate(&groups(&["x", "y"]), &MatchGroups::empty(), &RequestContext::new("/"));
        assert_eq!(out, "/c/x/y");
    }

    #[test]
    fn test_out_of_range_backref_is_empty() {
        let sub = compile("/c/$1$9");
        let out = sub.evaluate(&groups(&["x"]), &MatchGroups::empty(), &RequestContext::new("/"));
        assert_eq!(out, "/c/x");
    }

    #[test]
    fn test_cond_backref() {
        let sub = compile("/c/%1");
        let out = sub.evaluate(&MatchGroups::empty(), &groups(&["q"]), &RequestContext::new("/"));
        assert_eq!(out, "/c/q");
    }

    #[test]
    fn test_backref_digit_only() {
        // $12 is group 1 followed by literal '2'.
        let sub = compile("$12");
        let out = sub.evaluate(&groups(&["x"]), &MatchGroups::empty(), &RequestContext::new("/"));
        assert_eq!(out, "x2");
    }

    #[test]
    fn test_server_variable() {
        let sub = compile("/m/%{REQUEST_METHOD}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/m/GET");
    }

    #[test]
    fn test_namespaced_variables() {
        let mut ctx = RequestContext::new("/").with_header("Host", "example.com");
        ctx.env.insert("FLAG".to_string(), "1".to_string());
        ctx.ssl.insert("PROTOCOL".to_string(), "TLSv1.3".to_string());

        let sub = compile("%{HTTP:Host}/%{ENV:FLAG}/%{SSL:PROTOCOL}");
        let out = sub.evaluate(&MatchGroups::empty(), &MatchGroups::empty(), &ctx);
        assert_eq!(out, "example.com/1/TLSv1.3");
    }

    #[test]
    fn test_map_lookup() {
        let sub = compile("/${m:a}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/aa");
    }

    #[test]
    fn test_map_miss_is_empty() {
        let sub = compile("/x${m:absent}y");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/xy");
    }

    #[test]
    fn test_map_default() {
        let sub = compile("/${m:absent|fallback}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/fallback");
    }

    #[test]
    fn test_map_default_not_used_on_hit() {
        let sub = compile("/${m:a|fallback}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/aa");
    }

    #[test]
    fn test_nested_map_key() {
        let sub = compile("/${m:${m:a}}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/aaaa");
    }

    #[test]
    fn test_map_key_from_backref() {
        let sub = compile("/${lc:$1}");
        let out = sub.evaluate(&groups(&["MiXeD"]), &MatchGroups::empty(), &RequestContext::new("/"));
        assert_eq!(out, "/mixed");
    }

    #[test]
    fn test_default_with_expansion() {
        let sub = compile("/${m:absent|%{REQUEST_METHOD}}");
        let out = sub.evaluate(
            &MatchGroups::empty(),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        assert_eq!(out, "/GET");
    }

    #[test]
    fn test_unknown_map_refused() {
        let err = Substitution::compile("/${ghost:key}", &test_maps(), false).unwrap_err();
        assert!(err.to_string().contains("ghost"), "got: {err}");
    }

    #[test]
    fn test_map_without_colon_refused() {
        assert!(Substitution::compile("/${m}", &test_maps(), false).is_err());
    }

    #[test]
    fn test_unbalanced_brace_refused() {
        assert!(Substitution::compile("/%{REQUEST_METHOD", &test_maps(), false).is_err());
        assert!(Substitution::compile("/${m:a", &test_maps(), false).is_err());
    }

    #[test]
    fn test_bad_marker_refused() {
        assert!(Substitution::compile("/$x", &test_maps(), false).is_err());
        assert!(Substitution::compile("/%_{x}", &test_maps(), false).is_err());
        assert!(Substitution::compile("/a$", &test_maps(), false).is_err());
        assert!(Substitution::compile("/a%", &test_maps(), false).is_err());
    }

    #[test]
    fn test_escape_backrefs_encodes_inserted_text_only() {
        let sub = Substitution::compile("/c/\u{00a1}$1", &test_maps(), true).unwrap();
        let out = sub.evaluate(
            &groups(&["\u{00a1}"]),
            &MatchGroups::empty(),
            &RequestContext::new("/"),
        );
        // The literal stays raw, the inserted group is percent-encoded.
        assert_eq!(out, "/c/\u{00a1}%C2%A1");
    }
}
