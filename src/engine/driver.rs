//! The per-request rewrite pass.
//!
//! Runs the compiled rule list over one request, implementing the control
//! flow between rules: chain groups, `last`, `next` restarts, `skip`,
//! host-mode rules, terminal actions, and the query string policy.
//!
//! The incoming path has literal `%`, `;` and `?` protectively encoded
//! before matching starts, so rule patterns never confuse them with
//! percent-escapes or the query separator. The final outcome reverses that
//! encoding; a `?` can therefore enter the subject only through a
//! substitution and always marks the rewritten query string.

use crate::encode;
use crate::engine::outcome::{RewriteOutcome, SideEffects, TerminalAction};
use crate::engine::ruleset::CompiledRuleset;
use crate::resolver::{Resolver, ResourceKind};
use crate::rule::RuleEvaluation;
use once_cell::sync::Lazy;
use regex::Regex;

/// Upper bound on `next`-flag restarts in one pass.
const MAX_RESTARTS: usize = 10;

/// Run one rewrite pass over the ruleset.
///
/// `path` is the decoded request path, `query` the raw original query
/// string, `host` the request host name. `context_path` is prepended to
/// relative redirect targets when the engine serves a mounted application.
pub(crate) fn run(
    ruleset: &CompiledRuleset,
    path: &str,
    host: &str,
    query: Option<&str>,
    context_path: Option<&str>,
    resolver: &dyn Resolver,
) -> RewriteOutcome {
    let rules = ruleset.rules();
    let original_query = query.unwrap_or("");

    let mut subject = encode::mask_reserved(path);
    let mut current_host = host.to_string();
    let mut host_changed = false;
    let mut rewritten = false;
    let mut qsa = false;
    let mut qsd = false;
    let mut effects = SideEffects::default();
    let mut overlay = EnvOverlay::new(resolver);
    let mut terminal = None;
    let mut restarts = 0usize;

    let mut i = 0;
    while i < rules.len() {
        let rule = &rules[i];
        let evaluation = if rule.flags.host {
            rule.evaluate(&current_host, &overlay)
        } else {
            rule.evaluate(&subject, &overlay)
        };

        let Some(RuleEvaluation {
            output,
            env,
            cookie,
            content_type,
        }) = evaluation
        else {
            if rule.flags.chain {
                // The rules chained to this one fail as a group; resume at
                // the first rule without the chain flag.
                let mut j = i + 1;
                while j < rules.len() && rules[j].flags.chain {
                    j += 1;
                }
                i = j;
            } else {
                i += 1;
            }
            continue;
        };

        let changed = if rule.flags.host {
            output != current_host
        } else {
            output != subject
        };
        if changed {
            rewritten = true;
            if rule.flags.host {
                tracing::debug!(
                    from = %current_host,
                    to = %output,
                    pattern = %rule.pattern_source(),
                    "rewrote host"
                );
                current_host = output;
                host_changed = true;
            } else {
                tracing::debug!(
                    from = %subject,
                    to = %output,
                    pattern = %rule.pattern_source(),
                    "rewrote subject"
                );
                subject = output;
            }
        }

        // Query string policy is sticky across the pass.
        qsa |= rule.flags.qsappend;
        qsd |= rule.flags.qsdiscard;

        if rule.flags.forbidden {
            terminal = Some(TerminalAction::Forbidden);
            break;
        }
        if rule.flags.gone {
            terminal = Some(TerminalAction::Gone);
            break;
        }
        if let Some(status) = rule.flags.redirect {
            let target = assemble_redirect(
                &subject,
                original_query,
                qsa,
                qsd,
                context_path,
                rule.flags.noescape,
            );
            terminal = Some(TerminalAction::Redirect { target, status });
            break;
        }

        if let Some(cookie) = cookie {
            effects.cookies.push(cookie);
        }
        for (name, value) in env {
            // Later rules see the attribute through %{ENV:name}.
            overlay.set(name.clone(), value.clone());
            effects.attributes.push((name, value));
        }
        if let Some(content_type) = content_type {
            effects.content_type = Some(content_type);
        }
        if rule.flags.pipeline_skip {
            effects.pipeline_skip = true;
        }

        if rule.flags.last {
            break;
        }
        if rule.flags.next {
            if restarts >= MAX_RESTARTS {
                tracing::warn!(
                    cap = MAX_RESTARTS,
                    subject = %subject,
                    "restart cap reached, stopping the pass"
                );
                break;
            }
            restarts += 1;
            i = 0;
            continue;
        }
        i += rule.flags.skip;
        i += 1;
    }

    let (final_path, final_query) = if rewritten {
        let (path_part, rewritten_query) = split_subject(&subject);
        let final_path = encode::unmask_reserved(path_part);
        let final_query = match rewritten_query {
            Some(rq) => {
                let mut wire = encode::encode_query(&encode::unmask_reserved(rq));
                if qsa && !qsd && !original_query.is_empty() {
                    if !wire.is_empty() {
                        wire.push('&');
                    }
                    wire.push_str(original_query);
                }
                if wire.is_empty() {
                    None
                } else {
                    Some(wire)
                }
            }
            None => {
                if qsd {
                    None
                } else {
                    query.filter(|q| !q.is_empty()).map(str::to_string)
                }
            }
        };
        (final_path, final_query)
    } else {
        (
            path.to_string(),
            query.filter(|q| !q.is_empty()).map(str::to_string),
        )
    };

    RewriteOutcome {
        path: final_path,
        host: if host_changed {
            Some(current_host)
        } else {
            None
        },
        query: final_query,
        rewritten,
        terminal,
        effects,
    }
}

/// Assemble an external redirect target from the current subject.
///
/// The path part is re-encoded for the wire. The original query is appended
/// verbatim when the substitution produced no query of its own; a rewritten
/// query replaces it (qsa appends the original after `&`, qsd discards it,
/// and a bare trailing `?` drops the query entirely).
fn assemble_redirect(
    subject: &str,
    original_query: &str,
    qsa: bool,
    qsd: bool,
    context_path: Option<&str>,
    noescape: bool,
) -> String {
    let (path_part, rewritten_query) = split_subject(subject);
    let mut target = encode::encode_path(&encode::unmask_reserved(path_part));

    if !qsd && !original_query.is_empty() {
        match rewritten_query {
            None => {
                target.push('?');
                target.push_str(original_query);
            }
            Some("") => {}
            Some(rq) if qsa => {
                target.push('?');
                target.push_str(&encode::encode_query(&encode::unmask_reserved(rq)));
                target.push('&');
                target.push_str(original_query);
            }
            Some(rq) => {
                target.push('?');
                target.push_str(&encode::encode_query(&encode::unmask_reserved(rq)));
            }
        }
    } else if let Some(rq) = rewritten_query {
        if !rq.is_empty() {
            target.push('?');
            target.push_str(&encode::encode_query(&encode::unmask_reserved(rq)));
        }
    }

    if let Some(prefix) = context_path {
        if target.starts_with('/') && !has_scheme(&target) {
            target.insert_str(0, prefix);
        }
    }

    if noescape {
        return encode::decode(&target);
    }
    target
}

fn split_subject(subject: &str) -> (&str, Option<&str>) {
    match subject.find('?') {
        Some(idx) => (&subject[..idx], Some(&subject[idx + 1..])),
        None => (subject, None),
    }
}

/// RFC 3986 scheme prefix, e.g. `https:` in an absolute URL.
static SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new("^[a-zA-Z][a-zA-Z0-9+.-]*:").unwrap());

fn has_scheme(target: &str) -> bool {
    SCHEME.is_match(target)
}

/// Resolver wrapper that layers attributes set by `E=` flags over the
/// caller's resolver, so rules later in the pass can read them back.
struct EnvOverlay<'a> {
    inner: &'a dyn Resolver,
    entries: Vec<(String, String)>,
}

impl<'a> EnvOverlay<'a> {
    fn new(inner: &'a dyn Resolver) -> Self {
        Self {
            inner,
            entries: Vec::new(),
        }
    }

    fn set(&mut self, name: String, value: String) {
        self.entries.push((name, value));
    }
}

impl Resolver for EnvOverlay<'_> {
    fn resolve(&self, name: &str) -> String {
        self.inner.resolve(name)
    }

    fn resolve_env(&self, name: &str) -> String {
        for (entry_name, value) in self.entries.iter().rev() {
            if entry_name == name {
                return value.clone();
            }
        }
        self.inner.resolve_env(name)
    }

    fn resolve_ssl(&self, name: &str) -> String {
        self.inner.resolve_ssl(name)
    }

    fn resolve_http(&self, name: &str) -> String {
        self.inner.resolve_http(name)
    }

    fn resolve_resource(&self, kind: ResourceKind, path: &str) -> bool {
        self.inner.resolve_resource(kind, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::RequestContext;

    fn run_with(
        rules: &str,
        path: &str,
        query: Option<&str>,
        context_path: Option<&str>,
    ) -> RewriteOutcome {
        let ruleset = CompiledRuleset::from_string(rules).unwrap();
        let mut ctx = RequestContext::new(path);
        ctx.query_string = query.map(str::to_string);
        ctx.server_name = "localhost".to_string();
        run(&ruleset, path, "localhost", query, context_path, &ctx)
    }

    fn run_rules(rules: &str, path: &str, query: Option<&str>) -> RewriteOutcome {
        run_with(rules, path, query, None)
    }

    #[test]
    fn test_single_rewrite() {
        let outcome = run_rules("RewriteRule ^/old$ /new", "/old", None);
        assert_eq!(outcome.path, "/new");
        assert!(outcome.rewritten);
        assert!(outcome.terminal.is_none());
    }

    #[test]
    fn test_no_match_passes_through() {
        let outcome = run_rules("RewriteRule ^/old$ /new", "/other", Some("x=1"));
        assert_eq!(outcome.path, "/other");
        assert_eq!(outcome.query.as_deref(), Some("x=1"));
        assert!(!outcome.rewritten);
    }

    #[test]
    fn test_noop_rule_reports_unchanged() {
        let outcome = run_rules("RewriteRule ^/keep$ -", "/keep", None);
        assert_eq!(outcome.path, "/keep");
        assert!(!outcome.rewritten);
    }

    #[test]
    fn test_backreference_swap() {
        let outcome = run_rules("RewriteRule ^/(a)/(b)$ /$2/$1", "/a/b", None);
        assert_eq!(outcome.path, "/b/a");
    }

    #[test]
    fn test_chain_failure_skips_group_resumes_after() {
        let rules = r"
            RewriteRule ^/nomatch$ /x [C]
            RewriteRule ^/start$ /wrong [C]
            RewriteRule ^/start$ /right
        ";
        let outcome = run_rules(rules, "/start", None);
        assert_eq!(outcome.path, "/right");
    }

    #[test]
    fn test_chain_match_continues_normally() {
        let rules = r"
            RewriteRule ^/start$ /mid [C]
            RewriteRule ^/mid$ /end
        ";
        let outcome = run_rules(rules, "/start", None);
        assert_eq!(outcome.path, "/end");
    }

    #[test]
    fn test_last_stops_pass() {
        let rules = r"
            RewriteRule ^/a$ /b [L]
            RewriteRule ^/b$ /c
        ";
        let outcome = run_rules(rules, "/a", None);
        assert_eq!(outcome.path, "/b");
    }

    #[test]
    fn test_next_restarts_from_first_rule() {
        // Without the restart, rule order would leave /b in place.
        let rules = r"
            RewriteRule ^/b$ /c
            RewriteRule ^/a$ /b [N]
        ";
        let outcome = run_rules(rules, "/a", None);
        assert_eq!(outcome.path, "/c");
    }

    #[test]
    fn test_restart_cap_terminates() {
        // Matches its own output forever; the pass must stop at the cap.
        let outcome = run_rules("RewriteRule ^/(x*)$ /x$1 [N]", "/", None);
        let expected = format!("/{}", "x".repeat(MAX_RESTARTS + 1));
        assert_eq!(outcome.path, expected);
    }

    #[test]
    fn test_skip_flag_skips_following_rule() {
        let rules = r"
            RewriteRule ^/a$ /b [S=1]
            RewriteRule ^/b$ /skipped
            RewriteRule ^/b$ /kept
        ";
        let outcome = run_rules(rules, "/a", None);
        assert_eq!(outcome.path, "/kept");
    }

    #[test]
    fn test_forbidden() {
        let outcome = run_rules("RewriteRule ^/private/.*$ - [F]", "/private/x", None);
        assert_eq!(outcome.terminal, Some(TerminalAction::Forbidden));
        assert_eq!(outcome.status(), Some(403));
        assert!(!outcome.rewritten);
    }

    #[test]
    fn test_gone() {
        let outcome = run_rules("RewriteRule ^/retired$ - [G]", "/retired", None);
        assert_eq!(outcome.terminal, Some(TerminalAction::Gone));
        assert_eq!(outcome.status(), Some(410));
    }

    #[test]
    fn test_forbidden_wins_over_redirect() {
        let outcome = run_rules("RewriteRule ^/both$ /elsewhere [F,R=301]", "/both", None);
        assert_eq!(outcome.terminal, Some(TerminalAction::Forbidden));
    }

    #[test]
    fn test_redirect_default_status() {
        let outcome = run_rules("RewriteRule ^/old$ /new [R]", "/old", None);
        assert_eq!(
            outcome.terminal,
            Some(TerminalAction::Redirect {
                target: "/new".to_string(),
                status: 302,
            })
        );
    }

    #[test]
    fn test_redirect_statuses() {
        let outcome = run_rules("RewriteRule ^/old$ /new [R=301]", "/old", None);
        assert_eq!(outcome.status(), Some(301));

        let outcome = run_rules("RewriteRule ^/old$ /new [R=permanent]", "/old", None);
        assert_eq!(outcome.status(), Some(301));
    }

    #[test]
    fn test_redirect_keeps_original_query_verbatim() {
        let outcome = run_rules("RewriteRule ^/old$ /new [R]", "/old", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/new?x=1");
    }

    #[test]
    fn test_redirect_rewritten_query_replaces_original() {
        let outcome = run_rules("RewriteRule ^/old$ /new?a=b [R]", "/old", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/new?a=b");
    }

    #[test]
    fn test_redirect_qsa_appends_original() {
        let outcome = run_rules("RewriteRule ^/old$ /new?a=b [R,QSA]", "/old", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/new?a=b&x=1");
    }

    #[test]
    fn test_redirect_trailing_question_drops_query() {
        let outcome = run_rules("RewriteRule ^/old$ /new? [R]", "/old", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/new");
    }

    #[test]
    fn test_redirect_qsd_discards_original() {
        let outcome = run_rules("RewriteRule ^/old$ /new [R,QSD]", "/old", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/new");
    }

    #[test]
    fn test_redirect_context_path_prefix() {
        let outcome = run_with("RewriteRule ^/old$ /new [R]", "/old", None, Some("/app"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/app/new");
    }

    #[test]
    fn test_redirect_absolute_url_not_prefixed() {
        let outcome = run_with(
            "RewriteRule ^/away$ https://example.com/x [R]",
            "/away",
            None,
            Some("/app"),
        );
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "https://example.com/x");
    }

    #[test]
    fn test_redirect_encodes_path() {
        let outcome = run_rules("RewriteRule ^/go/(.*)$ /$1 [R]", "/go/a b", None);
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/a%20b");
    }

    #[test]
    fn test_redirect_noescape() {
        let outcome = run_rules("RewriteRule ^/go/(.*)$ /$1 [R,NE]", "/go/a b", None);
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/a b");
    }

    #[test]
    fn test_redirect_utf8_path_percent_encoded() {
        let outcome = run_rules("RewriteRule ^/café$ /résumé [R]", "/café", None);
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/r%C3%A9sum%C3%A9");
    }

    #[test]
    fn test_escaped_backrefs_reencoded_at_redirect() {
        // B percent-encodes the inserted group; redirect assembly encodes
        // the percent signs again on the way out.
        let outcome = run_rules("RewriteRule ^/go/(.*)$ /out?q=$1 [R,B]", "/go/a b", None);
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/out?q=a%2520b");
    }

    #[test]
    fn test_qsa_is_sticky_across_rules() {
        let rules = r"
            RewriteRule ^/a$ /b [QSA]
            RewriteRule ^/b$ /c?n=1 [R]
        ";
        let outcome = run_rules(rules, "/a", Some("x=1"));
        let Some(TerminalAction::Redirect { target, .. }) = outcome.terminal else {
            panic!("expected redirect");
        };
        assert_eq!(target, "/c?n=1&x=1");
    }

    #[test]
    fn test_pass_through_query_replacement() {
        let outcome = run_rules("RewriteRule ^/old$ /new?a=b", "/old", Some("x=1"));
        assert_eq!(outcome.path, "/new");
        assert_eq!(outcome.query.as_deref(), Some("a=b"));
    }

    #[test]
    fn test_pass_through_qsa() {
        let outcome = run_rules("RewriteRule ^/old$ /new?a=b [QSA]", "/old", Some("x=1"));
        assert_eq!(outcome.query.as_deref(), Some("a=b&x=1"));
    }

    #[test]
    fn test_pass_through_qsd_discards_original() {
        let outcome = run_rules("RewriteRule ^/old$ /new [QSD]", "/old", Some("x=1"));
        assert_eq!(outcome.path, "/new");
        assert_eq!(outcome.query, None);
    }

    #[test]
    fn test_cookie_side_effect() {
        let outcome = run_rules(
            "RewriteRule ^/item/(.*)$ /show [CO=last_item:$1]",
            "/item/42",
            None,
        );
        assert_eq!(outcome.effects.cookies.len(), 1);
        assert_eq!(outcome.effects.cookies[0].name, "last_item");
        assert_eq!(outcome.effects.cookies[0].value, "42");
    }

    #[test]
    fn test_env_attribute_recorded() {
        let outcome = run_rules(
            "RewriteRule ^/item/(.*)$ /show [E=ITEM:$1]",
            "/item/42",
            None,
        );
        assert_eq!(
            outcome.effects.attributes,
            vec![("ITEM".to_string(), "42".to_string())]
        );
    }

    #[test]
    fn test_env_visible_to_later_rules() {
        let rules = r"
            RewriteRule ^/first$ /second [E=STAGE:one]
            RewriteCond %{ENV:STAGE} =one
            RewriteRule ^/second$ /third
        ";
        let outcome = run_rules(rules, "/first", None);
        assert_eq!(outcome.path, "/third");
    }

    #[test]
    fn test_content_type_side_effect() {
        let outcome = run_rules("RewriteRule ^/raw/.*$ - [T=text/plain]", "/raw/x", None);
        assert_eq!(outcome.effects.content_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn test_pipeline_skip_side_effect() {
        let outcome = run_rules("RewriteRule ^/fast$ - [VS]", "/fast", None);
        assert!(outcome.effects.pipeline_skip);
    }

    #[test]
    fn test_host_rewrite() {
        let outcome = run_rules(r"RewriteRule ^www\.(.*)$ $1 [H]", "/page", None);
        assert_eq!(outcome.host, None);

        let ruleset = CompiledRuleset::from_string(r"RewriteRule ^www\.(.*)$ $1 [H]").unwrap();
        let ctx = RequestContext::new("/page");
        let outcome = run(&ruleset, "/page", "www.example.com", None, None, &ctx);
        assert_eq!(outcome.host.as_deref(), Some("example.com"));
        assert_eq!(outcome.path, "/page");
        assert!(outcome.rewritten);
    }

    #[test]
    fn test_reserved_characters_survive_rewrite() {
        // Literal ';' in the path is masked during matching and restored in
        // the outcome.
        let outcome = run_rules("RewriteRule ^/(.*)$ /x/$1", "/a;b", None);
        assert_eq!(outcome.path, "/x/a;b");
    }

    #[test]
    fn test_conditions_gate_rules_in_pass() {
        let rules = r"
            RewriteCond %{REQUEST_METHOD} =POST
            RewriteRule ^/form$ /submit
            RewriteRule ^/form$ /view
        ";
        let outcome = run_rules(rules, "/form", None);
        assert_eq!(outcome.path, "/view");
    }

    #[test]
    fn test_map_lookup_in_pass() {
        let rules = r"
            RewriteMap upper int:toupper
            RewriteRule ^/name/(.*)$ /NAME/${upper:$1}
        ";
        let outcome = run_rules(rules, "/name/ada", None);
        assert_eq!(outcome.path, "/NAME/ADA");
    }

    #[test]
    fn test_map_default_fallback_in_pass() {
        let dir = tempfile::tempdir().unwrap();
        let map_path = dir.path().join("hosts.txt");
        std::fs::write(&map_path, "known target\n").unwrap();

        let rules = format!(
            "RewriteMap hosts txt:{}\nRewriteRule ^/(.*)$ /${{hosts:$1|fallback}}",
            map_path.display()
        );
        let outcome = run_rules(&rules, "/missing", None);
        assert_eq!(outcome.path, "/fallback");
    }

    #[test]
    fn test_has_scheme() {
        assert!(has_scheme("https://example.com/x"));
        assert!(has_scheme("mailto:user@example.com"));
        assert!(has_scheme("a+b-c.d:rest"));
        assert!(!has_scheme("/relative/path"));
        assert!(!has_scheme("//protocol/relative"));
        assert!(!has_scheme("no-scheme/path:later"));
    }
}
