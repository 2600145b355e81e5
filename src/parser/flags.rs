//! Flag list parsing for RewriteRule and RewriteCond directives.
//!
//! Flags appear as a bracketed, comma separated list after the main
//! arguments, e.g. `[L,NC,CO=session:abc:example.com]`. Every flag has a
//! long spelling and a short one; both are accepted.

use crate::error::{Error, Result};
use std::fmt;

/// Parsed RewriteRule flags.
#[derive(Debug, Clone, Default)]
pub struct RuleFlags {
    /// B: percent-encode text inserted by rule back-references.
    pub escape_backrefs: bool,
    /// C|chain: on failure, skip the rules chained to this one.
    pub chain: bool,
    /// CO|cookie: set a cookie when the rule matches.
    pub cookie: Option<CookieFlag>,
    /// E|env: request attributes to set when the rule matches. The value
    /// part is a template expanded at match time.
    pub env: Vec<(String, String)>,
    /// F|forbidden: finish the request with status 403.
    pub forbidden: bool,
    /// G|gone: finish the request with status 410.
    pub gone: bool,
    /// H|host: match and rewrite the host name instead of the path.
    pub host: bool,
    /// L|last: stop the pass after this rule.
    pub last: bool,
    /// N|next: restart the pass from the first rule.
    pub next: bool,
    /// NC|nocase: case-insensitive pattern match.
    pub nocase: bool,
    /// NE|noescape: do not percent-encode the assembled redirect target.
    pub noescape: bool,
    /// QSA|qsappend: append the original query string to the rewritten one.
    pub qsappend: bool,
    /// QSD|qsdiscard: discard the original query string.
    pub qsdiscard: bool,
    /// R|redirect: send an external redirect with this status.
    pub redirect: Option<u16>,
    /// S|skip: skip the next N rules when this rule matches.
    pub skip: usize,
    /// T|type: response content type to set, as a template.
    pub content_type: Option<String>,
    /// VS|valveSkip: skip the remainder of the hosting pipeline.
    pub pipeline_skip: bool,
}

/// Cookie description from a CO flag.
///
/// The value field is a template expanded when the rule matches; the other
/// fields are taken literally from the flag.
#[derive(Debug, Clone)]
pub struct CookieFlag {
    /// Cookie name.
    pub name: String,
    /// Cookie value template.
    pub value: String,
    /// Cookie domain.
    pub domain: Option<String>,
    /// Max age in seconds, -1 for a session cookie.
    pub lifetime: i64,
    /// Cookie path.
    pub path: Option<String>,
    /// Secure attribute.
    pub secure: bool,
    /// HttpOnly attribute.
    pub http_only: bool,
}

/// Parsed RewriteCond flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CondFlags {
    /// NC|nocase: case-insensitive comparison.
    pub nocase: bool,
    /// OR|ornext: OR this condition with the next one instead of AND.
    pub ornext: bool,
}

impl fmt::Display for RuleFlags {
    /// Renders the canonical short form, e.g. `L,NC,R=301`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.escape_backrefs {
            parts.push("B".to_string());
        }
        if self.chain {
            parts.push("C".to_string());
        }
        if let Some(cookie) = &self.cookie {
            parts.push(format!("CO={cookie}"));
        }
        for (name, value) in &self.env {
            parts.push(format!("E={name}:{value}"));
        }
        if self.forbidden {
            parts.push("F".to_string());
        }
        if self.gone {
            parts.push("G".to_string());
        }
        if self.host {
            parts.push("H".to_string());
        }
        if self.last {
            parts.push("L".to_string());
        }
        if self.next {
            parts.push("N".to_string());
        }
        if self.nocase {
            parts.push("NC".to_string());
        }
        if self.noescape {
            parts.push("NE".to_string());
        }
        if self.qsappend {
            parts.push("QSA".to_string());
        }
        if self.qsdiscard {
            parts.push("QSD".to_string());
        }
        if let Some(status) = self.redirect {
            parts.push(format!("R={status}"));
        }
        if self.skip > 0 {
            parts.push(format!("S={}", self.skip));
        }
        if let Some(content_type) = &self.content_type {
            parts.push(format!("T={content_type}"));
        }
        if self.pipeline_skip {
            parts.push("VS".to_string());
        }
        f.write_str(&parts.join(","))
    }
}

impl fmt::Display for CookieFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.value)?;
        let defaulted = self.domain.is_none()
            && self.lifetime == -1
            && self.path.is_none()
            && !self.secure
            && !self.http_only;
        if defaulted {
            return Ok(());
        }
        write!(
            f,
            ":{}:{}:{}:{}:{}",
            self.domain.as_deref().unwrap_or(""),
            self.lifetime,
            self.path.as_deref().unwrap_or(""),
            self.secure,
            self.http_only
        )
    }
}

/// Parses the comma separated body of a rule flag list (brackets already
/// stripped by the caller).
pub fn parse_rule_flags(list: &str) -> Result<RuleFlags> {
    let mut flags = RuleFlags::default();

    for raw in list.split(',') {
        let token = raw.trim();
        let (name, value) = split_flag(token);

        match name {
            "B" => {
                reject_value(name, value)?;
                flags.escape_backrefs = true;
            }
            "chain" | "C" => {
                reject_value(name, value)?;
                flags.chain = true;
            }
            "cookie" | "CO" => {
                flags.cookie = Some(parse_cookie(require_value(name, value)?)?);
            }
            "env" | "E" => {
                flags.env.push(parse_env(require_value(name, value)?)?);
            }
            "forbidden" | "F" => {
                reject_value(name, value)?;
                flags.forbidden = true;
            }
            "gone" | "G" => {
                reject_value(name, value)?;
                flags.gone = true;
            }
            "host" | "H" => {
                reject_value(name, value)?;
                flags.host = true;
            }
            "last" | "L" => {
                reject_value(name, value)?;
                flags.last = true;
            }
            "next" | "N" => {
                reject_value(name, value)?;
                flags.next = true;
            }
            "nocase" | "NC" => {
                reject_value(name, value)?;
                flags.nocase = true;
            }
            "noescape" | "NE" => {
                reject_value(name, value)?;
                flags.noescape = true;
            }
            "qsappend" | "QSA" => {
                reject_value(name, value)?;
                flags.qsappend = true;
            }
            "qsdiscard" | "QSD" => {
                reject_value(name, value)?;
                flags.qsdiscard = true;
            }
            "redirect" | "R" => {
                flags.redirect = Some(parse_redirect(value)?);
            }
            "skip" | "S" => {
                let v = require_value(name, value)?;
                flags.skip = v.parse().map_err(|_| Error::InvalidFlagArgument {
                    flag: name.to_string(),
                    message: format!("expected a number, got '{v}'"),
                })?;
            }
            "type" | "T" => {
                flags.content_type = Some(require_value(name, value)?.to_string());
            }
            "valveSkip" | "VS" => {
                reject_value(name, value)?;
                flags.pipeline_skip = true;
            }
            _ => {
                return Err(Error::UnknownFlag {
                    name: name.to_string(),
                });
            }
        }
    }

    // Discarding and appending the query string are mutually exclusive;
    // discard wins.
    if flags.qsdiscard {
        flags.qsappend = false;
    }

    Ok(flags)
}

/// Parses the comma separated body of a condition flag list.
pub fn parse_cond_flags(list: &str) -> Result<CondFlags> {
    let mut flags = CondFlags::default();

    for raw in list.split(',') {
        let token = raw.trim();
        match token {
            "nocase" | "NC" => flags.nocase = true,
            "ornext" | "OR" => flags.ornext = true,
            _ => {
                return Err(Error::UnknownFlag {
                    name: token.to_string(),
                });
            }
        }
    }

    Ok(flags)
}

fn split_flag(token: &str) -> (&str, Option<&str>) {
    match token.find('=') {
        Some(idx) => (&token[..idx], Some(&token[idx + 1..])),
        None => (token, None),
    }
}

fn require_value<'a>(flag: &str, value: Option<&'a str>) -> Result<&'a str> {
    value.ok_or_else(|| Error::InvalidFlagArgument {
        flag: flag.to_string(),
        message: "missing value".to_string(),
    })
}

fn reject_value(flag: &str, value: Option<&str>) -> Result<()> {
    if value.is_some() {
        return Err(Error::InvalidFlagArgument {
            flag: flag.to_string(),
            message: "flag takes no value".to_string(),
        });
    }
    Ok(())
}

/// Cookie flag value: `name:value[:domain[:lifetime[:path[:secure[:httpOnly]]]]]`.
fn parse_cookie(value: &str) -> Result<CookieFlag> {
    let invalid = |message: String| Error::InvalidFlagArgument {
        flag: "cookie".to_string(),
        message,
    };

    let fields: Vec<&str> = value.split(':').collect();
    if fields.len() < 2 {
        return Err(invalid(
            "expected name:value[:domain[:lifetime[:path[:secure[:httpOnly]]]]]".to_string(),
        ));
    }
    if fields.len() > 7 {
        return Err(invalid(format!("too many fields ({})", fields.len())));
    }
    if fields[0].is_empty() {
        return Err(invalid("cookie name is empty".to_string()));
    }

    let mut cookie = CookieFlag {
        name: fields[0].to_string(),
        value: fields[1].to_string(),
        domain: None,
        lifetime: -1,
        path: None,
        secure: false,
        http_only: false,
    };

    if let Some(domain) = fields.get(2).filter(|s| !s.is_empty()) {
        cookie.domain = Some(domain.to_string());
    }
    if let Some(lifetime) = fields.get(3) {
        cookie.lifetime = lifetime
            .parse()
            .map_err(|_| invalid(format!("invalid lifetime '{lifetime}'")))?;
    }
    if let Some(path) = fields.get(4).filter(|s| !s.is_empty()) {
        cookie.path = Some(path.to_string());
    }
    if let Some(secure) = fields.get(5) {
        cookie.secure = secure.eq_ignore_ascii_case("true");
    }
    if let Some(http_only) = fields.get(6) {
        cookie.http_only = http_only.eq_ignore_ascii_case("true");
    }

    Ok(cookie)
}

/// Env flag value: `NAME:VALUE` where VALUE is a template.
fn parse_env(value: &str) -> Result<(String, String)> {
    match value.find(':') {
        Some(idx) if idx > 0 && idx < value.len() - 1 => {
            Ok((value[..idx].to_string(), value[idx + 1..].to_string()))
        }
        _ => Err(Error::InvalidFlagArgument {
            flag: "env".to_string(),
            message: format!("expected NAME:VALUE, got '{value}'"),
        }),
    }
}

/// Redirect flag value: bare (302), `temp`, `permanent`, `seeother` or a
/// numeric status code.
fn parse_redirect(value: Option<&str>) -> Result<u16> {
    let Some(value) = value else {
        return Ok(302);
    };

    match value {
        "temp" => Ok(302),
        "permanent" => Ok(301),
        "seeother" => Ok(303),
        _ => {
            let status: u16 = value.parse().map_err(|_| Error::InvalidFlagArgument {
                flag: "redirect".to_string(),
                message: format!("invalid status '{value}'"),
            })?;
            if !(100..600).contains(&status) {
                return Err(Error::InvalidFlagArgument {
                    flag: "redirect".to_string(),
                    message: format!("status {status} out of range"),
                });
            }
            Ok(status)
        }
    }
}
