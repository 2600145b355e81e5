//! Result types returned by a rewrite pass.

/// An action that ends rule processing and must be answered by the caller
/// instead of forwarding the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalAction {
    /// Refuse the request with 403.
    Forbidden,
    /// Refuse the request with 410.
    Gone,
    /// Send an external redirect to `target`.
    Redirect {
        /// Fully assembled redirect target, including any query string.
        target: String,
        /// Redirect status code, e.g. 301 or 302.
        status: u16,
    },
}

impl TerminalAction {
    /// HTTP status code the caller should send.
    pub fn status(&self) -> u16 {
        match self {
            TerminalAction::Forbidden => 403,
            TerminalAction::Gone => 410,
            TerminalAction::Redirect { status, .. } => *status,
        }
    }
}

/// A cookie a matched rule asks the caller to set on the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    /// Cookie name.
    pub name: String,
    /// Expanded cookie value.
    pub value: String,
    /// Domain attribute.
    pub domain: Option<String>,
    /// Max-Age in seconds, `-1` for a session cookie.
    pub lifetime: i64,
    /// Path attribute.
    pub path: Option<String>,
    /// Secure attribute.
    pub secure: bool,
    /// HttpOnly attribute.
    pub http_only: bool,
}

/// Side effects accumulated while rules matched. These apply even when the
/// request is ultimately forwarded unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    /// Cookies to set on the response.
    pub cookies: Vec<Cookie>,
    /// Request attributes to expose to the application.
    pub attributes: Vec<(String, String)>,
    /// Response content type override.
    pub content_type: Option<String>,
    /// Skip further processing stages for this request.
    pub pipeline_skip: bool,
}

/// The final result of running a ruleset over one request.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// Rewritten request path, percent-decoded.
    pub path: String,
    /// Rewritten host, present only when a host rule changed it.
    pub host: Option<String>,
    /// Query string in wire form, without the leading `?`.
    pub query: Option<String>,
    /// Whether any rule changed the path, host or query.
    pub rewritten: bool,
    /// Action that ends processing, if one fired.
    pub terminal: Option<TerminalAction>,
    /// Side effects collected from matched rules.
    pub effects: SideEffects,
}

impl RewriteOutcome {
    /// Status code of the terminal action, if any.
    pub fn status(&self) -> Option<u16> {
        self.terminal.as_ref().map(TerminalAction::status)
    }
}
