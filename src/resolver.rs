//! Server variable resolution for condition tests and substitutions.
//!
//! `%{NAME}` expansions and `-d`/`-f`/`-s` condition tests are answered by
//! a [`Resolver`]. The engine never fails on an unknown variable: absent
//! values resolve to the empty string, matching how conditions degrade in
//! the original mod_rewrite syntax.

use chrono::Local;
use std::collections::HashMap;
use std::path::PathBuf;

/// Kind of filesystem test in a `-d`/`-f`/`-s` condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `-d`: the path is a directory.
    Directory,
    /// `-f`: the path is a regular file.
    File,
    /// `-s`: the path is a regular file with nonzero size.
    NonEmptyFile,
}

/// Source of values for variable expansion.
pub trait Resolver {
    /// Resolve a server variable such as `REQUEST_URI` or `TIME_YEAR`.
    fn resolve(&self, name: &str) -> String;

    /// Resolve an `%{ENV:name}` variable.
    fn resolve_env(&self, name: &str) -> String;

    /// Resolve an `%{SSL:name}` connection attribute.
    fn resolve_ssl(&self, name: &str) -> String;

    /// Resolve an `%{HTTP:name}` request header.
    fn resolve_http(&self, name: &str) -> String;

    /// Test a filesystem resource.
    fn resolve_resource(&self, kind: ResourceKind, path: &str) -> bool;
}

/// Request description backing the default [`Resolver`] implementation.
///
/// All fields are plain data so embedders can fill in whatever their server
/// knows; everything left empty resolves to the empty string.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Request method, e.g. `GET`.
    pub method: String,
    /// Protocol, e.g. `HTTP/1.1`.
    pub protocol: String,
    /// Original request URI as received, percent-encoded, without query.
    pub uri: String,
    /// Decoded request path.
    pub path: String,
    /// Raw query string, if any.
    pub query_string: Option<String>,
    /// Context path prefix under which the application is mounted.
    pub context_path: String,
    /// Client address.
    pub remote_addr: String,
    /// Client host name, falls back to the address when empty.
    pub remote_host: String,
    /// Client port.
    pub remote_port: u16,
    /// Authenticated user, if any.
    pub remote_user: Option<String>,
    /// Authentication scheme, if any.
    pub auth_type: Option<String>,
    /// Server host name.
    pub server_name: String,
    /// Server address.
    pub server_addr: String,
    /// Server port.
    pub server_port: u16,
    /// Server software identifier.
    pub server_software: String,
    /// Whether the connection is TLS.
    pub secure: bool,
    /// Filesystem root for `-d`/`-f`/`-s` tests and `DOCUMENT_ROOT`.
    pub document_root: Option<PathBuf>,
    /// Request headers, keyed by lowercase name.
    pub headers: HashMap<String, String>,
    /// Request attributes visible through `%{ENV:name}`.
    pub env: HashMap<String, String>,
    /// TLS attributes visible through `%{SSL:name}`.
    pub ssl: HashMap<String, String>,
}

impl RequestContext {
    /// Create a context for a GET request on the given decoded path.
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method: "GET".to_string(),
            protocol: "HTTP/1.1".to_string(),
            uri: path.clone(),
            path,
            ..Self::default()
        }
    }

    /// Add a request header.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_lowercase(), value.to_string());
        self
    }
}

impl Resolver for RequestContext {
    fn resolve(&self, name: &str) -> String {
        match name {
            "REQUEST_METHOD" => self.method.clone(),
            "SERVER_PROTOCOL" => self.protocol.clone(),
            "THE_REQUEST" => format!("{} {} {}", self.method, self.uri, self.protocol),
            "REQUEST_URI" => self.uri.clone(),
            "REQUEST_PATH" | "REQUEST_FILENAME" | "SCRIPT_FILENAME" => self.path.clone(),
            "QUERY_STRING" => self.query_string.clone().unwrap_or_default(),
            "CONTEXT_PATH" => self.context_path.clone(),
            "REMOTE_ADDR" => self.remote_addr.clone(),
            "REMOTE_HOST" => {
                if self.remote_host.is_empty() {
                    self.remote_addr.clone()
                } else {
                    self.remote_host.clone()
                }
            }
            "REMOTE_PORT" => self.remote_port.to_string(),
            "REMOTE_USER" => self.remote_user.clone().unwrap_or_default(),
            "AUTH_TYPE" => self.auth_type.clone().unwrap_or_default(),
            "SERVER_NAME" => self.server_name.clone(),
            "SERVER_ADDR" => self.server_addr.clone(),
            "SERVER_PORT" => self.server_port.to_string(),
            "SERVER_SOFTWARE" => self.server_software.clone(),
            "HTTPS" => if self.secure { "on" } else { "off" }.to_string(),
            "DOCUMENT_ROOT" => self
                .document_root
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            "TIME_YEAR" => Local::now().format("%Y").to_string(),
            "TIME_MON" => Local::now().format("%m").to_string(),
            "TIME_DAY" => Local::now().format("%d").to_string(),
            "TIME_HOUR" => Local::now().format("%H").to_string(),
            "TIME_MIN" => Local::now().format("%M").to_string(),
            "TIME_SEC" => Local::now().format("%S").to_string(),
            "TIME_WDAY" => Local::now().format("%w").to_string(),
            "TIME" => Local::now().format("%Y%m%d%H%M%S").to_string(),
            "HTTP_USER_AGENT" => self.resolve_http("User-Agent"),
            "HTTP_REFERER" => self.resolve_http("Referer"),
            "HTTP_COOKIE" => self.resolve_http("Cookie"),
            "HTTP_HOST" => self.resolve_http("Host"),
            "HTTP_ACCEPT" => self.resolve_http("Accept"),
            "HTTP_FORWARDED" => self.resolve_http("Forwarded"),
            _ => String::new(),
        }
    }

    fn resolve_env(&self, name: &str) -> String {
        self.env.get(name).cloned().unwrap_or_default()
    }

    fn resolve_ssl(&self, name: &str) -> String {
        self.ssl.get(name).cloned().unwrap_or_default()
    }

    fn resolve_http(&self, name: &str) -> String {
        self.headers
            .get(&name.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    fn resolve_resource(&self, kind: ResourceKind, path: &str) -> bool {
        let full = match &self.document_root {
            Some(root) => root.join(path.trim_start_matches('/')),
            None => PathBuf::from(path),
        };
        match std::fs::metadata(&full) {
            Ok(meta) => match kind {
                ResourceKind::Directory => meta.is_dir(),
                ResourceKind::File => meta.is_file(),
                ResourceKind::NonEmptyFile => meta.is_file() && meta.len() > 0,
            },
            Err(_) => false,
        }
    }
}
