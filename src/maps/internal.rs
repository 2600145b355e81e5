//! Built-in map functions (`int:` provider).

use super::RewriteMap;
use crate::encode;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Create a built-in map function by name.
pub fn create_function(name: &str) -> Result<Arc<dyn RewriteMap>> {
    match name {
        "toupper" => Ok(Arc::new(UpperMap)),
        "tolower" => Ok(Arc::new(LowerMap)),
        "escape" => Ok(Arc::new(EscapeMap)),
        "unescape" => Ok(Arc::new(UnescapeMap)),
        _ => Err(Error::UnknownMapFunction {
            name: name.to_string(),
        }),
    }
}

/// `int:toupper` - uppercase the key.
pub struct UpperMap;

impl RewriteMap for UpperMap {
    fn lookup(&self, key: &str) -> Option<String> {
        Some(key.to_uppercase())
    }

    fn name(&self) -> &'static str {
        "toupper"
    }
}

/// `int:tolower` - lowercase the key.
pub struct LowerMap;

impl RewriteMap for LowerMap {
    fn lookup(&self, key: &str) -> Option<String> {
        Some(key.to_lowercase())
    }

    fn name(&self) -> &'static str {
        "tolower"
    }
}

/// `int:escape` - percent-encode the key as a path segment.
pub struct EscapeMap;

impl RewriteMap for EscapeMap {
    fn lookup(&self, key: &str) -> Option<String> {
        Some(encode::encode_path(key))
    }

    fn name(&self) -> &'static str {
        "escape"
    }
}

/// `int:unescape` - percent-decode the key.
pub struct UnescapeMap;

impl RewriteMap for UnescapeMap {
    fn lookup(&self, key: &str) -> Option<String> {
        Some(encode::decode(key))
    }

    fn name(&self) -> &'static str {
        "unescape"
    }
}
