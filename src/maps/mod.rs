//! Named lookup maps, referenced from substitutions as `${name:key}`.
//!
//! Three providers exist: `int:` built-in string functions, `txt:` key/value
//! tables loaded from a file, and `rnd:` tables whose values are
//! `|`-separated alternatives picked at random.

mod internal;
mod text;

pub use internal::{EscapeMap, LowerMap, UnescapeMap, UpperMap};
pub use text::{RandomMap, TextMap};

use crate::error::{Error, Result};
use crate::parser::MapDirective;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// A named lookup map.
pub trait RewriteMap: Send + Sync {
    /// Look up a key, returning the mapped value if present.
    fn lookup(&self, key: &str) -> Option<String>;

    /// Get the provider name.
    fn name(&self) -> &'static str;
}

/// Compiled maps keyed by the name used in `${name:key}` lookups.
pub type MapRegistry = HashMap<String, Arc<dyn RewriteMap>>;

/// Compile a map directive into a lookup map.
///
/// `int:` accepts one optional parameter (a locale or charset name, kept
/// for configuration compatibility; lookups always operate on UTF-8).
/// `txt:` and `rnd:` accept none.
pub fn compile_map(directive: &MapDirective) -> Result<Arc<dyn RewriteMap>> {
    let invalid = |message: String| Error::InvalidMap {
        name: directive.name.clone(),
        message,
    };

    let (kind, spec) = directive
        .provider
        .split_once(':')
        .ok_or_else(|| invalid(format!("provider '{}' has no kind prefix", directive.provider)))?;

    match kind {
        "int" => {
            if directive.params.len() > 1 {
                return Err(invalid(format!(
                    "too many parameters for int:{spec} ({})",
                    directive.params.len()
                )));
            }
            internal::create_function(spec)
        }
        "txt" => {
            if !directive.params.is_empty() {
                return Err(invalid("txt maps take no parameters".to_string()));
            }
            Ok(Arc::new(TextMap::from_file(Path::new(spec))?))
        }
        "rnd" => {
            if !directive.params.is_empty() {
                return Err(invalid("rnd maps take no parameters".to_string()));
            }
            Ok(Arc::new(RandomMap::from_file(Path::new(spec))?))
        }
        _ => Err(invalid(format!("unknown provider kind '{kind}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceLocation;
    use std::io::Write;

    fn directive(name: &str, provider: &str, params: &[&str]) -> MapDirective {
        MapDirective {
            name: name.to_string(),
            provider: provider.to_string(),
            params: params.iter().map(|s| s.to_string()).collect(),
            location: SourceLocation::default(),
        }
    }

    #[test]
    fn test_compile_internal() {
        let map = compile_map(&directive("uc", "int:toupper", &[])).unwrap();
        assert_eq!(map.lookup("ab"), Some("AB".to_string()));
        assert_eq!(map.name(), "toupper");
    }

    #[test]
    fn test_internal_accepts_one_parameter() {
        let map = compile_map(&directive("uc", "int:toupper", &["en"])).unwrap();
        assert_eq!(map.lookup("ab"), Some("AB".to_string()));
    }

    #[test]
    fn test_internal_rejects_two_parameters() {
        assert!(compile_map(&directive("uc", "int:toupper", &["en", "GB"])).is_err());
    }

    #[test]
    fn test_unknown_function() {
        let err = compile_map(&directive("x", "int:reverse", &[])).err().unwrap();
        assert!(err.to_string().contains("int:reverse"), "got: {err}");
    }

    #[test]
    fn test_unknown_provider_kind() {
        assert!(compile_map(&directive("x", "dbm:/some/file", &[])).is_err());
        assert!(compile_map(&directive("x", "nocolon", &[])).is_err());
    }

    #[test]
    fn test_compile_text_map() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a aa").unwrap();
        let provider = format!("txt:{}", file.path().display());

        let map = compile_map(&directive("m", &provider, &[])).unwrap();
        assert_eq!(map.lookup("a"), Some("aa".to_string()));
    }

    #[test]
    fn test_text_map_rejects_parameters() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let provider = format!("txt:{}", file.path().display());
        assert!(compile_map(&directive("m", &provider, &["extra"])).is_err());
    }

    #[test]
    fn test_rnd_map_rejects_parameters() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let provider = format!("rnd:{}", file.path().display());
        assert!(compile_map(&directive("m", &provider, &["extra"])).is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(compile_map(&directive("m", "txt:/no/such/file.txt", &[])).is_err());
    }
}
