//! Pure checks that reject malformed input before it reaches the scheduler (§4.H).
//!
//! Nothing here touches the pool, a Worker, or the filesystem beyond `Path::is_absolute` — these
//! are all synchronous, side-effect-free functions so they're cheap to call on every request.

use fingerprint::{OptionMap, OptionValue};

use crate::error::Error;
use crate::paths::validate_path;

/// Option keys that take a path (or list of paths) and so are subject to the glob/absolute checks
/// in [`crate::paths::validate_path`].
const PATH_KEYS: &[&str] = &["input", "output", "config", "postcss", "cwd"];
/// `content` is special-cased: it may be a single path or a list of paths.
const PATH_LIST_KEYS: &[&str] = &["content"];
/// Keys whose value must be a bool.
const BOOL_KEYS: &[&str] = &[
    "minify", "watch", "poll", "optimize", "map",
];

/// Validates a normalized option map against the closed key set in the external interfaces
/// section. Unknown keys are accepted (Tailwind itself ignores them across its v3/v4 split); only
/// known keys with the wrong value shape are rejected.
pub fn validate_options(options: &OptionMap) -> Result<(), Error> {
    for (key, value) in options {
        if PATH_KEYS.contains(&key.as_str()) {
            match value {
                OptionValue::Path(p) => validate_path(key, p)?,
                OptionValue::Null => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "option {key} must be a path, got {value:?}"
                    )))
                }
            }
        } else if PATH_LIST_KEYS.contains(&key.as_str()) {
            match value {
                OptionValue::Path(p) => validate_path(key, p)?,
                OptionValue::PathList(ps) => {
                    if ps.is_empty() {
                        return Err(Error::Validation(format!(
                            "option {key} must not be an empty list"
                        )));
                    }
                    for p in ps {
                        validate_path(key, p)?;
                    }
                }
                OptionValue::Null => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "option {key} must be a path or list of paths, got {value:?}"
                    )))
                }
            }
        } else if BOOL_KEYS.contains(&key.as_str()) {
            match value {
                OptionValue::Bool(_) | OptionValue::Null => {}
                _ => {
                    return Err(Error::Validation(format!(
                        "option {key} must be a bool, got {value:?}"
                    )))
                }
            }
        }
        // Unknown keys: silently accepted, per the Tailwind CLI's own forward-compatible
        // behavior across major versions.
    }
    Ok(())
}

/// Validates a non-empty string argument intended for the external `BinaryProvider` (a download
/// URL or filesystem path). The provider itself is out of scope; this only guards the shape of
/// what's handed to it.
pub fn validate_non_empty(label: &str, value: &str) -> Result<(), Error> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{label} must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, OptionValue)]) -> OptionMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn accepts_well_typed_known_keys() {
        let options = map(&[
            ("input", OptionValue::Path("/t/in.css".to_string())),
            ("output", OptionValue::Path("/t/out.css".to_string())),
            ("minify", OptionValue::Bool(true)),
        ]);
        assert!(validate_options(&options).is_ok());
    }

    #[test]
    fn rejects_wrong_shaped_known_key() {
        let options = map(&[("minify", OptionValue::Path("/t/oops".to_string()))]);
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn allows_unknown_keys() {
        let options = map(&[("future_flag", OptionValue::Bool(true))]);
        assert!(validate_options(&options).is_ok());
    }

    #[test]
    fn rejects_glob_in_content_path() {
        let options = map(&[("content", OptionValue::Path("/t/*.html".to_string()))]);
        assert!(validate_options(&options).is_err());
    }

    #[test]
    fn rejects_empty_content_list() {
        let options = map(&[("content", OptionValue::PathList(vec![]))]);
        assert!(validate_options(&options).is_err());
    }
}
