//! Close-equality tolerances, optionally overridden per backend and test by a JSON file
//! named in `LAYERKIT_TOLERANCE_CONFIG`.
//!
//! ```json
//! { "default": { "atol": 1e-5 }, "rules": [{ "backend": "cpu*", "test": "dense_*", "rtol": 1e-4 }] }
//! ```
//!
//! Rule precedence is backend-only < test-only < backend-and-test.

use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use serde::Deserialize;

use super::error::{ConformanceError, ConformanceResult};

pub const DEFAULT_ATOL: f64 = 1e-6;
pub const DEFAULT_RTOL: f64 = 1e-6;

static TOLERANCE_FILE: OnceLock<Result<ToleranceFile, String>> = OnceLock::new();

#[derive(Debug, Clone, Default, Deserialize)]
struct ToleranceFile {
    #[serde(default)]
    default: Option<Override>,
    #[serde(default)]
    rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Rule {
    #[serde(default)]
    backend: Option<String>,
    #[serde(default)]
    test: Option<String>,
    #[serde(default)]
    atol: Option<f64>,
    #[serde(default)]
    rtol: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
struct Override {
    #[serde(default)]
    atol: Option<f64>,
    #[serde(default)]
    rtol: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub atol: f64,
    pub rtol: f64,
}

impl Default for Tolerance {
    fn default() -> Self {
        Tolerance {
            atol: DEFAULT_ATOL,
            rtol: DEFAULT_RTOL,
        }
    }
}

impl Tolerance {
    fn apply(&mut self, o: &Override) {
        if let Some(atol) = o.atol {
            self.atol = atol;
        }
        if let Some(rtol) = o.rtol {
            self.rtol = rtol;
        }
    }

    /// Tolerance for `test_name` on `backend`, honouring the configured override file.
    pub fn resolve(backend: &str, test_name: &str) -> ConformanceResult<Tolerance> {
        let file = TOLERANCE_FILE
            .get_or_init(|| match crate::env::tolerance_config_path() {
                Some(path) => load(path),
                None => Ok(ToleranceFile::default()),
            })
            .as_ref()
            .map_err(|err| ConformanceError::config(err.clone()))?;
        Ok(resolve_with(file, backend, test_name))
    }
}

fn load(path: &Path) -> Result<ToleranceFile, String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read tolerance config {}: {err}", path.display()))?;
    let file = serde_json::from_str(&contents)
        .map_err(|err| format!("failed to parse tolerance config {}: {err}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded tolerance config");
    Ok(file)
}

fn resolve_with(file: &ToleranceFile, backend: &str, test_name: &str) -> Tolerance {
    let mut resolved = Tolerance::default();
    if let Some(defaults) = &file.default {
        resolved.apply(defaults);
    }
    let mut backend_rule = None;
    let mut test_rule = None;
    let mut backend_test_rule = None;
    for rule in &file.rules {
        let backend_match = rule
            .backend
            .as_deref()
            .is_some_and(|pattern| matches_pattern(backend, pattern));
        let test_match = rule
            .test
            .as_deref()
            .is_some_and(|pattern| matches_pattern(test_name, pattern));
        let o = Override {
            atol: rule.atol,
            rtol: rule.rtol,
        };
        match (backend_match, test_match) {
            (true, true) => backend_test_rule = Some(o),
            (false, true) if rule.backend.is_none() => test_rule = Some(o),
            (true, false) if rule.test.is_none() => backend_rule = Some(o),
            _ => {}
        }
    }
    for o in [backend_rule, test_rule, backend_test_rule].iter().flatten() {
        resolved.apply(o);
    }
    resolved
}

/// Glob match supporting `*` wildcards.
fn matches_pattern(value: &str, pattern: &str) -> bool {
    if !pattern.contains('*') {
        return value == pattern;
    }
    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !value.starts_with(first) || value.len() < first.len() + last.len() {
        return false;
    }
    let mut offset = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match value[offset..].find(part) {
            Some(found) => offset += found + part.len(),
            None => return false,
        }
    }
    value.len() - offset >= last.len() && value.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(matches_pattern("dense_basic", "dense_*"));
        assert!(matches_pattern("dense_basic", "*basic"));
        assert!(matches_pattern("dense_basic", "*"));
        assert!(matches_pattern("a_b_c", "a*b*c"));
        assert!(!matches_pattern("dense_basic", "dropout_*"));
        assert!(!matches_pattern("ab", "ab*b"));
    }

    #[test]
    fn backend_and_test_rule_wins() {
        let file: ToleranceFile = serde_json::from_str(
            r#"{
                "default": {"atol": 1e-5},
                "rules": [
                    {"backend": "cpu", "atol": 1e-3},
                    {"test": "dense_*", "rtol": 1e-2},
                    {"backend": "cpu", "test": "dense_*", "atol": 1e-1}
                ]
            }"#,
        )
        .unwrap();
        let t = resolve_with(&file, "cpu", "dense_basic");
        assert_eq!(t, Tolerance { atol: 1e-1, rtol: 1e-2 });
        let t = resolve_with(&file, "cpu", "dropout_basic");
        assert_eq!(t, Tolerance { atol: 1e-3, rtol: DEFAULT_RTOL });
        let t = resolve_with(&file, "cpu-dense", "other");
        assert_eq!(t, Tolerance { atol: 1e-5, rtol: DEFAULT_RTOL });
    }
}
