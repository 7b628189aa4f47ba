use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

static LAYERKIT_BACKEND: OnceLock<String> = OnceLock::new();
static LAYERKIT_TRACEBACK_FILTERING: OnceLock<bool> = OnceLock::new();
static LAYERKIT_SEED: OnceLock<u64> = OnceLock::new();
static LAYERKIT_TOLERANCE_CONFIG: OnceLock<Option<PathBuf>> = OnceLock::new();

const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_SEED: u64 = 1337;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn non_empty_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub(crate) fn backend_name() -> &'static str {
    LAYERKIT_BACKEND
        .get_or_init(|| non_empty_var("LAYERKIT_BACKEND").unwrap_or_else(|| DEFAULT_BACKEND.into()))
}

pub(crate) fn traceback_filtering_enabled() -> bool {
    *LAYERKIT_TRACEBACK_FILTERING.get_or_init(|| match non_empty_var("LAYERKIT_TRACEBACK_FILTERING")
    {
        Some(value) => parse_bool(&value),
        None => true,
    })
}

pub(crate) fn base_seed() -> u64 {
    *LAYERKIT_SEED.get_or_init(|| {
        non_empty_var("LAYERKIT_SEED")
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_SEED)
    })
}

pub(crate) fn tolerance_config_path() -> Option<&'static PathBuf> {
    LAYERKIT_TOLERANCE_CONFIG
        .get_or_init(|| non_empty_var("LAYERKIT_TOLERANCE_CONFIG").map(PathBuf::from))
        .as_ref()
}

#[cfg(test)]
mod tests {
    use super::parse_bool;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", "YES", " on "] {
            assert!(parse_bool(value), "{value} should parse as true");
        }
        for value in ["0", "false", "off", "nope"] {
            assert!(!parse_bool(value), "{value} should parse as false");
        }
    }
}
