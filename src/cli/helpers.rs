//! Shared helper functions for CLI commands.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::backend::HttpBackend;
use crate::config::Settings;
use crate::models::{FetchParams, GroupDirectory};
use crate::services::ExclusionFilter;

/// Build the HTTP backend from validated settings.
pub fn build_backend(settings: &Settings) -> anyhow::Result<Arc<HttpBackend>> {
    let backend_settings = settings.backend_settings()?;
    let backend = HttpBackend::new(backend_settings)?;
    Ok(Arc::new(backend))
}

/// Fetch the group directory once for the whole process.
pub async fn load_directory(backend: &HttpBackend) -> anyhow::Result<Arc<GroupDirectory>> {
    let directory = backend
        .fetch_groups()
        .await
        .context("Failed to load group list")?;
    tracing::info!("Loaded {} groups", directory.len());
    Ok(Arc::new(directory))
}

/// Load the exclusion list, if any.
pub async fn load_filter(path: Option<&Path>) -> anyhow::Result<ExclusionFilter> {
    match path {
        Some(path) => ExclusionFilter::from_file(path)
            .await
            .with_context(|| format!("Failed to read exclusion list '{}'", path.display())),
        None => Ok(ExclusionFilter::new()),
    }
}

/// Merge `--filter key=value` pairs over the configured fetch parameters.
pub fn merge_fetch_params(base: &FetchParams, overrides: &[(String, String)]) -> FetchParams {
    let mut params = base.clone();
    for (key, value) in overrides {
        params.insert(key.clone(), value.clone());
    }
    params
}

/// Parse a `key=value` argument.
pub fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Truncate a display name to `max_chars`, marking the cut with an ellipsis.
pub fn truncate_name(name: &str, max_chars: usize) -> String {
    if name.chars().count() <= max_chars {
        return name.to_string();
    }
    let kept: String = name.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_val() {
        assert_eq!(
            parse_key_val("market = ST11"),
            Ok(("market".to_string(), "ST11".to_string()))
        );
        assert_eq!(
            parse_key_val("q=a=b"),
            Ok(("q".to_string(), "a=b".to_string()))
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn test_merge_fetch_params_overrides() {
        let mut base = FetchParams::new();
        base.insert("market".into(), "ST11".into());
        base.insert("status".into(), "active".into());

        let merged = merge_fetch_params(&base, &[("market".into(), "SS".into())]);
        assert_eq!(merged.get("market").map(String::as_str), Some("SS"));
        assert_eq!(merged.get("status").map(String::as_str), Some("active"));
    }

    #[test]
    fn test_truncate_name() {
        assert_eq!(truncate_name("short", 10), "short");
        assert_eq!(truncate_name("겨울 니트 스웨터 세트", 8), "겨울 니트...");
    }
}
