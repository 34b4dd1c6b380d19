// Requested-model routing: which provider serves which model name

use crate::error::{GatewayError, Result};
use crate::provider::Provider;
use std::collections::HashMap;

/// Where a requested model is served.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteTarget {
    pub provider: Provider,
    pub upstream_model: String,
}

/// Maps client model names to providers. Config overrides win; otherwise
/// the family prefix decides and the model name passes through unchanged.
pub struct ModelRouter {
    overrides: HashMap<String, RouteTarget>,
}

impl ModelRouter {
    pub fn new(overrides: HashMap<String, RouteTarget>) -> Self {
        Self { overrides }
    }

    pub fn route(&self, requested: &str) -> Result<RouteTarget> {
        let normalized = strip_date_suffix(requested);

        if let Some(target) = self
            .overrides
            .get(requested)
            .or_else(|| self.overrides.get(normalized.as_str()))
        {
            return Ok(target.clone());
        }

        let provider = if normalized.starts_with("claude") {
            Provider::Claude
        } else if normalized.starts_with("gemini") {
            Provider::Gemini
        } else if normalized.starts_with("gpt")
            || normalized.starts_with("codex")
            || is_o_series(&normalized)
        {
            Provider::OpenAi
        } else {
            return Err(GatewayError::InvalidRequest(format!(
                "no provider serves model {}",
                requested
            )));
        };

        Ok(RouteTarget {
            provider,
            upstream_model: requested.to_string(),
        })
    }
}

/// o1 / o3-mini / o4-mini style names.
fn is_o_series(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().map(|c| c.is_ascii_digit()).unwrap_or(false)
}

/// Clients often send versioned names with date suffixes,
/// e.g. "claude-sonnet-4-5-20250929" -> "claude-sonnet-4-5".
fn strip_date_suffix(model: &str) -> String {
    if model.len() > 9 && model.as_bytes()[model.len() - 9] == b'-' {
        let suffix = &model[model.len() - 8..];
        if suffix.chars().all(|c| c.is_ascii_digit()) {
            return model[..model.len() - 9].to_string();
        }
    }
    model.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> ModelRouter {
        ModelRouter::new(HashMap::new())
    }

    #[test]
    fn prefix_routing() {
        assert_eq!(router().route("claude-sonnet-4-5").unwrap().provider, Provider::Claude);
        assert_eq!(router().route("gemini-2.5-pro").unwrap().provider, Provider::Gemini);
        assert_eq!(router().route("gpt-4o").unwrap().provider, Provider::OpenAi);
        assert_eq!(router().route("o3-mini").unwrap().provider, Provider::OpenAi);
        assert!(router().route("llama-3").is_err());
    }

    #[test]
    fn date_suffix_is_ignored_for_matching() {
        assert_eq!(strip_date_suffix("claude-sonnet-4-5-20250929"), "claude-sonnet-4-5");
        assert_eq!(strip_date_suffix("claude-sonnet-4-5"), "claude-sonnet-4-5");
        // Not a date: left alone.
        assert_eq!(strip_date_suffix("model-abcdefgh"), "model-abcdefgh");
    }

    #[test]
    fn overrides_win_and_rewrite_model() {
        let mut overrides = HashMap::new();
        overrides.insert(
            "claude-sonnet-4-5".to_string(),
            RouteTarget {
                provider: Provider::Gemini,
                upstream_model: "gemini-2.5-pro".to_string(),
            },
        );
        let router = ModelRouter::new(overrides);

        let target = router.route("claude-sonnet-4-5-20250929").unwrap();
        assert_eq!(target.provider, Provider::Gemini);
        assert_eq!(target.upstream_model, "gemini-2.5-pro");
    }

    #[test]
    fn unrouted_model_passes_name_through() {
        let target = router().route("gpt-4o").unwrap();
        assert_eq!(target.upstream_model, "gpt-4o");
    }
}
