pub const DEFAULT_NATIVE_MODEL: &str = "models/gemini-2.5-flash-image-preview";
pub const DEFAULT_GATEWAY_MODEL: &str = "google/gemini-2.5-flash-image-preview:free";

const NATIVE_RESOURCE_PREFIX: &str = "models/";
const GATEWAY_DEFAULT_NAMESPACE: &str = "google/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routing {
    Native,
    Gateway,
}

pub fn normalize_model(raw: &str, routing: Routing, gateway_override: Option<&str>) -> String {
    match routing {
        Routing::Native => normalize_native_model(raw),
        Routing::Gateway => normalize_gateway_model(raw, gateway_override),
    }
}

/// Maps any accepted spelling to a Gemini resource name:
/// `google/gemini-x:free`, `gemini-x` and `models/gemini-x` all become
/// `models/gemini-x`.
pub fn normalize_native_model(raw: &str) -> String {
    let trimmed = raw.trim();
    let bare = trimmed
        .strip_prefix(NATIVE_RESOURCE_PREFIX)
        .unwrap_or(trimmed);
    let bare = bare
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(bare);
    let bare = bare
        .split_once(':')
        .map(|(name, _)| name)
        .unwrap_or(bare)
        .trim();
    if bare.is_empty() {
        return DEFAULT_NATIVE_MODEL.to_string();
    }
    format!("{NATIVE_RESOURCE_PREFIX}{bare}")
}

/// Namespaced ids pass through untouched; bare ids land in the `google/`
/// namespace. A non-blank override replaces whatever was requested.
pub fn normalize_gateway_model(raw: &str, override_model: Option<&str>) -> String {
    if let Some(forced) = override_model
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return forced.to_string();
    }
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_GATEWAY_MODEL.to_string();
    }
    if trimmed.contains('/') {
        return trimmed.to_string();
    }
    format!("{GATEWAY_DEFAULT_NAMESPACE}{trimmed}")
}
