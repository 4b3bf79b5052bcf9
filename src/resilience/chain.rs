use std::collections::HashSet;

/// Trim a model id and drop any `models/` path prefix.
pub fn normalize_model(model: &str) -> String {
    let model = model.trim();
    model.strip_prefix("models/").unwrap_or(model).to_string()
}

/// Ordered, de-duplicated list of models to try for one request.
///
/// An explicitly requested model always comes first, followed by the process
/// default, the fallback and any extra fallbacks. Empty entries are dropped
/// and only the first occurrence of each id is kept.
pub fn build_chain(
    requested: Option<&str>,
    default_model: &str,
    fallback_model: &str,
    extra_fallbacks: &[String],
) -> Vec<String> {
    let requested = requested.map(normalize_model).filter(|m| !m.is_empty());

    let mut ordered: Vec<String> = Vec::with_capacity(3 + extra_fallbacks.len());
    if let Some(requested) = requested {
        ordered.push(requested);
    }
    ordered.push(normalize_model(default_model));
    ordered.push(normalize_model(fallback_model));
    ordered.extend(extra_fallbacks.iter().map(|m| normalize_model(m)));

    let mut seen = HashSet::new();
    ordered
        .into_iter()
        .filter(|model| !model.is_empty() && seen.insert(model.clone()))
        .collect()
}
