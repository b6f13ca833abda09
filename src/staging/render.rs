use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

static TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"__([A-Z][A-Z0-9_]*?)__").unwrap());

/// Replace every `__TOKEN__` with `params["TOKEN"]`, or with nothing when the
/// parameter is absent. Single pass: substituted values are not re-scanned.
pub fn render(template: &str, params: &BTreeMap<String, String>) -> String {
    TOKEN_REGEX
        .replace_all(template, |caps: &regex::Captures<'_>| {
            params.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Token names referenced by `template`, sorted and deduplicated.
pub fn tokens(template: &str) -> Vec<String> {
    let mut names: Vec<String> = TOKEN_REGEX
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}
