//! Naming conventions shared by the codecs and the comparator.

use std::sync::OnceLock;

use regex::Regex;

fn date_suffix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<base>.+?)[-_](?P<suffix>\d{8}(?:_[a-z0-9]+)?)$").expect("static regex")
    })
}

fn separator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\s\-]+|_-_").expect("static regex"))
}

fn ip_group_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)ipGroups/([^/\s'"\]]+)"#).expect("static regex"))
}

fn resource_id_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\[resourceId\(.*'Microsoft\.Network/ipGroups'\s*,\s*'([^']+)'\s*\)\]$")
            .expect("static regex")
    })
}

fn parameter_ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\[parameters\('([^']+)'\)\]$").expect("static regex"))
}

/// Split a versioned resource name into its base name and date suffix.
///
/// Recognizes `_YYYYMMDD`, `_YYYYMMDD_token` and `-YYYYMMDD_token`.
pub fn split_date_suffix(name: &str) -> (&str, Option<&str>) {
    match date_suffix_re().captures(name) {
        Some(caps) => {
            let base = caps.name("base").map_or(name, |m| m.as_str());
            (base, caps.name("suffix").map(|m| m.as_str()))
        }
        None => (name, None),
    }
}

/// Strip a trailing date suffix, if any.
pub fn remove_date_suffix(name: &str) -> &str {
    split_date_suffix(name).0
}

/// Join a base name and an optional version suffix.
pub fn versioned_name(name: &str, version: Option<&str>) -> String {
    match version {
        Some(v) if !v.is_empty() => format!("{name}_{v}"),
        _ => name.to_string(),
    }
}

/// Replace whitespace and hyphen runs (and `_-_`) with a single underscore.
///
/// Only used to derive file names; model names are never rewritten.
pub fn normalize_name(name: &str) -> String {
    separator_re().replace_all(name.trim(), "_").into_owned()
}

/// File stem used for a policy's YAML/CSV/Bicep artifacts.
pub fn file_stem(name: &str) -> String {
    normalize_name(name)
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect()
}

/// Reduce an IP group reference to its bare name.
///
/// Accepts a bare name, a resource path ending in `ipGroups/<name>`, a
/// `[resourceId('Microsoft.Network/ipGroups', '<name>')]` expression, or an
/// unresolved `[parameters('...')]` reference in the naming style of exported
/// templates (`ipGroups_<name>_externalid`).
pub fn ip_group_name(reference: &str) -> String {
    let reference = reference.trim();
    if let Some(caps) = parameter_ref_re().captures(reference) {
        let inner = &caps[1];
        if inner.contains('/') {
            return ip_group_name(inner);
        }
        let inner = inner.strip_prefix("ipGroups_").unwrap_or(inner);
        let inner = inner.strip_suffix("_externalid").unwrap_or(inner);
        return inner.to_string();
    }
    if let Some(caps) = resource_id_ref_re().captures(reference) {
        return caps[1].to_string();
    }
    if let Some(caps) = ip_group_path_re().captures(reference) {
        return caps[1].to_string();
    }
    reference.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_known_date_suffix_shapes() {
        assert_eq!(split_date_suffix("net01_20250613"), ("net01", Some("20250613")));
        assert_eq!(
            split_date_suffix("net01_20250613_jkn5bz"),
            ("net01", Some("20250613_jkn5bz"))
        );
        assert_eq!(
            split_date_suffix("EW_POLICY_P01-20250627_v7wlxg"),
            ("EW_POLICY_P01", Some("20250627_v7wlxg"))
        );
        assert_eq!(split_date_suffix("net_01"), ("net_01", None));
        assert_eq!(split_date_suffix("policy_2025"), ("policy_2025", None));
    }

    #[test]
    fn versioned_name_joins_with_underscore() {
        assert_eq!(versioned_name("net01", Some("20250613")), "net01_20250613");
        assert_eq!(versioned_name("net01", None), "net01");
    }

    #[test]
    fn normalize_name_collapses_separators() {
        assert_eq!(normalize_name("Web Servers - DMZ"), "Web_Servers_DMZ");
        assert_eq!(normalize_name("a_-_b"), "a_b");
        assert_eq!(file_stem("rc/one"), "rc_one");
    }

    #[test]
    fn ip_group_name_accepts_every_reference_shape() {
        assert_eq!(ip_group_name("ipg-web"), "ipg-web");
        assert_eq!(
            ip_group_name(
                "/subscriptions/0000/resourceGroups/rg/providers/Microsoft.Network/ipGroups/ipg-web"
            ),
            "ipg-web"
        );
        assert_eq!(ip_group_name("Microsoft.Network/ipGroups/ipg-web"), "ipg-web");
        assert_eq!(
            ip_group_name("[parameters('ipGroups_ipg_web_externalid')]"),
            "ipg_web"
        );
        assert_eq!(
            ip_group_name("[resourceId('Microsoft.Network/ipGroups', 'ipg-db')]"),
            "ipg-db"
        );
    }
}
