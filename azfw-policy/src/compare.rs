//! Semantic comparison of two ARM templates.
//!
//! Both documents are normalized the same way before scoring: names and
//! references are evaluated and stripped of date suffixes, IP group
//! references are reduced to names, deployment-only keys are dropped and
//! semantically unordered arrays are sorted. Rule collections and rules keep
//! their order, since it is evaluation order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use json_diff_core::{
    canonicalize, diff_with_options, line_similarity, CanonicalOptions, DiffEntry, DiffOptions,
    LineChange,
};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec::arm::POLICY_TYPE;
use crate::codec::expr::{resource_id_names, TemplateScope};
use crate::codec::list_files;
use crate::error::{Error, ParseError};
use crate::names::{ip_group_name, remove_date_suffix};

pub const DEFAULT_THRESHOLD: f64 = 0.95;

/// Arrays whose element order carries no meaning.
pub const UNORDERED_KEYS: [&str; 14] = [
    "ipProtocols",
    "sourceAddresses",
    "sourceIpGroups",
    "destinationAddresses",
    "destinationIpGroups",
    "destinationFqdns",
    "destinationPorts",
    "targetFqdns",
    "targetUrls",
    "fqdnTags",
    "webCategories",
    "dependsOn",
    "protocols",
    "httpHeadersToInsert",
];

/// Keys that only describe the deployment, not the policy.
pub const IGNORED_KEYS: [&str; 6] = [
    "apiVersion",
    "location",
    "parameters",
    "variables",
    "outputs",
    "metadata",
];

#[derive(Debug, Clone, PartialEq)]
pub struct CompareOptions {
    /// Minimum score for a comparison to pass.
    pub threshold: f64,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    /// Line similarity of the normalized documents, in `[0, 1]`.
    pub score: f64,
    pub passed: bool,
    /// Structural differences keyed by resource and element names.
    pub entries: Vec<DiffEntry>,
    /// Changed lines of the normalized documents.
    pub lines: Vec<LineChange>,
}

impl Comparison {
    pub fn is_identical(&self) -> bool {
        self.entries.is_empty() && self.lines.is_empty()
    }
}

/// Compare two templates. Neither input is modified.
pub fn compare_documents(left: &Value, right: &Value, opts: &CompareOptions) -> Comparison {
    let left = normalize(left);
    let right = normalize(right);

    let similarity = line_similarity(&pretty(&left), &pretty(&right));
    let entries = diff_with_options(
        &left,
        &right,
        &DiffOptions {
            key_fields: vec!["name".to_string()],
            ..DiffOptions::default()
        },
    );
    Comparison {
        score: similarity.ratio,
        passed: similarity.ratio >= opts.threshold,
        entries,
        lines: similarity.changes,
    }
}

/// Read and compare two template files.
pub fn compare_files(left: &Path, right: &Path, opts: &CompareOptions) -> Result<Comparison, Error> {
    let read = |path: &Path| {
        json_diff_core::parse_file(path).map_err(|e| ParseError::Json {
            file: path.display().to_string(),
            source: e,
        })
    };
    Ok(compare_documents(&read(left)?, &read(right)?, opts))
}

/// Pretty-printed normalized form of `value`, as scored.
pub fn normalized_text(value: &Value) -> String {
    pretty(&normalize(value))
}

fn pretty(value: &Value) -> String {
    json_diff_core::to_pretty_string(value).unwrap_or_else(|_| value.to_string())
}

fn canonical_options() -> CanonicalOptions {
    let mut opts = CanonicalOptions::default()
        .with_unordered(UNORDERED_KEYS)
        .with_ignored(IGNORED_KEYS);
    opts.keyed_arrays
        .push(("resources".to_string(), vec!["type".to_string(), "name".to_string()]));
    opts.drop_empty = true;
    opts
}

/// Apply the Azure-specific normalization followed by canonicalization.
pub fn normalize(template: &Value) -> Value {
    let scope = TemplateScope::from_template(template);
    let mut doc = template.clone();
    if let Some(resources) = doc.get_mut("resources").and_then(Value::as_array_mut) {
        let flattened = flatten_resources(std::mem::take(resources), None, &scope);
        *resources = flattened
            .into_iter()
            .map(|resource| normalize_resource(resource, &scope))
            .collect();
    }
    canonicalize(&doc, &canonical_options())
}

/// Hoist nested child resources to the top level with full names and types.
fn flatten_resources(
    resources: Vec<Value>,
    parent: Option<(&str, &str)>,
    scope: &TemplateScope<'_>,
) -> Vec<Value> {
    let mut out = Vec::with_capacity(resources.len());
    for mut resource in resources {
        let Some(obj) = resource.as_object_mut() else {
            out.push(resource);
            continue;
        };
        let children = match obj.remove("resources") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .map(|text| evaluate_or_keep(scope, text));
        let kind = obj.get("type").and_then(Value::as_str).map(str::to_string);
        let (name, kind) = match (parent, name, kind) {
            (Some((parent_type, parent_name)), Some(name), Some(kind)) if !kind.contains('/') => {
                (Some(format!("{parent_name}/{name}")), Some(format!("{parent_type}/{kind}")))
            }
            (_, name, kind) => (name, kind),
        };
        if let Some(name) = &name {
            obj.insert("name".to_string(), Value::String(name.clone()));
        }
        if let Some(kind) = &kind {
            obj.insert("type".to_string(), Value::String(kind.clone()));
        }
        out.push(resource);
        if let (Some(kind), Some(name)) = (kind, name) {
            out.extend(flatten_resources(children, Some((&kind, &name)), scope));
        }
    }
    out
}

fn normalize_resource(mut resource: Value, scope: &TemplateScope<'_>) -> Value {
    let Some(obj) = resource.as_object_mut() else {
        return resource;
    };
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .map(|text| evaluate_or_keep(scope, text));
    if let Some(name) = name {
        let stripped: Vec<&str> = name.split('/').map(remove_date_suffix).collect();
        obj.insert("name".to_string(), Value::String(stripped.join("/")));
    }
    if let Some(Value::Array(deps)) = obj.get_mut("dependsOn") {
        for dep in deps.iter_mut() {
            let reduced = dep.as_str().map(|text| {
                let id = evaluate_or_keep(scope, text);
                let names: Vec<&str> = resource_id_names(&id)
                    .into_iter()
                    .map(remove_date_suffix)
                    .collect();
                names.join("/")
            });
            if let Some(reduced) = reduced {
                *dep = Value::String(reduced);
            }
        }
    }
    let is_policy = obj
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case(POLICY_TYPE));
    if let Some(props) = obj.get_mut("properties").and_then(Value::as_object_mut) {
        if is_policy {
            normalize_base_policy(props, scope);
        }
        if let Some(Value::Array(collections)) = props.get_mut("ruleCollections") {
            for collection in collections.iter_mut() {
                if let Some(Value::Array(rules)) = collection.get_mut("rules") {
                    for rule in rules.iter_mut() {
                        normalize_ip_groups(rule, scope);
                    }
                }
            }
        }
    }
    resource
}

fn normalize_base_policy(props: &mut Map<String, Value>, scope: &TemplateScope<'_>) {
    let Some(Value::Object(base)) = props.get_mut("basePolicy") else {
        return;
    };
    let reduced = base.get("id").and_then(Value::as_str).map(|text| {
        let id = evaluate_or_keep(scope, text);
        let name = resource_id_names(&id).last().copied().unwrap_or_default().to_string();
        remove_date_suffix(&name).to_string()
    });
    if let Some(reduced) = reduced {
        base.insert("id".to_string(), Value::String(reduced));
    }
}

fn normalize_ip_groups(rule: &mut Value, scope: &TemplateScope<'_>) {
    for key in ["sourceIpGroups", "destinationIpGroups"] {
        if let Some(Value::Array(items)) = rule.get_mut(key) {
            for item in items.iter_mut() {
                let name = item
                    .as_str()
                    .map(|text| ip_group_name(&evaluate_or_keep(scope, text)));
                if let Some(name) = name {
                    *item = Value::String(name);
                }
            }
        }
    }
}

/// Unsupported expressions compare by their text.
fn evaluate_or_keep(scope: &TemplateScope<'_>, text: &str) -> String {
    scope
        .evaluate_string(text)
        .unwrap_or_else(|_| text.to_string())
}

/// Two templates that describe the same policy file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePair {
    /// File stem without its date suffix.
    pub key: String,
    pub left: Option<PathBuf>,
    pub right: Option<PathBuf>,
}

/// Pair `*.json` files of two directories by file stem, ignoring date
/// suffixes. Files without a counterpart are returned with one side `None`.
pub fn pair_files(left_dir: &Path, right_dir: &Path) -> Result<Vec<FilePair>, Error> {
    let mut pairs: BTreeMap<String, FilePair> = BTreeMap::new();
    for (dir, is_left) in [(left_dir, true), (right_dir, false)] {
        for path in list_files(dir, "json")? {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let key = remove_date_suffix(stem).to_string();
            let pair = pairs.entry(key.clone()).or_insert_with(|| FilePair {
                key,
                left: None,
                right: None,
            });
            if is_left {
                pair.left = Some(path);
            } else {
                pair.right = Some(path);
            }
        }
    }
    Ok(pairs.into_values().collect())
}

/// Persisted result of one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRecord {
    pub name: String,
    pub left: String,
    pub right: String,
    pub threshold: f64,
    #[serde(flatten)]
    pub comparison: Comparison,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn template(rules: Value) -> Value {
        json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
            "contentVersion": "1.0.0.0",
            "parameters": {"name": {"defaultValue": "net01_20250613"}},
            "resources": [
                {
                    "type": "Microsoft.Network/firewallPolicies",
                    "apiVersion": "2024-05-01",
                    "name": "[parameters('name')]",
                    "location": "westeurope",
                    "properties": {"threatIntelMode": "Alert"}
                },
                {
                    "type": "Microsoft.Network/firewallPolicies/ruleCollectionGroups",
                    "apiVersion": "2024-05-01",
                    "name": "[concat(parameters('name'), '/RCG_net_01')]",
                    "dependsOn": ["[resourceId('Microsoft.Network/firewallPolicies', parameters('name'))]"],
                    "properties": {
                        "priority": 1000,
                        "ruleCollections": [{
                            "ruleCollectionType": "FirewallPolicyFilterRuleCollection",
                            "name": "RC_net_1",
                            "priority": 1000,
                            "action": {"type": "Allow"},
                            "rules": rules
                        }]
                    }
                }
            ]
        })
    }

    fn rule(name: &str, ports: &[&str]) -> Value {
        json!({
            "ruleType": "NetworkRule",
            "name": name,
            "ipProtocols": ["TCP"],
            "sourceAddresses": ["10.2.2.2"],
            "destinationAddresses": ["11.2.3.4"],
            "destinationPorts": ports
        })
    }

    #[test]
    fn self_comparison_scores_one() {
        let doc = template(json!([rule("Rnet1", &["80"])]));

        let result = compare_documents(&doc, &doc, &CompareOptions::default());

        assert_eq!(result.score, 1.0);
        assert!(result.passed);
        assert!(result.is_identical());
    }

    #[test]
    fn equivalent_renderings_compare_equal() {
        let left = template(json!([rule("Rnet1", &["443", "80"])]));
        let right = json!({
            "$schema": "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#",
            "contentVersion": "1.0.0.0",
            "metadata": {"_generator": {"name": "bicep"}},
            "resources": [
                {
                    "type": "Microsoft.Network/firewallPolicies/ruleCollectionGroups",
                    "apiVersion": "2023-09-01",
                    "name": "net01_20250701/RCG_net_01",
                    "dependsOn": ["[resourceId('Microsoft.Network/firewallPolicies', 'net01_20250701')]"],
                    "properties": {
                        "priority": 1000,
                        "ruleCollections": [{
                            "ruleCollectionType": "FirewallPolicyFilterRuleCollection",
                            "name": "RC_net_1",
                            "priority": 1000,
                            "action": {"type": "Allow"},
                            "rules": [{
                                "ruleType": "NetworkRule",
                                "name": "Rnet1",
                                "ipProtocols": ["TCP"],
                                "sourceAddresses": ["10.2.2.2"],
                                "sourceIpGroups": [],
                                "destinationAddresses": ["11.2.3.4"],
                                "destinationPorts": ["80", "443"]
                            }]
                        }]
                    }
                },
                {
                    "type": "Microsoft.Network/firewallPolicies",
                    "apiVersion": "2023-09-01",
                    "name": "net01_20250701",
                    "location": "[resourceGroup().location]",
                    "properties": {"threatIntelMode": "Alert"}
                }
            ]
        });

        let result = compare_documents(&left, &right, &CompareOptions::default());

        assert_eq!(result.entries, Vec::new());
        assert_eq!(result.score, 1.0);
    }

    #[test]
    fn added_rule_lowers_score_and_is_located() {
        let left = template(json!([rule("Rnet1", &["80"])]));
        let right = template(json!([rule("Rnet1", &["80"]), rule("Rnew", &["22"])]));

        let result = compare_documents(&left, &right, &CompareOptions::default());

        assert!(result.score < 1.0);
        let paths: Vec<&str> = result.entries.iter().map(DiffEntry::path).collect();
        assert_eq!(
            paths,
            vec!["resources[net01/RCG_net_01].properties.ruleCollections[RC_net_1].rules[Rnew]"]
        );
        assert!(matches!(result.entries[0], DiffEntry::OnlyRight { .. }));
    }

    #[test]
    fn rule_order_is_significant() {
        let left = template(json!([rule("A", &["80"]), rule("B", &["81"])]));
        let right = template(json!([rule("B", &["81"]), rule("A", &["80"])]));

        let result = compare_documents(&left, &right, &CompareOptions::default());

        assert!(result.score < 1.0);
    }

    #[test]
    fn threshold_decides_pass() {
        let left = template(json!([rule("Rnet1", &["80"])]));
        let right = template(json!([rule("Rnet1", &["8080"])]));

        let strict = compare_documents(&left, &right, &CompareOptions { threshold: 1.0 });
        let lenient = compare_documents(&left, &right, &CompareOptions { threshold: 0.5 });

        assert!(!strict.passed);
        assert!(lenient.passed);
        assert_eq!(strict.score, lenient.score);
    }

    #[test]
    fn inputs_are_not_modified() {
        let doc = template(json!([rule("Rnet1", &["443", "80"])]));
        let copy = doc.clone();

        let _ = compare_documents(&doc, &doc, &CompareOptions::default());

        assert_eq!(doc, copy);
    }

    #[test]
    fn ip_group_references_compare_by_name() {
        let mut with_param = rule("Rnet1", &["80"]);
        with_param["sourceIpGroups"] = json!(["[parameters('ipGroups_ipg_web_externalid')]"]);
        let mut with_id = rule("Rnet1", &["80"]);
        with_id["sourceIpGroups"] = json!([
            "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/ipGroups/ipg_web"
        ]);

        let result = compare_documents(
            &template(json!([with_param])),
            &template(json!([with_id])),
            &CompareOptions::default(),
        );

        assert!(result.is_identical(), "{:?}", result.entries);
    }
}
