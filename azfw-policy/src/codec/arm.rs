//! ARM template codec.
//!
//! Decoding evaluates the expression subset in [`super::expr`] for resource
//! names and references, collects policy and rule collection group resources
//! in one pass and links them afterwards by the `<policy>/<group>` naming
//! convention, so a group may appear before its policy.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use super::expr::{resource_id_names, TemplateScope};
use super::IpGroupResolver;
use crate::error::{ParseError, RenderError};
use crate::model::{
    Policy, Rule, RuleAction, RuleCollection, RuleCollectionGroup, RuleCollectionKind, SkuTier,
};
use crate::names::{ip_group_name, split_date_suffix};

pub const POLICY_TYPE: &str = "Microsoft.Network/firewallPolicies";
pub const GROUP_TYPE: &str = "Microsoft.Network/firewallPolicies/ruleCollectionGroups";
pub const SCHEMA: &str =
    "https://schema.management.azure.com/schemas/2019-04-01/deploymentTemplate.json#";
pub const DEFAULT_API_VERSION: &str = "2024-05-01";

/// Decode every firewall policy in `template`. `source` names the document in
/// errors.
pub fn decode(source: &str, template: &Value) -> Result<Vec<Policy>, ParseError> {
    let resources = template
        .get("resources")
        .and_then(Value::as_array)
        .ok_or_else(|| ParseError::document(source, "$", "missing 'resources' array"))?;

    let decoder = Decoder {
        source,
        scope: TemplateScope::from_template(template),
    };
    let mut collected = Collected::default();
    for (i, resource) in resources.iter().enumerate() {
        decoder.collect(resource, &format!("resources[{i}]"), None, &mut collected)?;
    }
    collected.link(source)
}

/// Decode a template read from disk.
pub fn decode_file(path: &std::path::Path) -> Result<Vec<Policy>, ParseError> {
    let source = path.display().to_string();
    let template = json_diff_core::parse_file(path).map_err(|e| ParseError::Json {
        file: source.clone(),
        source: e,
    })?;
    decode(&source, &template)
}

#[derive(Default)]
struct Collected {
    /// Resource name (with date suffix) and decoded policy, in document order.
    policies: Vec<(String, Policy)>,
    groups: Vec<PendingGroup>,
}

struct PendingGroup {
    policy: String,
    group: RuleCollectionGroup,
    location: String,
}

impl Collected {
    fn link(mut self, source: &str) -> Result<Vec<Policy>, ParseError> {
        for pending in self.groups {
            let owner = self
                .policies
                .iter()
                .position(|(resource, _)| *resource == pending.policy)
                .or_else(|| {
                    let wanted = split_date_suffix(&pending.policy).0;
                    self.policies
                        .iter()
                        .position(|(_, policy)| policy.name == wanted)
                })
                .ok_or_else(|| {
                    ParseError::document(
                        source,
                        &pending.location,
                        format!(
                            "rule collection group '{}' belongs to policy '{}' which is not defined in this template",
                            pending.group.name, pending.policy
                        ),
                    )
                })?;
            self.policies[owner]
                .1
                .rule_collection_groups
                .push(pending.group);
        }
        Ok(self.policies.into_iter().map(|(_, policy)| policy).collect())
    }
}

struct Decoder<'a> {
    source: &'a str,
    scope: TemplateScope<'a>,
}

impl Decoder<'_> {
    fn error(&self, location: &str, message: impl Into<String>) -> ParseError {
        ParseError::document(self.source, location, message)
    }

    fn string(&self, value: &Value, location: &str) -> Result<String, ParseError> {
        match value {
            Value::String(text) => self
                .scope
                .evaluate_string(text)
                .map_err(|e| self.error(location, e.to_string())),
            other => Err(self.error(location, format!("expected a string, found {other}"))),
        }
    }

    fn required_string(&self, object: &Value, key: &str, location: &str) -> Result<String, ParseError> {
        let value = object
            .get(key)
            .ok_or_else(|| self.error(location, format!("missing '{key}'")))?;
        self.string(value, &format!("{location}.{key}"))
    }

    fn priority(&self, object: &Value, location: &str) -> Result<u32, ParseError> {
        let location = format!("{location}.priority");
        let raw = object
            .get("priority")
            .ok_or_else(|| self.error(&location, "missing priority"))?;
        let value = self
            .scope
            .evaluate(raw)
            .map_err(|e| self.error(&location, e.to_string()))?;
        let parsed = match &value {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| self.error(&location, format!("invalid priority {value}")))
    }

    fn collect(
        &self,
        resource: &Value,
        location: &str,
        parent: Option<&str>,
        out: &mut Collected,
    ) -> Result<(), ParseError> {
        let Some(resource_type) = resource.get("type").and_then(Value::as_str) else {
            return Err(self.error(location, "resource without 'type'"));
        };
        let resource_type = match parent {
            Some(_) if !resource_type.contains('/') => format!("{POLICY_TYPE}/{resource_type}"),
            _ => resource_type.to_string(),
        };

        if resource_type.eq_ignore_ascii_case(POLICY_TYPE) {
            let name = self.required_string(resource, "name", location)?;
            let policy = self.policy(resource, &name, location)?;
            out.policies.push((name.clone(), policy));
            if let Some(children) = resource.get("resources").and_then(Value::as_array) {
                for (i, child) in children.iter().enumerate() {
                    self.collect(child, &format!("{location}.resources[{i}]"), Some(&name), out)?;
                }
            }
        } else if resource_type.eq_ignore_ascii_case(GROUP_TYPE) {
            let name = self.required_string(resource, "name", location)?;
            let full = match parent {
                Some(policy) if !name.contains('/') => format!("{policy}/{name}"),
                _ => name,
            };
            let Some((policy, group_name)) = full.split_once('/') else {
                return Err(self.error(
                    location,
                    format!("rule collection group name '{full}' must be '<policy>/<group>'"),
                ));
            };
            let group = self.group(resource, group_name, location)?;
            out.groups.push(PendingGroup {
                policy: policy.to_string(),
                group,
                location: location.to_string(),
            });
        }
        Ok(())
    }

    fn policy(&self, resource: &Value, name: &str, location: &str) -> Result<Policy, ParseError> {
        let (base, version) = split_date_suffix(name);
        let empty = Value::Object(Map::new());
        let props = resource.get("properties").unwrap_or(&empty);
        let props_location = format!("{location}.properties");

        let sku_tier = match props.get("sku").and_then(|sku| sku.get("tier")) {
            Some(tier) => {
                let tier_location = format!("{props_location}.sku.tier");
                let text = self.string(tier, &tier_location)?;
                Some(
                    text.parse::<SkuTier>()
                        .map_err(|e| self.error(&tier_location, e))?,
                )
            }
            None => None,
        };
        let threat_intel_mode = match props.get("threatIntelMode") {
            Some(mode) => Some(self.string(mode, &format!("{props_location}.threatIntelMode"))?),
            None => None,
        };
        let base_policy = match props.get("basePolicy").and_then(|b| b.get("id")) {
            Some(id) => {
                let id = self.string(id, &format!("{props_location}.basePolicy.id"))?;
                Some(base_policy_name(&id))
            }
            None => None,
        };
        // Location is deployment metadata; expressions outside the supported
        // subset (e.g. resourceGroup().location) leave it unset.
        let location_value = resource
            .get("location")
            .and_then(Value::as_str)
            .and_then(|text| self.scope.evaluate_string(text).ok());

        Ok(Policy {
            name: base.to_string(),
            version: version.map(str::to_string),
            location: location_value,
            sku_tier,
            base_policy,
            threat_intel_mode,
            threat_intel_whitelist: props.get("threatIntelWhitelist").cloned(),
            dns_settings: props.get("dnsSettings").cloned(),
            rule_collection_groups: Vec::new(),
        })
    }

    fn group(
        &self,
        resource: &Value,
        name: &str,
        location: &str,
    ) -> Result<RuleCollectionGroup, ParseError> {
        let props_location = format!("{location}.properties");
        let props = resource
            .get("properties")
            .ok_or_else(|| self.error(location, "missing 'properties'"))?;
        let mut group = RuleCollectionGroup::new(name, self.priority(props, &props_location)?);
        if let Some(collections) = props.get("ruleCollections") {
            let collections = collections.as_array().ok_or_else(|| {
                self.error(&props_location, "'ruleCollections' must be an array")
            })?;
            for (i, collection) in collections.iter().enumerate() {
                let collection_location = format!("{props_location}.ruleCollections[{i}]");
                group
                    .rule_collections
                    .push(self.collection(collection, &collection_location)?);
            }
        }
        Ok(group)
    }

    fn collection(&self, value: &Value, location: &str) -> Result<RuleCollection, ParseError> {
        let name = self.required_string(value, "name", location)?;
        let kind = self
            .required_string(value, "ruleCollectionType", location)?
            .parse::<RuleCollectionKind>()
            .map_err(|e| self.error(&format!("{location}.ruleCollectionType"), e))?;
        let action = match value.get("action").and_then(|a| a.get("type")) {
            Some(action) => {
                let action_location = format!("{location}.action.type");
                self.string(action, &action_location)?
                    .parse::<RuleAction>()
                    .map_err(|e| self.error(&action_location, e))?
            }
            None if kind == RuleCollectionKind::Nat => RuleAction::Dnat,
            None => return Err(self.error(location, "missing 'action'")),
        };
        let mut collection = RuleCollection::new(name, self.priority(value, location)?, kind, action);
        if let Some(rules) = value.get("rules") {
            let rules = rules
                .as_array()
                .ok_or_else(|| self.error(location, "'rules' must be an array"))?;
            for (i, rule) in rules.iter().enumerate() {
                collection
                    .rules
                    .push(self.rule(rule, &format!("{location}.rules[{i}]"))?);
            }
        }
        Ok(collection)
    }

    fn rule(&self, value: &Value, location: &str) -> Result<Rule, ParseError> {
        let mut rule: Rule = serde_json::from_value(value.clone())
            .map_err(|e| self.error(location, e.to_string()))?;
        match &mut rule {
            Rule::Network(r) => {
                self.ip_groups(&mut r.source_ip_groups);
                self.ip_groups(&mut r.destination_ip_groups);
                clear_blank(&mut r.description);
            }
            Rule::Nat(r) => {
                self.ip_groups(&mut r.source_ip_groups);
                clear_blank(&mut r.description);
                clear_blank(&mut r.translated_address);
                clear_blank(&mut r.translated_fqdn);
            }
            Rule::Application(r) => {
                self.ip_groups(&mut r.source_ip_groups);
                clear_blank(&mut r.description);
            }
        }
        Ok(rule)
    }

    fn ip_groups(&self, references: &mut [String]) {
        for reference in references {
            // Parameters without a default still name the group by convention.
            *reference = match self.scope.evaluate_string(reference) {
                Ok(resolved) => ip_group_name(&resolved),
                Err(_) => ip_group_name(reference),
            };
        }
    }
}

fn clear_blank(value: &mut Option<String>) {
    if value.as_deref().is_some_and(|s| s.trim().is_empty()) {
        *value = None;
    }
}

/// Policy name (without date suffix) from a `basePolicy.id` reference.
fn base_policy_name(id: &str) -> String {
    let lower = id.to_ascii_lowercase();
    let name = match lower.find("firewallpolicies/") {
        Some(pos) => {
            let rest = &id[pos + "firewallPolicies/".len()..];
            rest.split('/').next().unwrap_or(rest)
        }
        None => resource_id_names(id).last().copied().unwrap_or(id),
    };
    split_date_suffix(name).0.to_string()
}

/// Render `policies` as a deployable ARM template.
pub fn encode(
    policies: &[Policy],
    resolver: &IpGroupResolver,
    api_version: &str,
) -> Result<Value, RenderError> {
    let versions: BTreeMap<&str, String> = policies
        .iter()
        .map(|p| (p.name.as_str(), p.versioned_name()))
        .collect();

    let mut resources = Vec::new();
    for policy in policies {
        let resource_name = policy.versioned_name();
        let mut props = Map::new();
        if let Some(tier) = policy.sku_tier {
            props.insert("sku".to_string(), json!({ "tier": tier.as_str() }));
        }
        if let Some(mode) = &policy.threat_intel_mode {
            props.insert("threatIntelMode".to_string(), json!(mode));
        }
        if let Some(whitelist) = &policy.threat_intel_whitelist {
            props.insert("threatIntelWhitelist".to_string(), whitelist.clone());
        }
        if let Some(dns) = &policy.dns_settings {
            props.insert("dnsSettings".to_string(), dns.clone());
        }
        if let Some(parent) = &policy.base_policy {
            let parent_name = versions
                .get(parent.as_str())
                .cloned()
                .unwrap_or_else(|| parent.clone());
            props.insert(
                "basePolicy".to_string(),
                json!({ "id": resource_id_expr(POLICY_TYPE, &[&parent_name]) }),
            );
        }
        resources.push(json!({
            "type": POLICY_TYPE,
            "apiVersion": api_version,
            "name": resource_name,
            "location": policy.location.as_deref().unwrap_or("[resourceGroup().location]"),
            "properties": props,
        }));

        let mut previous: Option<&str> = None;
        for group in &policy.rule_collection_groups {
            let mut depends_on = vec![resource_id_expr(POLICY_TYPE, &[&resource_name])];
            if let Some(prev) = previous {
                depends_on.push(resource_id_expr(GROUP_TYPE, &[&resource_name, prev]));
            }
            let collections = group
                .rule_collections
                .iter()
                .map(|c| encode_collection(c, &format!("{}/{}", policy.name, group.name), resolver))
                .collect::<Result<Vec<_>, _>>()?;
            resources.push(json!({
                "type": GROUP_TYPE,
                "apiVersion": api_version,
                "name": format!("{resource_name}/{}", group.name),
                "dependsOn": depends_on,
                "properties": {
                    "priority": group.priority,
                    "ruleCollections": collections,
                },
            }));
            previous = Some(&group.name);
        }
    }

    Ok(json!({
        "$schema": SCHEMA,
        "contentVersion": "1.0.0.0",
        "parameters": {},
        "resources": resources,
    }))
}

fn encode_collection(
    collection: &RuleCollection,
    group_entity: &str,
    resolver: &IpGroupResolver,
) -> Result<Value, RenderError> {
    let entity = format!("{group_entity}/{}", collection.name);
    let rules = collection
        .rules
        .iter()
        .map(|rule| encode_rule(rule, &format!("{entity}/{}", rule.name()), resolver))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({
        "ruleCollectionType": collection.kind.as_str(),
        "name": collection.name,
        "priority": collection.priority,
        "action": { "type": collection.action.as_str() },
        "rules": rules,
    }))
}

fn encode_rule(rule: &Rule, entity: &str, resolver: &IpGroupResolver) -> Result<Value, RenderError> {
    let mut value =
        serde_json::to_value(rule).map_err(|e| RenderError::new(entity, "rule", e.to_string()))?;
    for key in ["sourceIpGroups", "destinationIpGroups"] {
        if let Some(Value::Array(items)) = value.get_mut(key) {
            for item in items.iter_mut() {
                let id = item.as_str().map(|name| resolver.resource_id(name));
                if let Some(id) = id {
                    *item = Value::String(id);
                }
            }
        }
    }
    Ok(value)
}

/// `[resourceId('<type>', '<name>', ...)]` with quotes escaped.
fn resource_id_expr(resource_type: &str, names: &[&str]) -> String {
    let mut args = vec![format!("'{resource_type}'")];
    args.extend(names.iter().map(|n| format!("'{}'", n.replace('\'', "''"))));
    format!("[resourceId({})]", args.join(", "))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::fixtures::sample_policy;

    fn resolver() -> IpGroupResolver {
        IpGroupResolver::new("sub-1", "rg-ipg")
    }

    #[test]
    fn groups_declared_before_their_policy_are_linked() {
        let template = json!({
            "parameters": {"policyName": {"defaultValue": "net01_20250613"}},
            "resources": [
                {
                    "type": GROUP_TYPE,
                    "name": "[concat(parameters('policyName'), '/RCG_b')]",
                    "properties": {"priority": 300, "ruleCollections": []}
                },
                {
                    "type": POLICY_TYPE,
                    "name": "[parameters('policyName')]",
                    "location": "westeurope",
                    "properties": {"sku": {"tier": "Premium"}}
                },
                {
                    "type": GROUP_TYPE,
                    "name": "net01_20250613/RCG_a",
                    "properties": {"priority": 200}
                }
            ]
        });

        let policies = decode("t.json", &template).expect("decode");

        assert_eq!(policies.len(), 1);
        assert_eq!(policies[0].name, "net01");
        assert_eq!(policies[0].version.as_deref(), Some("20250613"));
        assert_eq!(policies[0].sku_tier, Some(SkuTier::Premium));
        let names: Vec<&str> = policies[0]
            .rule_collection_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(names, vec!["RCG_b", "RCG_a"]);
    }

    #[test]
    fn nested_child_groups_use_relative_names() {
        let template = json!({
            "resources": [{
                "type": POLICY_TYPE,
                "name": "p1",
                "resources": [{
                    "type": "ruleCollectionGroups",
                    "name": "RCG_child",
                    "properties": {"priority": 100}
                }]
            }]
        });

        let policies = decode("t.json", &template).expect("decode");
        assert_eq!(policies[0].rule_collection_groups[0].name, "RCG_child");
    }

    #[test]
    fn orphan_group_is_a_parse_error() {
        let template = json!({
            "resources": [{
                "type": GROUP_TYPE,
                "name": "missing/RCG",
                "properties": {"priority": 100}
            }]
        });

        let err = decode("t.json", &template).expect_err("orphan group");
        assert!(err.to_string().contains("resources[0]"), "{err}");
    }

    #[test]
    fn unknown_rule_type_is_a_parse_error() {
        let template = json!({
            "resources": [
                {"type": POLICY_TYPE, "name": "p1"},
                {
                    "type": GROUP_TYPE,
                    "name": "p1/g",
                    "properties": {"priority": 100, "ruleCollections": [{
                        "ruleCollectionType": "FirewallPolicyFilterRuleCollection",
                        "name": "rc",
                        "priority": 100,
                        "action": {"type": "Allow"},
                        "rules": [{"ruleType": "TeleportRule", "name": "r"}]
                    }]}
                }
            ]
        });

        let err = decode("t.json", &template).expect_err("unknown rule type");
        assert!(
            err.to_string()
                .contains("resources[1].properties.ruleCollections[0].rules[0]"),
            "{err}"
        );
    }

    #[test]
    fn ip_group_references_decode_to_names() {
        let template = json!({
            "parameters": {
                "ipGroups_ipg_db_externalid": {
                    "defaultValue": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/ipGroups/ipg-db"
                }
            },
            "resources": [
                {"type": POLICY_TYPE, "name": "p1"},
                {
                    "type": GROUP_TYPE,
                    "name": "p1/g",
                    "properties": {"priority": 100, "ruleCollections": [{
                        "ruleCollectionType": "FirewallPolicyFilterRuleCollection",
                        "name": "rc",
                        "priority": 100,
                        "action": {"type": "Allow"},
                        "rules": [{
                            "ruleType": "NetworkRule",
                            "name": "r",
                            "ipProtocols": ["TCP"],
                            "sourceIpGroups": ["[parameters('ipGroups_ipg_db_externalid')]"],
                            "destinationIpGroups": ["[parameters('ipGroups_ipg_app_externalid')]"],
                            "destinationPorts": ["1433"]
                        }]
                    }]}
                }
            ]
        });

        let policies = decode("t.json", &template).expect("decode");
        let Rule::Network(rule) = &policies[0].rule_collection_groups[0].rule_collections[0].rules[0]
        else {
            panic!("expected network rule");
        };
        assert_eq!(rule.source_ip_groups, vec!["ipg-db"]);
        assert_eq!(rule.destination_ip_groups, vec!["ipg_app"]);
    }

    #[test]
    fn encode_then_decode_is_model_equivalent() {
        let mut parent = Policy::new("base");
        parent.version = Some("20250101".to_string());
        let mut child = sample_policy();
        child.base_policy = Some("base".to_string());
        child.dns_settings = Some(json!({"enableProxy": true, "servers": ["10.0.0.4"]}));
        let policies = vec![parent, child];

        let template = encode(&policies, &resolver(), DEFAULT_API_VERSION).expect("encode");
        let decoded = decode("round-trip", &template).expect("decode");

        let mut expected = policies;
        expected[0].location = None;
        assert_eq!(decoded, expected);
    }

    #[test]
    fn encoded_groups_depend_on_policy_and_previous_group() {
        let mut policy = sample_policy();
        policy
            .rule_collection_groups
            .push(RuleCollectionGroup::new("RCG_second", 2000));

        let template = encode(&[policy], &resolver(), DEFAULT_API_VERSION).expect("encode");

        assert_eq!(
            template["resources"][2]["dependsOn"],
            json!([
                "[resourceId('Microsoft.Network/firewallPolicies', 'net01_20250613')]",
                "[resourceId('Microsoft.Network/firewallPolicies/ruleCollectionGroups', 'net01_20250613', 'RCG_net_01')]"
            ])
        );
        let app_rule = &template["resources"][1]["properties"]["ruleCollections"][2]["rules"][0];
        assert_eq!(
            app_rule["sourceIpGroups"][0],
            "/subscriptions/sub-1/resourceGroups/rg-ipg/providers/Microsoft.Network/ipGroups/ipg-clients"
        );
        assert_eq!(
            template["resources"][1]["properties"]["ruleCollections"][1]["action"]["type"],
            "DNAT"
        );
    }
}
