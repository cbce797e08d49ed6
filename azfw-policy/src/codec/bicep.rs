//! Bicep export.
//!
//! Policies are lowered into a small document model ([`BicepDocument`]) and
//! printed by a dedicated serializer, so quoting, indentation and ordering
//! are decided in one place and re-rendering an unchanged model yields the
//! same bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use super::arm::{DEFAULT_API_VERSION, GROUP_TYPE, POLICY_TYPE};
use super::{unique_file_names, IpGroupResolver};
use crate::error::RenderError;
use crate::model::{Policy, Rule, RuleCollection, RuleCollectionGroup};
use crate::names::file_stem;

pub const EXTENSION: &str = "bicep";
const INDENT: &str = "  ";

/// A Bicep expression or literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Bool(bool),
    Array(Vec<Value>),
    /// Properties in output order.
    Object(Vec<(String, Value)>),
    /// Raw expression text such as `resourceGroup().location`.
    Expr(String),
}

impl Value {
    pub fn string(text: impl Into<String>) -> Self {
        Value::String(text.into())
    }

    pub fn strings(items: &[String]) -> Self {
        Value::Array(items.iter().map(|s| Value::String(s.clone())).collect())
    }

    pub fn object<I, K>(props: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Value::Object(props.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convert a pass-through JSON block.
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Expr("null".to_string()),
            JsonValue::Bool(b) => Value::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Expr(format!("json('{n}')")),
            },
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub symbol: String,
    pub resource_type: String,
    pub api_version: String,
    pub existing: bool,
    /// Symbol of the parent resource.
    pub parent: Option<String>,
    /// Symbols this resource explicitly depends on.
    pub depends_on: Vec<String>,
    /// Properties after `parent:` and before `dependsOn:`, usually `name` first.
    pub body: Vec<(String, Value)>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BicepDocument {
    pub params: Vec<Param>,
    pub resources: Vec<Resource>,
}

impl BicepDocument {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for param in &self.params {
            let _ = write!(out, "param {} {}", param.name, param.ty);
            if let Some(default) = &param.default {
                out.push_str(" = ");
                write_value(&mut out, default, 0);
            }
            out.push('\n');
        }
        for resource in &self.resources {
            if !out.is_empty() {
                out.push('\n');
            }
            write_resource(&mut out, resource);
        }
        out
    }
}

fn write_resource(out: &mut String, resource: &Resource) {
    let _ = write!(
        out,
        "resource {} '{}@{}' ",
        resource.symbol, resource.resource_type, resource.api_version
    );
    if resource.existing {
        out.push_str("existing ");
    }
    out.push_str("= {\n");
    if let Some(parent) = &resource.parent {
        let _ = writeln!(out, "{INDENT}parent: {parent}");
    }
    let mut props = resource.body.iter();
    // `name` leads so the resource reads top-down.
    if let Some((key, value)) = props.next() {
        write_property(out, key, value, 1);
    }
    if !resource.depends_on.is_empty() {
        let deps = Value::Array(
            resource
                .depends_on
                .iter()
                .map(|d| Value::Expr(d.clone()))
                .collect(),
        );
        write_property(out, "dependsOn", &deps, 1);
    }
    for (key, value) in props {
        write_property(out, key, value, 1);
    }
    out.push_str("}\n");
}

fn write_property(out: &mut String, key: &str, value: &Value, depth: usize) {
    out.push_str(&INDENT.repeat(depth));
    out.push_str(&property_key(key));
    out.push_str(": ");
    write_value(out, value, depth);
    out.push('\n');
}

fn write_value(out: &mut String, value: &Value, depth: usize) {
    match value {
        Value::String(s) => {
            out.push('\'');
            out.push_str(&escape(s));
            out.push('\'');
        }
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Expr(e) => out.push_str(e),
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for item in items {
                out.push_str(&INDENT.repeat(depth + 1));
                write_value(out, item, depth + 1);
                out.push('\n');
            }
            out.push_str(&INDENT.repeat(depth));
            out.push(']');
        }
        Value::Object(props) if props.is_empty() => out.push_str("{}"),
        Value::Object(props) => {
            out.push_str("{\n");
            for (key, value) in props {
                write_property(out, key, value, depth + 1);
            }
            out.push_str(&INDENT.repeat(depth));
            out.push('}');
        }
    }
}

/// Escape a string for a single-quoted Bicep literal.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '$' if chars.peek() == Some(&'{') => out.push_str("\\$"),
            other => out.push(other),
        }
    }
    out
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn property_key(key: &str) -> String {
    if is_identifier(key) {
        key.to_string()
    } else {
        format!("'{}'", escape(key))
    }
}

/// Turn an arbitrary name into a Bicep identifier.
fn sanitize_symbol(name: &str) -> String {
    let mut symbol: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if !symbol.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        symbol.insert(0, '_');
    }
    symbol
}

/// Inputs shared by every policy rendered for one firewall.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportContext {
    pub api_version: String,
    /// Default for the `location` parameter; falls back to the policy's own
    /// location, then to the resource group location.
    pub location: Option<String>,
    pub ip_groups: Option<IpGroupResolver>,
    /// Versioned resource names of policies that may be referenced as parents.
    pub policy_names: BTreeMap<String, String>,
}

impl Default for ExportContext {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
            location: None,
            ip_groups: None,
            policy_names: BTreeMap::new(),
        }
    }
}

impl ExportContext {
    pub fn new(api_version: impl Into<String>) -> Self {
        Self {
            api_version: api_version.into(),
            ..Self::default()
        }
    }

    pub fn with_ip_groups(mut self, resolver: IpGroupResolver) -> Self {
        self.ip_groups = Some(resolver);
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// Remember the versioned names of `policies` for parent references.
    pub fn with_policies(mut self, policies: &[Policy]) -> Self {
        self.policy_names.extend(
            policies
                .iter()
                .map(|p| (p.name.clone(), p.versioned_name())),
        );
        self
    }

    fn versioned(&self, name: &str) -> String {
        self.policy_names
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }
}

/// File name of a policy's Bicep module.
pub fn file_name(policy: &Policy) -> String {
    format!("{}.{EXTENSION}", file_stem(&policy.name))
}

/// Lower one policy into a Bicep document.
pub fn build(policy: &Policy, ctx: &ExportContext) -> Result<BicepDocument, RenderError> {
    let location_default = match ctx.location.as_ref().or(policy.location.as_ref()) {
        Some(location) => Value::string(location),
        None => Value::Expr("resourceGroup().location".to_string()),
    };
    let mut doc = BicepDocument {
        params: vec![Param {
            name: "location".to_string(),
            ty: "string".to_string(),
            default: Some(location_default),
        }],
        resources: Vec::new(),
    };
    let mut symbols = BTreeSet::from(["location".to_string()]);

    let mut props = Vec::new();
    if let Some(tier) = policy.sku_tier {
        props.push(("sku".to_string(), Value::object([("tier", Value::string(tier.as_str()))])));
    }
    if let Some(parent) = &policy.base_policy {
        let symbol = unique_symbol(&mut symbols, "basePolicy");
        doc.resources.push(Resource {
            symbol: symbol.clone(),
            resource_type: POLICY_TYPE.to_string(),
            api_version: ctx.api_version.clone(),
            existing: true,
            parent: None,
            depends_on: Vec::new(),
            body: vec![("name".to_string(), Value::string(ctx.versioned(parent)))],
        });
        props.push((
            "basePolicy".to_string(),
            Value::object([("id", Value::Expr(format!("{symbol}.id")))]),
        ));
    }
    if let Some(mode) = &policy.threat_intel_mode {
        props.push(("threatIntelMode".to_string(), Value::string(mode)));
    }
    if let Some(whitelist) = &policy.threat_intel_whitelist {
        props.push(("threatIntelWhitelist".to_string(), Value::from_json(whitelist)));
    }
    if let Some(dns) = &policy.dns_settings {
        props.push(("dnsSettings".to_string(), Value::from_json(dns)));
    }

    let policy_symbol = unique_symbol(&mut symbols, "policy");
    doc.resources.push(Resource {
        symbol: policy_symbol.clone(),
        resource_type: POLICY_TYPE.to_string(),
        api_version: ctx.api_version.clone(),
        existing: false,
        parent: None,
        depends_on: Vec::new(),
        body: vec![
            ("name".to_string(), Value::string(policy.versioned_name())),
            ("location".to_string(), Value::Expr("location".to_string())),
            ("properties".to_string(), Value::Object(props)),
        ],
    });

    let mut previous: Option<String> = None;
    for group in &policy.rule_collection_groups {
        let symbol = unique_symbol(&mut symbols, &format!("rcg_{}", group.name));
        let mut depends_on = vec![policy_symbol.clone()];
        depends_on.extend(previous.clone());
        doc.resources.push(Resource {
            symbol: symbol.clone(),
            resource_type: GROUP_TYPE.to_string(),
            api_version: ctx.api_version.clone(),
            existing: false,
            parent: Some(policy_symbol.clone()),
            depends_on,
            body: vec![
                ("name".to_string(), Value::string(&group.name)),
                ("properties".to_string(), group_properties(policy, group, ctx)?),
            ],
        });
        previous = Some(symbol);
    }
    Ok(doc)
}

/// Render one policy as Bicep text.
pub fn render(policy: &Policy, ctx: &ExportContext) -> Result<String, RenderError> {
    Ok(build(policy, ctx)?.render())
}

/// Render every policy as `(file name, contents)`, in the given order.
/// Nothing is written.
pub fn render_dir(
    policies: &[&Policy],
    ctx: &ExportContext,
) -> Result<Vec<(String, String)>, RenderError> {
    unique_file_names(policies.iter().copied(), file_name)?
        .into_iter()
        .zip(policies)
        .map(|(name, policy)| Ok((name, render(policy, ctx)?)))
        .collect()
}

fn unique_symbol(used: &mut BTreeSet<String>, name: &str) -> String {
    let base = sanitize_symbol(name);
    let mut symbol = base.clone();
    let mut n = 2;
    while !used.insert(symbol.clone()) {
        symbol = format!("{base}_{n}");
        n += 1;
    }
    symbol
}

fn group_properties(
    policy: &Policy,
    group: &RuleCollectionGroup,
    ctx: &ExportContext,
) -> Result<Value, RenderError> {
    let entity = format!("{}/{}", policy.name, group.name);
    let collections = group
        .rule_collections
        .iter()
        .map(|c| collection_value(c, &entity, ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::object([
        ("priority", Value::Int(i64::from(group.priority))),
        ("ruleCollections", Value::Array(collections)),
    ]))
}

fn collection_value(
    collection: &RuleCollection,
    group_entity: &str,
    ctx: &ExportContext,
) -> Result<Value, RenderError> {
    let entity = format!("{group_entity}/{}", collection.name);
    let rules = collection
        .rules
        .iter()
        .map(|rule| rule_value(rule, &format!("{entity}/{}", rule.name()), ctx))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::object([
        ("ruleCollectionType", Value::string(collection.kind.as_str())),
        ("name", Value::string(&collection.name)),
        ("priority", Value::Int(i64::from(collection.priority))),
        (
            "action",
            Value::object([("type", Value::string(collection.action.as_str()))]),
        ),
        ("rules", Value::Array(rules)),
    ]))
}

fn ip_groups(
    names: &[String],
    entity: &str,
    field: &str,
    ctx: &ExportContext,
) -> Result<Value, RenderError> {
    if names.is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let resolver = ctx.ip_groups.as_ref().ok_or_else(|| {
        RenderError::new(
            entity,
            field,
            format!(
                "references IP group '{}' but no IP group subscription/resource group is configured",
                names[0]
            ),
        )
    })?;
    Ok(Value::Array(
        names
            .iter()
            .map(|name| Value::String(resolver.resource_id(name)))
            .collect(),
    ))
}

fn rule_value(rule: &Rule, entity: &str, ctx: &ExportContext) -> Result<Value, RenderError> {
    let mut props = vec![
        ("name".to_string(), Value::string(rule.name())),
        ("ruleType".to_string(), Value::string(rule.kind().as_str())),
    ];
    let mut push = |key: &str, value: Value| props.push((key.to_string(), value));
    let protocols = |items: &[crate::model::IpProtocol]| {
        Value::Array(items.iter().map(|p| Value::string(p.as_str())).collect())
    };

    match rule {
        Rule::Network(r) => {
            if let Some(description) = &r.description {
                push("description", Value::string(description));
            }
            push("ipProtocols", protocols(&r.ip_protocols));
            push("sourceAddresses", Value::strings(&r.source_addresses));
            push(
                "sourceIpGroups",
                ip_groups(&r.source_ip_groups, entity, "sourceIpGroups", ctx)?,
            );
            push("destinationAddresses", Value::strings(&r.destination_addresses));
            push(
                "destinationIpGroups",
                ip_groups(&r.destination_ip_groups, entity, "destinationIpGroups", ctx)?,
            );
            push("destinationFqdns", Value::strings(&r.destination_fqdns));
            push("destinationPorts", Value::strings(&r.destination_ports));
        }
        Rule::Nat(r) => {
            if let Some(description) = &r.description {
                push("description", Value::string(description));
            }
            push("ipProtocols", protocols(&r.ip_protocols));
            push("sourceAddresses", Value::strings(&r.source_addresses));
            push(
                "sourceIpGroups",
                ip_groups(&r.source_ip_groups, entity, "sourceIpGroups", ctx)?,
            );
            push("destinationAddresses", Value::strings(&r.destination_addresses));
            push("destinationPorts", Value::strings(&r.destination_ports));
            if let Some(address) = &r.translated_address {
                push("translatedAddress", Value::string(address));
            }
            if let Some(fqdn) = &r.translated_fqdn {
                push("translatedFqdn", Value::string(fqdn));
            }
            if r.translated_port.is_empty() {
                return Err(RenderError::new(entity, "translatedPort", "is required"));
            }
            push("translatedPort", Value::string(&r.translated_port));
        }
        Rule::Application(r) => {
            if let Some(description) = &r.description {
                push("description", Value::string(description));
            }
            push(
                "protocols",
                Value::Array(
                    r.protocols
                        .iter()
                        .map(|p| {
                            Value::object([
                                ("protocolType", Value::string(p.protocol_type.as_str())),
                                ("port", Value::Int(i64::from(p.port))),
                            ])
                        })
                        .collect(),
                ),
            );
            push("fqdnTags", Value::strings(&r.fqdn_tags));
            push("webCategories", Value::strings(&r.web_categories));
            push("targetFqdns", Value::strings(&r.target_fqdns));
            push("targetUrls", Value::strings(&r.target_urls));
            push("terminateTLS", Value::Bool(r.terminate_tls));
            push("sourceAddresses", Value::strings(&r.source_addresses));
            push(
                "sourceIpGroups",
                ip_groups(&r.source_ip_groups, entity, "sourceIpGroups", ctx)?,
            );
            push("destinationAddresses", Value::strings(&r.destination_addresses));
            push(
                "httpHeadersToInsert",
                Value::Array(
                    r.http_headers_to_insert
                        .iter()
                        .map(|h| {
                            Value::object([
                                ("header", Value::string(&h.header)),
                                ("value", Value::string(&h.value)),
                            ])
                        })
                        .collect(),
                ),
            );
        }
    }
    Ok(Value::Object(props))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::fixtures::sample_policy;
    use crate::model::RuleCollectionGroup;

    fn context() -> ExportContext {
        ExportContext::new(DEFAULT_API_VERSION).with_ip_groups(IpGroupResolver::new("sub", "rg"))
    }

    #[test]
    fn escapes_bicep_string_literals() {
        assert_eq!(escape(r"a\b"), r"a\\b");
        assert_eq!(escape("it's"), r"it\'s");
        assert_eq!(escape("${x} $y"), r"\${x} $y");
        assert_eq!(escape("a\nb"), r"a\nb");
    }

    #[test]
    fn renders_nested_values_with_two_space_indent() {
        let doc = BicepDocument {
            params: Vec::new(),
            resources: vec![Resource {
                symbol: "r".to_string(),
                resource_type: "T/x".to_string(),
                api_version: "1".to_string(),
                existing: false,
                parent: None,
                depends_on: Vec::new(),
                body: vec![
                    ("name".to_string(), Value::string("n")),
                    (
                        "properties".to_string(),
                        Value::object([
                            ("list", Value::strings(&["a".to_string()])),
                            ("empty", Value::Array(Vec::new())),
                            ("my-key", Value::Int(1)),
                        ]),
                    ),
                ],
            }],
        };

        assert_eq!(
            doc.render(),
            "resource r 'T/x@1' = {\n  name: 'n'\n  properties: {\n    list: [\n      'a'\n    ]\n    empty: []\n    'my-key': 1\n  }\n}\n"
        );
    }

    #[test]
    fn groups_have_parent_and_explicit_dependencies() {
        let mut policy = sample_policy();
        policy
            .rule_collection_groups
            .push(RuleCollectionGroup::new("RCG second", 2000));

        let text = render(&policy, &context()).expect("render");

        assert!(text.starts_with("param location string = 'westeurope'\n"));
        assert!(text.contains(
            "resource policy 'Microsoft.Network/firewallPolicies@2024-05-01' = {\n  name: 'net01_20250613'\n  location: location\n"
        ));
        assert!(text.contains(
            "resource rcg_RCG_second 'Microsoft.Network/firewallPolicies/ruleCollectionGroups@2024-05-01' = {\n  parent: policy\n  name: 'RCG second'\n  dependsOn: [\n    policy\n    rcg_RCG_net_01\n  ]\n"
        ));
        assert!(text.contains("ruleCollections: []"));
        assert!(text.contains("destinationFqdns: []"));
        assert!(text.contains(
            "'/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/ipGroups/ipg-clients'"
        ));
    }

    #[test]
    fn base_policy_is_an_existing_resource() {
        let mut policy = sample_policy();
        policy.base_policy = Some("parent".to_string());
        let mut parent = Policy::new("parent");
        parent.version = Some("20250101".to_string());
        let ctx = context().with_policies(&[parent]);

        let text = render(&policy, &ctx).expect("render");

        assert!(text.contains(
            "resource basePolicy 'Microsoft.Network/firewallPolicies@2024-05-01' existing = {\n  name: 'parent_20250101'\n}\n"
        ));
        assert!(text.contains("basePolicy: {\n      id: basePolicy.id\n    }"));
    }

    #[test]
    fn ip_group_without_resolver_is_a_render_error() {
        let err = render(&sample_policy(), &ExportContext::default()).expect_err("no resolver");

        assert_eq!(err.entity, "net01/RCG_net_01/RC_app_1/Rapp1");
        assert_eq!(err.field, "sourceIpGroups");
    }

    #[test]
    fn rendering_is_deterministic() {
        let policy = sample_policy();
        assert_eq!(
            render(&policy, &context()).expect("first"),
            render(&policy, &context()).expect("second")
        );
    }

    #[test]
    fn symbols_are_unique_identifiers() {
        let mut used = BTreeSet::new();
        assert_eq!(unique_symbol(&mut used, "rcg_1-a"), "rcg_1_a");
        assert_eq!(unique_symbol(&mut used, "rcg_1 a"), "rcg_1_a_2");
        assert_eq!(unique_symbol(&mut used, "9x"), "_9x");
    }

    #[test]
    fn fractional_numbers_render_through_json() {
        let value = Value::from_json(&json!({"ratio": 0.5}));
        assert_eq!(
            value,
            Value::object([("ratio", Value::Expr("json('0.5')".to_string()))])
        );

        let mut out = String::new();
        write_value(&mut out, &value, 0);
        assert!(out.contains("ratio: json('0.5')"));
    }

    #[test]
    fn colliding_file_names_are_rejected() {
        let first = Policy::new("fw a");
        let second = Policy::new("fw-a");

        let err = render_dir(&[&first, &second], &context()).expect_err("collision");

        assert_eq!(err.entity, "fw-a");
        assert!(err.message.contains("'fw a'"));
    }
}
