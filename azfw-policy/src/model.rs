//! In-memory Azure Firewall Policy model.
//!
//! A [`Policy`] owns its [`RuleCollectionGroup`]s, which own their
//! [`RuleCollection`]s, which own their [`Rule`]s. The model is a strict tree:
//! IP groups are held as bare names and only expanded to resource ids when a
//! codec renders them.
//!
//! The serde derives define the YAML interchange shape (camelCase keys, the
//! same spelling ARM templates use), so the YAML codec mirrors this module
//! field for field.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// Lowest and highest priority Azure accepts for groups and collections.
pub const PRIORITY_RANGE: std::ops::RangeInclusive<u32> = 100..=65000;

macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum $name {
            $($variant,)+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s))
                    .ok_or_else(|| {
                        let expected: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        format!("unknown {} '{}' (expected one of {})", stringify!($name), s, expected.join(", "))
                    })
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

string_enum!(
    /// Firewall policy SKU tier.
    SkuTier {
        Basic => "Basic",
        Standard => "Standard",
        Premium => "Premium",
    }
);

string_enum!(
    /// Rule collection type tag.
    RuleCollectionKind {
        Filter => "FirewallPolicyFilterRuleCollection",
        Nat => "FirewallPolicyNatRuleCollection",
    }
);

string_enum!(
    /// Action applied by a rule collection.
    RuleAction {
        Allow => "Allow",
        Deny => "Deny",
        Dnat => "DNAT",
    }
);

string_enum!(
    /// Layer 4 protocol of network and NAT rules.
    IpProtocol {
        Tcp => "TCP",
        Udp => "UDP",
        Icmp => "ICMP",
        Any => "Any",
    }
);

string_enum!(
    /// Application rule protocol.
    ApplicationProtocolType {
        Http => "Http",
        Https => "Https",
        Mssql => "Mssql",
    }
);

string_enum!(
    /// Discriminant of [`Rule`].
    RuleKind {
        Network => "NetworkRule",
        Nat => "NatRule",
        Application => "ApplicationRule",
    }
);

impl RuleCollectionKind {
    /// Whether `action` is allowed on a collection of this kind.
    pub fn accepts_action(self, action: RuleAction) -> bool {
        match self {
            RuleCollectionKind::Filter => matches!(action, RuleAction::Allow | RuleAction::Deny),
            RuleCollectionKind::Nat => action == RuleAction::Dnat,
        }
    }

    /// Whether rules of `kind` may live in a collection of this kind.
    pub fn accepts_rule(self, kind: RuleKind) -> bool {
        match self {
            RuleCollectionKind::Filter => {
                matches!(kind, RuleKind::Network | RuleKind::Application)
            }
            RuleCollectionKind::Nat => kind == RuleKind::Nat,
        }
    }
}

/// A firewall policy and its rule collection groups.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    /// Name without its date suffix.
    pub name: String,
    /// Date suffix that forms the versioned resource name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku_tier: Option<SkuTier>,
    /// Name of the parent policy whose rules are evaluated first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_intel_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_intel_whitelist: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_settings: Option<Value>,
    /// Groups in declaration order (`rcg_order`).
    #[serde(default)]
    pub rule_collection_groups: Vec<RuleCollectionGroup>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCollectionGroup {
    pub name: String,
    pub priority: u32,
    #[serde(default)]
    pub rule_collections: Vec<RuleCollection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCollection {
    pub name: String,
    pub priority: u32,
    #[serde(rename = "ruleCollectionType")]
    pub kind: RuleCollectionKind,
    pub action: RuleAction,
    pub rules: Vec<Rule>,
}

/// A single firewall rule, tagged by `ruleType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ruleType")]
pub enum Rule {
    #[serde(rename = "NetworkRule")]
    Network(NetworkRule),
    #[serde(rename = "NatRule")]
    Nat(NatRule),
    #[serde(rename = "ApplicationRule")]
    Application(ApplicationRule),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_protocols: Vec<IpProtocol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ip_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ip_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_fqdns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NatRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ip_protocols: Vec<IpProtocol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ip_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_ports: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_fqdn: Option<String>,
    #[serde(default)]
    pub translated_port: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocols: Vec<ApplicationProtocol>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fqdn_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_fqdns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_urls: Vec<String>,
    #[serde(rename = "terminateTLS", default)]
    pub terminate_tls: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_ip_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http_headers_to_insert: Vec<HttpHeader>,
}

/// `protocolType:port` pair of an application rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationProtocol {
    pub protocol_type: ApplicationProtocolType,
    pub port: u16,
}

/// Header inserted by an application rule (`header=value`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpHeader {
    pub header: String,
    pub value: String,
}

impl Policy {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Resource name including the date suffix.
    pub fn versioned_name(&self) -> String {
        crate::names::versioned_name(&self.name, self.version.as_deref())
    }

    pub fn group(&self, name: &str) -> Option<&RuleCollectionGroup> {
        self.rule_collection_groups.iter().find(|g| g.name == name)
    }

    /// Number of rules across every collection.
    pub fn rule_count(&self) -> usize {
        self.rule_collection_groups
            .iter()
            .flat_map(|g| &g.rule_collections)
            .map(|c| c.rules.len())
            .sum()
    }

    /// See [`Rule::shorten_ip_groups`].
    pub fn shorten_ip_groups(&mut self) {
        self.rule_collection_groups
            .iter_mut()
            .flat_map(|g| &mut g.rule_collections)
            .flat_map(|c| &mut c.rules)
            .for_each(Rule::shorten_ip_groups);
    }

    /// Check every structural invariant of the policy tree.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_name(&self.name, &self.name, "name")?;
        if self.name.contains('/') {
            return Err(ValidationError::new(
                &self.name,
                "name",
                "must not contain '/'",
            ));
        }
        if self.base_policy.as_deref() == Some(self.name.as_str()) {
            return Err(ValidationError::new(
                &self.name,
                "basePolicy",
                "a policy cannot be its own parent",
            ));
        }
        check_unique(
            &self.name,
            "ruleCollectionGroups",
            self.rule_collection_groups
                .iter()
                .map(|g| (g.name.as_str(), g.priority)),
        )?;
        for group in &self.rule_collection_groups {
            group.validate(&self.name)?;
        }
        Ok(())
    }
}

impl RuleCollectionGroup {
    pub fn new(name: impl Into<String>, priority: u32) -> Self {
        Self {
            name: name.into(),
            priority,
            rule_collections: Vec::new(),
        }
    }

    pub fn collection(&self, name: &str) -> Option<&RuleCollection> {
        self.rule_collections.iter().find(|c| c.name == name)
    }

    pub fn validate(&self, policy: &str) -> Result<(), ValidationError> {
        let entity = format!("{policy}/{}", self.name);
        check_name(&entity, &self.name, "name")?;
        check_priority(&entity, self.priority)?;
        check_unique(
            &entity,
            "ruleCollections",
            self.rule_collections
                .iter()
                .map(|c| (c.name.as_str(), c.priority)),
        )?;
        for collection in &self.rule_collections {
            collection.validate(&entity)?;
        }
        Ok(())
    }
}

impl RuleCollection {
    pub fn new(
        name: impl Into<String>,
        priority: u32,
        kind: RuleCollectionKind,
        action: RuleAction,
    ) -> Self {
        Self {
            name: name.into(),
            priority,
            kind,
            action,
            rules: Vec::new(),
        }
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.iter().find(|r| r.name() == name)
    }

    pub fn validate(&self, group: &str) -> Result<(), ValidationError> {
        let entity = format!("{group}/{}", self.name);
        check_name(&entity, &self.name, "name")?;
        check_priority(&entity, self.priority)?;
        if !self.kind.accepts_action(self.action) {
            return Err(ValidationError::new(
                &entity,
                "action",
                format!("{} is not valid for {}", self.action, self.kind),
            ));
        }
        if self.rules.is_empty() {
            return Err(ValidationError::new(&entity, "rules", "must not be empty"));
        }
        let mut seen = BTreeSet::new();
        for rule in &self.rules {
            let rule_entity = format!("{entity}/{}", rule.name());
            if !self.kind.accepts_rule(rule.kind()) {
                return Err(ValidationError::new(
                    &rule_entity,
                    "ruleType",
                    format!("{} cannot live in a {}", rule.kind(), self.kind),
                ));
            }
            if !seen.insert(rule.name()) {
                return Err(ValidationError::new(
                    &entity,
                    "rules",
                    format!("duplicate rule name '{}'", rule.name()),
                ));
            }
            rule.validate(&rule_entity)?;
        }
        Ok(())
    }
}

impl Rule {
    pub fn name(&self) -> &str {
        match self {
            Rule::Network(r) => &r.name,
            Rule::Nat(r) => &r.name,
            Rule::Application(r) => &r.name,
        }
    }

    pub fn kind(&self) -> RuleKind {
        match self {
            Rule::Network(_) => RuleKind::Network,
            Rule::Nat(_) => RuleKind::Nat,
            Rule::Application(_) => RuleKind::Application,
        }
    }

    /// Every IP group name the rule references, sources first.
    pub fn ip_groups(&self) -> Vec<&str> {
        let none: &[String] = &[];
        let (sources, destinations) = match self {
            Rule::Network(r) => (r.source_ip_groups.as_slice(), r.destination_ip_groups.as_slice()),
            Rule::Nat(r) => (r.source_ip_groups.as_slice(), none),
            Rule::Application(r) => (r.source_ip_groups.as_slice(), none),
        };
        sources
            .iter()
            .chain(destinations)
            .map(String::as_str)
            .collect()
    }

    /// Replace IP group resource ids and parameter references with bare names.
    pub fn shorten_ip_groups(&mut self) {
        let (sources, destinations) = match self {
            Rule::Network(r) => (&mut r.source_ip_groups, Some(&mut r.destination_ip_groups)),
            Rule::Nat(r) => (&mut r.source_ip_groups, None),
            Rule::Application(r) => (&mut r.source_ip_groups, None),
        };
        for reference in sources.iter_mut().chain(destinations.into_iter().flatten()) {
            *reference = crate::names::ip_group_name(reference);
        }
    }

    /// `entity` is the full slash-separated identity of this rule.
    pub fn validate(&self, entity: &str) -> Result<(), ValidationError> {
        check_name(entity, self.name(), "name")?;
        match self {
            Rule::Network(r) => {
                if r.ip_protocols.is_empty() {
                    return Err(ValidationError::new(entity, "ipProtocols", "must not be empty"));
                }
            }
            Rule::Nat(r) => {
                if r.ip_protocols.is_empty() {
                    return Err(ValidationError::new(entity, "ipProtocols", "must not be empty"));
                }
                let address = r.translated_address.as_deref().is_some_and(|s| !s.is_empty());
                let fqdn = r.translated_fqdn.as_deref().is_some_and(|s| !s.is_empty());
                match (address, fqdn) {
                    (true, true) => {
                        return Err(ValidationError::new(
                            entity,
                            "translatedAddress",
                            "translatedAddress and translatedFqdn are mutually exclusive",
                        ))
                    }
                    (false, false) => {
                        return Err(ValidationError::new(
                            entity,
                            "translatedAddress",
                            "one of translatedAddress or translatedFqdn is required",
                        ))
                    }
                    _ => {}
                }
                if r.translated_port.trim().is_empty() {
                    return Err(ValidationError::new(entity, "translatedPort", "is required"));
                }
            }
            Rule::Application(r) => {
                if r.protocols.is_empty() {
                    return Err(ValidationError::new(entity, "protocols", "must not be empty"));
                }
                for header in &r.http_headers_to_insert {
                    if header.header.trim().is_empty() {
                        return Err(ValidationError::new(
                            entity,
                            "httpHeadersToInsert",
                            "header name must not be empty",
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

fn check_name(entity: &str, name: &str, field: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        return Err(ValidationError::new(entity, field, "must not be empty"));
    }
    Ok(())
}

fn check_priority(entity: &str, priority: u32) -> Result<(), ValidationError> {
    if !PRIORITY_RANGE.contains(&priority) {
        return Err(ValidationError::new(
            entity,
            "priority",
            format!(
                "{priority} is outside {}..={}",
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end()
            ),
        ));
    }
    Ok(())
}

fn check_unique<'a>(
    entity: &str,
    field: &str,
    siblings: impl Iterator<Item = (&'a str, u32)>,
) -> Result<(), ValidationError> {
    let mut names = BTreeSet::new();
    let mut priorities = BTreeSet::new();
    for (name, priority) in siblings {
        if !names.insert(name) {
            return Err(ValidationError::new(
                entity,
                field,
                format!("duplicate name '{name}'"),
            ));
        }
        if !priorities.insert(priority) {
            return Err(ValidationError::new(
                entity,
                field,
                format!("duplicate priority {priority} (on '{name}')"),
            ));
        }
    }
    Ok(())
}

/// Position of one rule in the effective evaluation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleRef {
    pub policy: String,
    pub group: String,
    pub collection: String,
    pub rule: String,
}

impl fmt::Display for RuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.policy, self.group, self.collection, self.rule
        )
    }
}

/// A validated set of policies with unique names (the policy forest).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicySet {
    policies: Vec<Policy>,
}

impl PolicySet {
    /// Validate every policy and the uniqueness of policy names.
    pub fn new(policies: Vec<Policy>) -> Result<Self, ValidationError> {
        let mut names = BTreeSet::new();
        for policy in &policies {
            policy.validate()?;
            if !names.insert(policy.name.as_str()) {
                return Err(ValidationError::new(
                    &policy.name,
                    "name",
                    "duplicate policy name",
                ));
            }
        }
        Ok(Self { policies })
    }

    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    pub fn into_policies(self) -> Vec<Policy> {
        self.policies
    }

    pub fn get(&self, name: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Ancestors of `name` followed by the policy itself, root first.
    pub fn inheritance_chain(&self, name: &str) -> Result<Vec<&Policy>, ValidationError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(name);
        while let Some(policy_name) = current {
            if !seen.insert(policy_name) {
                return Err(ValidationError::new(
                    name,
                    "basePolicy",
                    format!("inheritance cycle through '{policy_name}'"),
                ));
            }
            let policy = self.get(policy_name).ok_or_else(|| {
                ValidationError::new(
                    name,
                    "basePolicy",
                    format!("policy '{policy_name}' is not part of the set"),
                )
            })?;
            chain.push(policy);
            current = policy.base_policy.as_deref();
        }
        chain.reverse();
        Ok(chain)
    }

    /// Check that every parent exists and no inheritance cycle is present.
    pub fn validate_parents(&self) -> Result<(), ValidationError> {
        for policy in &self.policies {
            self.inheritance_chain(&policy.name)?;
        }
        Ok(())
    }

    /// Rules of `name` in the order the firewall evaluates them: parent policy
    /// first, then by group priority, collection priority and list position.
    pub fn effective_rule_order(&self, name: &str) -> Result<Vec<RuleRef>, ValidationError> {
        let mut out = Vec::new();
        for policy in self.inheritance_chain(name)? {
            let mut groups: Vec<&RuleCollectionGroup> =
                policy.rule_collection_groups.iter().collect();
            groups.sort_by_key(|g| g.priority);
            for group in groups {
                let mut collections: Vec<&RuleCollection> = group.rule_collections.iter().collect();
                collections.sort_by_key(|c| c.priority);
                for collection in collections {
                    out.extend(collection.rules.iter().map(|rule| RuleRef {
                        policy: policy.name.clone(),
                        group: group.name.clone(),
                        collection: collection.name.clone(),
                        rule: rule.name().to_string(),
                    }));
                }
            }
        }
        Ok(out)
    }

    /// Policies ordered so that every parent precedes its children.
    pub fn parent_first(&self) -> Vec<&Policy> {
        let mut ordered: Vec<&Policy> = Vec::with_capacity(self.policies.len());
        let mut placed = BTreeSet::new();
        while ordered.len() < self.policies.len() {
            let before = ordered.len();
            for policy in &self.policies {
                if placed.contains(policy.name.as_str()) {
                    continue;
                }
                let ready = match policy.base_policy.as_deref() {
                    Some(parent) => placed.contains(parent) || self.get(parent).is_none(),
                    None => true,
                };
                if ready {
                    placed.insert(policy.name.as_str());
                    ordered.push(policy);
                }
            }
            if ordered.len() == before {
                // Cycle: keep the remaining policies in declaration order.
                ordered.extend(
                    self.policies
                        .iter()
                        .filter(|p| !placed.contains(p.name.as_str())),
                );
                break;
            }
        }
        ordered
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn network_rule(name: &str, port: &str) -> Rule {
        Rule::Network(NetworkRule {
            name: name.to_string(),
            ip_protocols: vec![IpProtocol::Tcp],
            source_addresses: vec!["10.2.2.2".to_string()],
            destination_addresses: vec!["11.2.3.4".to_string()],
            destination_ports: vec![port.to_string()],
            ..NetworkRule::default()
        })
    }

    pub fn nat_rule(name: &str) -> Rule {
        Rule::Nat(NatRule {
            name: name.to_string(),
            ip_protocols: vec![IpProtocol::Tcp],
            source_addresses: vec!["*".to_string()],
            destination_addresses: vec!["20.1.1.1".to_string()],
            destination_ports: vec!["8080".to_string()],
            translated_address: Some("10.0.0.4".to_string()),
            translated_port: "80".to_string(),
            ..NatRule::default()
        })
    }

    pub fn application_rule(name: &str) -> Rule {
        Rule::Application(ApplicationRule {
            name: name.to_string(),
            protocols: vec![ApplicationProtocol {
                protocol_type: ApplicationProtocolType::Https,
                port: 443,
            }],
            target_fqdns: vec!["www.microsoft.com".to_string()],
            source_addresses: vec!["10.0.0.0/24".to_string()],
            source_ip_groups: vec!["ipg-clients".to_string()],
            http_headers_to_insert: vec![HttpHeader {
                header: "X-Env".to_string(),
                value: "test".to_string(),
            }],
            ..ApplicationRule::default()
        })
    }

    /// `net01` with one group holding a network, a NAT and an application collection.
    pub fn sample_policy() -> Policy {
        let mut net = RuleCollection::new(
            "RC_net_1",
            1000,
            RuleCollectionKind::Filter,
            RuleAction::Allow,
        );
        net.rules.push(network_rule("Rnet1", "80"));
        let mut nat = RuleCollection::new("RC_nat_1", 900, RuleCollectionKind::Nat, RuleAction::Dnat);
        nat.rules.push(nat_rule("Rnat1"));
        let mut app = RuleCollection::new(
            "RC_app_1",
            1100,
            RuleCollectionKind::Filter,
            RuleAction::Allow,
        );
        app.rules.push(application_rule("Rapp1"));

        let mut group = RuleCollectionGroup::new("RCG_net_01", 1000);
        group.rule_collections = vec![net, nat, app];

        Policy {
            name: "net01".to_string(),
            version: Some("20250613".to_string()),
            location: Some("westeurope".to_string()),
            sku_tier: Some(SkuTier::Standard),
            threat_intel_mode: Some("Alert".to_string()),
            rule_collection_groups: vec![group],
            ..Policy::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{nat_rule, network_rule, sample_policy};
    use super::*;

    #[test]
    fn sample_policy_is_valid() {
        sample_policy().validate().expect("valid policy");
    }

    #[test]
    fn nat_rule_without_translation_target_is_rejected() {
        let mut policy = sample_policy();
        let Rule::Nat(rule) = &mut policy.rule_collection_groups[0].rule_collections[1].rules[0]
        else {
            panic!("expected NAT rule");
        };
        rule.translated_address = None;
        rule.translated_fqdn = None;

        let err = policy.validate().expect_err("missing translation target");

        assert_eq!(err.entity, "net01/RCG_net_01/RC_nat_1/Rnat1");
        assert_eq!(err.field, "translatedAddress");
    }

    #[test]
    fn nat_rule_with_both_translation_targets_is_rejected() {
        let Rule::Nat(mut rule) = nat_rule("Rnat1") else {
            panic!("expected NAT rule");
        };
        rule.translated_fqdn = Some("app.contoso.com".to_string());

        assert!(Rule::Nat(rule).validate("p/g/c/Rnat1").is_err());
    }

    #[test]
    fn duplicate_collection_priority_is_rejected() {
        let mut policy = sample_policy();
        policy.rule_collection_groups[0].rule_collections[1].priority = 1000;

        let err = policy.validate().expect_err("duplicate priority");

        assert_eq!(err.entity, "net01/RCG_net_01");
        assert!(err.message.contains("duplicate priority 1000"));
    }

    #[test]
    fn duplicate_rule_name_is_rejected() {
        let mut policy = sample_policy();
        policy.rule_collection_groups[0].rule_collections[0]
            .rules
            .push(network_rule("Rnet1", "443"));

        let err = policy.validate().expect_err("duplicate rule");
        assert_eq!(err.field, "rules");
    }

    #[test]
    fn empty_collection_is_rejected() {
        let mut policy = sample_policy();
        policy.rule_collection_groups[0].rule_collections[0]
            .rules
            .clear();

        let err = policy.validate().expect_err("empty collection");
        assert_eq!(err.entity, "net01/RCG_net_01/RC_net_1");
        assert_eq!(err.field, "rules");
    }

    #[test]
    fn nat_rule_in_filter_collection_is_rejected() {
        let mut policy = sample_policy();
        policy.rule_collection_groups[0].rule_collections[0]
            .rules
            .push(nat_rule("Rnat2"));

        let err = policy.validate().expect_err("wrong rule kind");
        assert_eq!(err.field, "ruleType");
    }

    #[test]
    fn filter_collection_rejects_dnat_action() {
        let mut policy = sample_policy();
        policy.rule_collection_groups[0].rule_collections[0].action = RuleAction::Dnat;

        assert_eq!(policy.validate().expect_err("bad action").field, "action");
    }

    #[test]
    fn effective_order_is_parent_first_then_priority() {
        let mut parent = Policy::new("parent");
        let mut group = RuleCollectionGroup::new("base", 200);
        let mut rc = RuleCollection::new("deny", 100, RuleCollectionKind::Filter, RuleAction::Deny);
        rc.rules.push(network_rule("block", "22"));
        group.rule_collections.push(rc);
        parent.rule_collection_groups.push(group);

        let mut child = sample_policy();
        child.base_policy = Some("parent".to_string());

        let set = PolicySet::new(vec![child, parent]).expect("valid set");
        let order: Vec<String> = set
            .effective_rule_order("net01")
            .expect("order")
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(
            order,
            vec![
                "parent/base/deny/block",
                "net01/RCG_net_01/RC_nat_1/Rnat1",
                "net01/RCG_net_01/RC_net_1/Rnet1",
                "net01/RCG_net_01/RC_app_1/Rapp1",
            ]
        );
        let names: Vec<&str> = set.parent_first().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["parent", "net01"]);
    }

    #[test]
    fn missing_parent_and_cycles_are_reported() {
        let mut a = Policy::new("a");
        a.base_policy = Some("b".to_string());
        let set = PolicySet::new(vec![a.clone()]).expect("valid set");
        assert!(set.validate_parents().is_err());

        let mut b = Policy::new("b");
        b.base_policy = Some("a".to_string());
        let set = PolicySet::new(vec![a, b]).expect("valid set");
        let err = set.validate_parents().expect_err("cycle");
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn enums_parse_case_insensitively() {
        assert_eq!("tcp".parse::<IpProtocol>(), Ok(IpProtocol::Tcp));
        assert_eq!("Dnat".parse::<RuleAction>(), Ok(RuleAction::Dnat));
        assert_eq!(
            "firewallpolicynatrulecollection".parse::<RuleCollectionKind>(),
            Ok(RuleCollectionKind::Nat)
        );
        assert!("Ftp".parse::<ApplicationProtocolType>().is_err());
    }
}
