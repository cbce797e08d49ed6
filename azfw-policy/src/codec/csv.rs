//! Flat CSV codec: one row per rule with the policy, group and collection
//! context repeated on every row.
//!
//! Rows with an empty `RuleCollectionGroup` stand for a policy without
//! groups, rows with an empty `RuleCollection` for a group without
//! collections. Rows of one block must be contiguous.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{list_files, unique_file_names};
use crate::error::{Error, ParseError, RenderError};
use crate::model::{
    ApplicationProtocol, ApplicationRule, HttpHeader, IpProtocol, NatRule, NetworkRule, Policy,
    Rule, RuleAction, RuleCollection, RuleCollectionGroup, RuleCollectionKind, RuleKind, SkuTier,
};
use crate::names::file_stem;

pub const EXTENSION: &str = "csv";

/// Escapes a separator or edge whitespace inside a list item.
const ESCAPE: char = '\\';

/// Separators used when flattening policies into rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvSchema {
    /// Column separator.
    pub separator: char,
    /// Separator between list items within a cell.
    pub delimiter: char,
    /// Separator between the parts of a compound item (`Https$443`).
    pub subdelimiter: char,
}

impl Default for CsvSchema {
    fn default() -> Self {
        Self {
            separator: ';',
            delimiter: ',',
            subdelimiter: '$',
        }
    }
}

impl CsvSchema {
    /// Check that the separators are distinct single-byte characters.
    pub fn validate(&self) -> Result<(), String> {
        for (name, c) in [
            ("separator", self.separator),
            ("delimiter", self.delimiter),
            ("subdelimiter", self.subdelimiter),
        ] {
            if !c.is_ascii() || c.is_ascii_alphanumeric() || c == '"' || c == ESCAPE {
                return Err(format!("{name} '{c}' must be an ASCII punctuation character"));
            }
        }
        if self.separator == self.delimiter
            || self.separator == self.subdelimiter
            || self.delimiter == self.subdelimiter
        {
            return Err("separator, delimiter and subdelimiter must differ".to_string());
        }
        Ok(())
    }

    /// Join plain values, escaping separators and edge whitespace.
    pub fn join_list(&self, items: &[String]) -> String {
        let escaped: Vec<String> = items.iter().map(|item| self.escape_item(item)).collect();
        escaped.join(&self.delimiter.to_string())
    }

    /// Split a cell written by [`CsvSchema::join_list`] or by hand. Unescaped
    /// whitespace around items is dropped, and so are empty items.
    pub fn split_list(&self, cell: &str) -> Vec<String> {
        self.split_items(cell)
            .into_iter()
            .map(unescape)
            .filter(|item| !item.is_empty())
            .collect()
    }

    /// One compound item such as `Https$443`; join several with
    /// [`CsvSchema::join_items`].
    pub fn join_pair(&self, first: &str, second: &str) -> String {
        format!(
            "{}{}{}",
            self.escape_item(first),
            self.subdelimiter,
            self.escape_item(second)
        )
    }

    /// Join items that are already escaped, such as [`CsvSchema::join_pair`] output.
    pub fn join_items(&self, items: &[String]) -> String {
        items.join(&self.delimiter.to_string())
    }

    /// Raw items of a cell holding compound values, escapes intact.
    pub fn split_items<'c>(&self, cell: &'c str) -> Vec<&'c str> {
        split_unescaped(cell, self.delimiter)
            .into_iter()
            .filter(|item| !item.trim().is_empty())
            .collect()
    }

    /// Split one raw compound item into its two unescaped parts.
    pub fn split_pair(&self, item: &str) -> Option<(String, String)> {
        match split_unescaped(item, self.subdelimiter).as_slice() {
            [first, second] => Some((unescape(first), unescape(second))),
            _ => None,
        }
    }

    fn escape_item(&self, item: &str) -> String {
        let last = item.chars().count().saturating_sub(1);
        let mut out = String::with_capacity(item.len());
        for (i, c) in item.chars().enumerate() {
            let at_edge = i == 0 || i == last;
            if c == ESCAPE
                || c == self.delimiter
                || c == self.subdelimiter
                || (at_edge && c.is_whitespace())
            {
                out.push(ESCAPE);
            }
            out.push(c);
        }
        out
    }

    fn separator_byte(&self) -> Option<u8> {
        u8::try_from(self.separator).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Row {
    policy_name: String,
    policy_version: String,
    parent_policy: String,
    location: String,
    sku_tier: String,
    threat_intel_mode: String,
    threat_intel_whitelist: String,
    dns_settings: String,
    rule_collection_group: String,
    rule_collection_group_priority: String,
    rule_collection: String,
    rule_collection_priority: String,
    rule_collection_type: String,
    rule_collection_action: String,
    rule_type: String,
    rule_name: String,
    description: String,
    ip_protocols: String,
    source_addresses: String,
    source_ip_groups: String,
    destination_addresses: String,
    destination_ip_groups: String,
    destination_fqdns: String,
    destination_ports: String,
    translated_address: String,
    translated_fqdn: String,
    translated_port: String,
    protocols: String,
    target_fqdns: String,
    target_urls: String,
    fqdn_tags: String,
    web_categories: String,
    #[serde(rename = "TerminateTLS")]
    terminate_tls: String,
    http_headers_to_insert: String,
}

/// Split on `sep` where it is not escaped. Escapes are kept.
fn split_unescaped(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
        } else if c == ESCAPE {
            escaped = true;
        } else if c == sep {
            parts.push(&text[start..i]);
            start = i + c.len_utf8();
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Drop unescaped whitespace at both ends, then resolve escapes. A trailing
/// lone escape is kept literally.
fn unescape(raw: &str) -> String {
    let mut chars: Vec<(char, bool)> = Vec::with_capacity(raw.len());
    let mut iter = raw.chars();
    while let Some(c) = iter.next() {
        if c == ESCAPE {
            chars.push((iter.next().unwrap_or(ESCAPE), true));
        } else {
            chars.push((c, false));
        }
    }
    let blank = |&(c, escaped): &(char, bool)| !escaped && c.is_whitespace();
    let start = chars.iter().position(|c| !blank(c)).unwrap_or(chars.len());
    let end = chars.iter().rposition(|c| !blank(c)).map_or(start, |i| i + 1);
    chars[start..end].iter().map(|&(c, _)| c).collect()
}

/// File name of a policy's CSV document.
pub fn file_name(policy: &Policy) -> String {
    format!("{}.{EXTENSION}", file_stem(&policy.name))
}

/// Flatten `policies` into one CSV document with a header row.
pub fn encode(policies: &[Policy], schema: &CsvSchema) -> Result<String, RenderError> {
    let separator = schema.separator_byte().ok_or_else(|| {
        RenderError::new("csv", "separator", "must be a single-byte character")
    })?;
    let mut writer = ::csv::WriterBuilder::new()
        .delimiter(separator)
        .from_writer(Vec::new());
    for policy in policies {
        for row in policy_rows(policy, schema)? {
            writer
                .serialize(&row)
                .map_err(|e| RenderError::new(&policy.name, "row", e.to_string()))?;
        }
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| RenderError::new("csv", "output", e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| RenderError::new("csv", "output", e.to_string()))
}

pub fn encode_policy(policy: &Policy, schema: &CsvSchema) -> Result<String, RenderError> {
    encode(std::slice::from_ref(policy), schema)
}

/// Render every policy as `(file name, contents)`. Nothing is written.
pub fn render_dir(
    policies: &[Policy],
    schema: &CsvSchema,
) -> Result<Vec<(String, String)>, RenderError> {
    unique_file_names(policies, file_name)?
        .into_iter()
        .zip(policies)
        .map(|(name, policy)| Ok((name, encode_policy(policy, schema)?)))
        .collect()
}

fn policy_rows(policy: &Policy, schema: &CsvSchema) -> Result<Vec<Row>, RenderError> {
    let opaque = |value: &Option<Value>, field: &str| -> Result<String, RenderError> {
        value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map(Option::unwrap_or_default)
            .map_err(|e| RenderError::new(&policy.name, field, e.to_string()))
    };
    let base = Row {
        policy_name: policy.name.clone(),
        policy_version: policy.version.clone().unwrap_or_default(),
        parent_policy: policy.base_policy.clone().unwrap_or_default(),
        location: policy.location.clone().unwrap_or_default(),
        sku_tier: policy.sku_tier.map(|t| t.to_string()).unwrap_or_default(),
        threat_intel_mode: policy.threat_intel_mode.clone().unwrap_or_default(),
        threat_intel_whitelist: opaque(&policy.threat_intel_whitelist, "threatIntelWhitelist")?,
        dns_settings: opaque(&policy.dns_settings, "dnsSettings")?,
        ..Row::default()
    };

    let mut rows = Vec::new();
    if policy.rule_collection_groups.is_empty() {
        rows.push(base.clone());
    }
    for group in &policy.rule_collection_groups {
        let group_row = Row {
            rule_collection_group: group.name.clone(),
            rule_collection_group_priority: group.priority.to_string(),
            ..base.clone()
        };
        if group.rule_collections.is_empty() {
            rows.push(group_row.clone());
        }
        for collection in &group.rule_collections {
            let collection_row = Row {
                rule_collection: collection.name.clone(),
                rule_collection_priority: collection.priority.to_string(),
                rule_collection_type: collection.kind.to_string(),
                rule_collection_action: collection.action.to_string(),
                ..group_row.clone()
            };
            if collection.rules.is_empty() {
                rows.push(collection_row.clone());
            }
            for rule in &collection.rules {
                let entity = format!(
                    "{}/{}/{}/{}",
                    policy.name,
                    group.name,
                    collection.name,
                    rule.name()
                );
                rows.push(rule_row(rule, &entity, collection_row.clone(), schema)?);
            }
        }
    }
    Ok(rows)
}

fn rule_row(
    rule: &Rule,
    entity: &str,
    mut row: Row,
    schema: &CsvSchema,
) -> Result<Row, RenderError> {
    let list = |items: &[String]| schema.join_list(items);
    let description = |text: &Option<String>| match text.as_deref() {
        Some("") => Err(RenderError::new(
            entity,
            "description",
            "is empty and would read back as absent",
        )),
        other => Ok(other.unwrap_or_default().to_string()),
    };
    check_items(rule, entity)?;
    let protocols = |items: &[IpProtocol]| {
        let items: Vec<String> = items.iter().map(ToString::to_string).collect();
        schema.join_list(&items)
    };
    row.rule_type = rule.kind().to_string();
    row.rule_name = rule.name().to_string();
    match rule {
        Rule::Network(r) => {
            row.description = description(&r.description)?;
            row.ip_protocols = protocols(&r.ip_protocols);
            row.source_addresses = list(&r.source_addresses);
            row.source_ip_groups = list(&r.source_ip_groups);
            row.destination_addresses = list(&r.destination_addresses);
            row.destination_ip_groups = list(&r.destination_ip_groups);
            row.destination_fqdns = list(&r.destination_fqdns);
            row.destination_ports = list(&r.destination_ports);
        }
        Rule::Nat(r) => {
            row.description = description(&r.description)?;
            row.ip_protocols = protocols(&r.ip_protocols);
            row.source_addresses = list(&r.source_addresses);
            row.source_ip_groups = list(&r.source_ip_groups);
            row.destination_addresses = list(&r.destination_addresses);
            row.destination_ports = list(&r.destination_ports);
            row.translated_address = r.translated_address.clone().unwrap_or_default();
            row.translated_fqdn = r.translated_fqdn.clone().unwrap_or_default();
            row.translated_port = r.translated_port.clone();
        }
        Rule::Application(r) => {
            row.description = description(&r.description)?;
            let pairs: Vec<String> = r
                .protocols
                .iter()
                .map(|p| schema.join_pair(p.protocol_type.as_str(), &p.port.to_string()))
                .collect();
            row.protocols = schema.join_items(&pairs);
            row.target_fqdns = list(&r.target_fqdns);
            row.target_urls = list(&r.target_urls);
            row.fqdn_tags = list(&r.fqdn_tags);
            row.web_categories = list(&r.web_categories);
            row.terminate_tls = r.terminate_tls.to_string();
            row.source_addresses = list(&r.source_addresses);
            row.source_ip_groups = list(&r.source_ip_groups);
            row.destination_addresses = list(&r.destination_addresses);
            let headers: Vec<String> = r
                .http_headers_to_insert
                .iter()
                .map(|h| schema.join_pair(&h.header, &h.value))
                .collect();
            row.http_headers_to_insert = schema.join_items(&headers);
        }
    }
    Ok(row)
}

/// Empty list items cannot be told apart from absent ones in a cell.
fn check_items(rule: &Rule, entity: &str) -> Result<(), RenderError> {
    let lists: Vec<(&str, &[String])> = match rule {
        Rule::Network(r) => vec![
            ("sourceAddresses", r.source_addresses.as_slice()),
            ("sourceIpGroups", r.source_ip_groups.as_slice()),
            ("destinationAddresses", r.destination_addresses.as_slice()),
            ("destinationIpGroups", r.destination_ip_groups.as_slice()),
            ("destinationFqdns", r.destination_fqdns.as_slice()),
            ("destinationPorts", r.destination_ports.as_slice()),
        ],
        Rule::Nat(r) => vec![
            ("sourceAddresses", r.source_addresses.as_slice()),
            ("sourceIpGroups", r.source_ip_groups.as_slice()),
            ("destinationAddresses", r.destination_addresses.as_slice()),
            ("destinationPorts", r.destination_ports.as_slice()),
        ],
        Rule::Application(r) => vec![
            ("targetFqdns", r.target_fqdns.as_slice()),
            ("targetUrls", r.target_urls.as_slice()),
            ("fqdnTags", r.fqdn_tags.as_slice()),
            ("webCategories", r.web_categories.as_slice()),
            ("sourceAddresses", r.source_addresses.as_slice()),
            ("sourceIpGroups", r.source_ip_groups.as_slice()),
            ("destinationAddresses", r.destination_addresses.as_slice()),
        ],
    };
    match lists
        .into_iter()
        .find(|(_, items)| items.iter().any(String::is_empty))
    {
        Some((field, _)) => Err(RenderError::new(entity, field, "holds an empty item")),
        None => Ok(()),
    }
}

/// Tracks which block is open at one nesting level and which were closed.
#[derive(Default)]
struct Blocks {
    open: Option<(String, usize)>,
    closed: BTreeMap<String, usize>,
}

impl Blocks {
    /// Record `identity` on `row`. Returns `true` when it opens a new block.
    fn enter(&mut self, identity: &str, row: usize, file: &str) -> Result<bool, ParseError> {
        if let Some((open, last)) = &mut self.open {
            if open.as_str() == identity {
                *last = row;
                return Ok(false);
            }
        }
        self.close();
        if let Some(&closed_at) = self.closed.get(identity) {
            return Err(ParseError::NonContiguous {
                file: file.to_string(),
                identity: identity.to_string(),
                row,
                closed_at,
            });
        }
        self.open = Some((identity.to_string(), row));
        Ok(true)
    }

    fn close(&mut self) {
        if let Some((identity, last)) = self.open.take() {
            self.closed.insert(identity, last);
        }
    }
}

/// Rebuild policies from CSV text. Row numbers in errors are 1-based file
/// lines, the header being row 1.
pub fn decode(source: &str, text: &str, schema: &CsvSchema) -> Result<Vec<Policy>, ParseError> {
    let separator = schema
        .separator_byte()
        .ok_or_else(|| ParseError::document(source, "schema", "separator must be a single byte"))?;
    let text = text.trim_start_matches('\u{feff}');
    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(separator)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let decoder = RowDecoder { source, schema };
    let mut policies: Vec<Policy> = Vec::new();
    let mut policy_blocks = Blocks::default();
    let mut group_blocks = Blocks::default();
    let mut collection_blocks = Blocks::default();

    for (index, record) in reader.deserialize::<Row>().enumerate() {
        let n = index + 2;
        let row = record.map_err(|e| ParseError::Csv {
            file: source.to_string(),
            source: e,
        })?;

        let policy_name = row.policy_name.trim();
        if policy_name.is_empty() {
            return Err(ParseError::row(source, n, "PolicyName is empty"));
        }
        if policy_blocks.enter(policy_name, n, source)? {
            group_blocks.close();
            collection_blocks.close();
            policies.push(decoder.policy(&row, n)?);
        }
        let Some(policy) = policies.last_mut() else {
            continue;
        };
        decoder.check_policy(policy, &row, n)?;

        let group_name = row.rule_collection_group.trim();
        if group_name.is_empty() {
            group_blocks.close();
            collection_blocks.close();
            continue;
        }
        let group_identity = format!("{policy_name}/{group_name}");
        let priority = decoder.priority(
            &row.rule_collection_group_priority,
            "RuleCollectionGroupPriority",
            n,
        )?;
        if group_blocks.enter(&group_identity, n, source)? {
            collection_blocks.close();
            policy
                .rule_collection_groups
                .push(RuleCollectionGroup::new(group_name, priority));
        }
        let Some(group) = policy.rule_collection_groups.last_mut() else {
            continue;
        };
        decoder.same(
            &group_identity,
            "RuleCollectionGroupPriority",
            &group.priority.to_string(),
            &priority.to_string(),
            n,
        )?;

        let collection_name = row.rule_collection.trim();
        if collection_name.is_empty() {
            collection_blocks.close();
            continue;
        }
        let collection_identity = format!("{group_identity}/{collection_name}");
        let fresh = decoder.collection(&row, collection_name, n)?;
        if collection_blocks.enter(&collection_identity, n, source)? {
            group.rule_collections.push(fresh.clone());
        }
        let Some(collection) = group.rule_collections.last_mut() else {
            continue;
        };
        let checks = [
            (
                "RuleCollectionPriority",
                collection.priority.to_string(),
                fresh.priority.to_string(),
            ),
            (
                "RuleCollectionType",
                collection.kind.to_string(),
                fresh.kind.to_string(),
            ),
            (
                "RuleCollectionAction",
                collection.action.to_string(),
                fresh.action.to_string(),
            ),
        ];
        for (column, expected, actual) in checks {
            decoder.same(&collection_identity, column, &expected, &actual, n)?;
        }

        if row.rule_type.trim().is_empty() && row.rule_name.trim().is_empty() {
            continue;
        }
        collection.rules.push(decoder.rule(&row, n)?);
    }
    Ok(policies)
}

/// Read every `*.csv` document under `dir` and validate the policies.
pub fn read_dir(dir: &Path, schema: &CsvSchema) -> Result<Vec<Policy>, Error> {
    let mut policies = Vec::new();
    for path in list_files(dir, EXTENSION)? {
        let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
        for policy in decode(&path.display().to_string(), &text, schema)? {
            policy.validate()?;
            policies.push(policy);
        }
    }
    Ok(policies)
}

struct RowDecoder<'a> {
    source: &'a str,
    schema: &'a CsvSchema,
}

impl RowDecoder<'_> {
    fn error(&self, row: usize, message: impl Into<String>) -> ParseError {
        ParseError::row(self.source, row, message)
    }

    fn same(
        &self,
        identity: &str,
        column: &str,
        expected: &str,
        actual: &str,
        row: usize,
    ) -> Result<(), ParseError> {
        if expected != actual {
            return Err(self.error(
                row,
                format!("{column} of {identity} changes from '{expected}' to '{actual}'"),
            ));
        }
        Ok(())
    }

    fn priority(&self, cell: &str, column: &str, row: usize) -> Result<u32, ParseError> {
        cell.trim()
            .parse()
            .map_err(|_| self.error(row, format!("{column} '{}' is not a number", cell.trim())))
    }

    fn parse<T>(&self, cell: &str, row: usize) -> Result<T, ParseError>
    where
        T: std::str::FromStr<Err = String>,
    {
        cell.parse().map_err(|e: String| self.error(row, e))
    }

    /// Free text is kept verbatim.
    fn text(cell: &str) -> Option<String> {
        (!cell.is_empty()).then(|| cell.to_string())
    }

    fn optional(cell: &str) -> Option<String> {
        let cell = cell.trim();
        (!cell.is_empty()).then(|| cell.to_string())
    }

    fn opaque(&self, cell: &str, column: &str, row: usize) -> Result<Option<Value>, ParseError> {
        let cell = cell.trim();
        if cell.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(cell)
            .map(Some)
            .map_err(|e| self.error(row, format!("{column} is not valid JSON: {e}")))
    }

    fn policy(&self, row: &Row, n: usize) -> Result<Policy, ParseError> {
        let sku = row.sku_tier.trim();
        Ok(Policy {
            name: row.policy_name.trim().to_string(),
            version: Self::optional(&row.policy_version),
            location: Self::optional(&row.location),
            sku_tier: if sku.is_empty() {
                None
            } else {
                Some(self.parse::<SkuTier>(sku, n)?)
            },
            base_policy: Self::optional(&row.parent_policy),
            threat_intel_mode: Self::optional(&row.threat_intel_mode),
            threat_intel_whitelist: self.opaque(
                &row.threat_intel_whitelist,
                "ThreatIntelWhitelist",
                n,
            )?,
            dns_settings: self.opaque(&row.dns_settings, "DnsSettings", n)?,
            rule_collection_groups: Vec::new(),
        })
    }

    /// Repeated policy context must match the first row of the policy.
    fn check_policy(&self, policy: &Policy, row: &Row, n: usize) -> Result<(), ParseError> {
        let fresh = self.policy(row, n)?;
        let text = |value: Option<String>| value.unwrap_or_default();
        let json = |value: &Option<Value>| value.as_ref().map(Value::to_string).unwrap_or_default();
        let checks = [
            (
                "PolicyVersion",
                text(policy.version.clone()),
                text(fresh.version),
            ),
            (
                "ParentPolicy",
                text(policy.base_policy.clone()),
                text(fresh.base_policy),
            ),
            (
                "Location",
                text(policy.location.clone()),
                text(fresh.location),
            ),
            (
                "SkuTier",
                text(policy.sku_tier.map(|t| t.to_string())),
                text(fresh.sku_tier.map(|t| t.to_string())),
            ),
            (
                "ThreatIntelMode",
                text(policy.threat_intel_mode.clone()),
                text(fresh.threat_intel_mode),
            ),
            (
                "ThreatIntelWhitelist",
                json(&policy.threat_intel_whitelist),
                json(&fresh.threat_intel_whitelist),
            ),
            (
                "DnsSettings",
                json(&policy.dns_settings),
                json(&fresh.dns_settings),
            ),
        ];
        for (column, expected, actual) in checks {
            self.same(&policy.name, column, &expected, &actual, n)?;
        }
        Ok(())
    }

    fn collection(&self, row: &Row, name: &str, n: usize) -> Result<RuleCollection, ParseError> {
        let kind = self.parse::<RuleCollectionKind>(row.rule_collection_type.trim(), n)?;
        let action = match row.rule_collection_action.trim() {
            "" if kind == RuleCollectionKind::Nat => RuleAction::Dnat,
            action => self.parse::<RuleAction>(action, n)?,
        };
        Ok(RuleCollection::new(
            name,
            self.priority(&row.rule_collection_priority, "RuleCollectionPriority", n)?,
            kind,
            action,
        ))
    }

    fn protocols(&self, cell: &str, n: usize) -> Result<Vec<IpProtocol>, ParseError> {
        self.schema
            .split_list(cell)
            .iter()
            .map(|p| self.parse::<IpProtocol>(p, n))
            .collect()
    }

    fn rule(&self, row: &Row, n: usize) -> Result<Rule, ParseError> {
        let list = |cell: &str| self.schema.split_list(cell);
        let name = row.rule_name.trim().to_string();
        let description = Self::text(&row.description);
        let mut rule = match self.parse::<RuleKind>(row.rule_type.trim(), n)? {
            RuleKind::Network => Rule::Network(NetworkRule {
                name,
                description,
                ip_protocols: self.protocols(&row.ip_protocols, n)?,
                source_addresses: list(&row.source_addresses),
                source_ip_groups: list(&row.source_ip_groups),
                destination_addresses: list(&row.destination_addresses),
                destination_ip_groups: list(&row.destination_ip_groups),
                destination_fqdns: list(&row.destination_fqdns),
                destination_ports: list(&row.destination_ports),
            }),
            RuleKind::Nat => Rule::Nat(NatRule {
                name,
                description,
                ip_protocols: self.protocols(&row.ip_protocols, n)?,
                source_addresses: list(&row.source_addresses),
                source_ip_groups: list(&row.source_ip_groups),
                destination_addresses: list(&row.destination_addresses),
                destination_ports: list(&row.destination_ports),
                translated_address: Self::optional(&row.translated_address),
                translated_fqdn: Self::optional(&row.translated_fqdn),
                translated_port: row.translated_port.trim().to_string(),
            }),
            RuleKind::Application => Rule::Application(ApplicationRule {
                name,
                description,
                protocols: self.application_protocols(&row.protocols, n)?,
                fqdn_tags: list(&row.fqdn_tags),
                web_categories: list(&row.web_categories),
                target_fqdns: list(&row.target_fqdns),
                target_urls: list(&row.target_urls),
                terminate_tls: self.flag(&row.terminate_tls, n)?,
                source_addresses: list(&row.source_addresses),
                source_ip_groups: list(&row.source_ip_groups),
                destination_addresses: list(&row.destination_addresses),
                http_headers_to_insert: self.headers(&row.http_headers_to_insert, n)?,
            }),
        };
        rule.shorten_ip_groups();
        Ok(rule)
    }

    fn application_protocols(
        &self,
        cell: &str,
        n: usize,
    ) -> Result<Vec<ApplicationProtocol>, ParseError> {
        self.schema
            .split_items(cell)
            .into_iter()
            .map(|item| -> Result<ApplicationProtocol, ParseError> {
                let (kind, port) = self.schema.split_pair(item).ok_or_else(|| {
                    self.error(
                        n,
                        format!(
                            "protocol '{}' must be <type>{}<port>",
                            item.trim(),
                            self.schema.subdelimiter
                        ),
                    )
                })?;
                Ok(ApplicationProtocol {
                    protocol_type: self.parse(&kind, n)?,
                    port: port.parse().map_err(|_| {
                        self.error(n, format!("invalid port '{port}' in '{}'", item.trim()))
                    })?,
                })
            })
            .collect()
    }

    fn headers(&self, cell: &str, n: usize) -> Result<Vec<HttpHeader>, ParseError> {
        self.schema
            .split_items(cell)
            .into_iter()
            .map(|item| -> Result<HttpHeader, ParseError> {
                let (header, value) = self.schema.split_pair(item).ok_or_else(|| {
                    self.error(
                        n,
                        format!(
                            "header '{}' must be <name>{}<value>",
                            item.trim(),
                            self.schema.subdelimiter
                        ),
                    )
                })?;
                Ok(HttpHeader { header, value })
            })
            .collect()
    }

    fn flag(&self, cell: &str, n: usize) -> Result<bool, ParseError> {
        match cell.trim().to_ascii_lowercase().as_str() {
            "" | "false" | "no" | "0" => Ok(false),
            "true" | "yes" | "1" => Ok(true),
            other => Err(self.error(n, format!("TerminateTLS '{other}' is not a boolean"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::fixtures::sample_policy;

    const HEADER: &str = "PolicyName;RuleCollectionGroup;RuleCollectionGroupPriority;RuleCollection;RuleCollectionPriority;RuleCollectionType;RuleCollectionAction;RuleType;RuleName;IpProtocols;SourceAddresses;DestinationAddresses;DestinationPorts";

    #[test]
    fn round_trip_is_lossless() {
        let mut policy = sample_policy();
        policy.dns_settings = Some(json!({"enableProxy": true, "servers": ["10.0.0.4", "10.0.0.5"]}));
        policy.base_policy = Some("parent".to_string());
        policy
            .rule_collection_groups
            .push(RuleCollectionGroup::new("RCG_empty", 3000));
        let bare = Policy::new("bare");
        let schema = CsvSchema::default();

        let text = encode(&[policy.clone(), bare.clone()], &schema).expect("encode");
        let decoded = decode("all.csv", &text, &schema).expect("decode");

        assert_eq!(decoded, vec![policy, bare]);
    }

    #[test]
    fn header_and_compound_cells_use_schema_separators() {
        let text = encode_policy(&sample_policy(), &CsvSchema::default()).expect("encode");
        let mut lines = text.lines();

        let header = lines.next().expect("header");
        assert!(header.starts_with("PolicyName;PolicyVersion;ParentPolicy;"));
        assert!(header.ends_with(";TerminateTLS;HttpHeadersToInsert"));
        assert!(text.contains("Https$443"));
        assert!(text.contains("X-Env$test"));
        assert_eq!(text.lines().count(), 4);
    }

    #[test]
    fn interrupted_collection_is_non_contiguous() {
        let text = [
            HEADER,
            "net01;RCG_net_01;1000;RC_net_1;1000;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet1;TCP;10.2.2.2;11.2.3.4;80",
            "net01;RCG_net_01;1000;RC_net_2;1100;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet2;TCP;10.2.2.2;11.2.3.4;443",
            "net01;RCG_net_01;1000;RC_net_1;1000;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet3;UDP;10.2.2.2;11.2.3.4;53",
        ]
        .join("\n");

        let err = decode("net01.csv", &text, &CsvSchema::default()).expect_err("non-contiguous");

        match err {
            ParseError::NonContiguous {
                identity,
                row,
                closed_at,
                ..
            } => {
                assert_eq!(identity, "net01/RCG_net_01/RC_net_1");
                assert_eq!(row, 4);
                assert_eq!(closed_at, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn conflicting_repeated_context_is_rejected() {
        let text = [
            HEADER,
            "net01;RCG_net_01;1000;RC_net_1;1000;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet1;TCP;10.2.2.2;11.2.3.4;80",
            "net01;RCG_net_01;1000;RC_net_1;1200;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet2;TCP;10.2.2.2;11.2.3.4;443",
        ]
        .join("\n");

        let err = decode("net01.csv", &text, &CsvSchema::default()).expect_err("conflict");

        assert_eq!(
            err.to_string(),
            "net01.csv: row 3: RuleCollectionPriority of net01/RCG_net_01/RC_net_1 changes from '1000' to '1200'"
        );
    }

    #[test]
    fn missing_columns_default_to_empty() {
        let text = [
            HEADER,
            "net01;RCG_net_01;1000;RC_net_1;1000;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet1;TCP,UDP;10.2.2.2;11.2.3.4,11.2.3.5;80",
        ]
        .join("\n");

        let policies = decode("net01.csv", &text, &CsvSchema::default()).expect("decode");

        let Rule::Network(rule) = &policies[0].rule_collection_groups[0].rule_collections[0].rules[0]
        else {
            panic!("expected network rule");
        };
        assert_eq!(rule.ip_protocols, vec![IpProtocol::Tcp, IpProtocol::Udp]);
        assert_eq!(rule.destination_addresses, vec!["11.2.3.4", "11.2.3.5"]);
        assert!(rule.description.is_none());
    }

    #[test]
    fn bad_protocol_pair_reports_row() {
        let text = "PolicyName;RuleCollectionGroup;RuleCollectionGroupPriority;RuleCollection;RuleCollectionPriority;RuleCollectionType;RuleCollectionAction;RuleType;RuleName;Protocols\n\
                    p;g;100;rc;100;FirewallPolicyFilterRuleCollection;Allow;ApplicationRule;a;Https443";

        let err = decode("p.csv", text, &CsvSchema::default()).expect_err("bad pair");
        assert!(err.to_string().starts_with("p.csv: row 2: protocol 'Https443'"), "{err}");
    }

    #[test]
    fn custom_schema_round_trips() {
        let schema = CsvSchema {
            separator: ',',
            delimiter: '|',
            subdelimiter: ':',
        };
        schema.validate().expect("valid schema");
        let policy = sample_policy();

        let text = encode_policy(&policy, &schema).expect("encode");

        assert!(text.contains("Https:443"));
        assert_eq!(decode("p.csv", &text, &schema).expect("decode"), vec![policy]);
    }

    #[test]
    fn schema_rejects_clashing_separators() {
        let schema = CsvSchema {
            delimiter: ';',
            ..CsvSchema::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn separators_and_padding_inside_values_survive() {
        let mut policy = sample_policy();
        let Rule::Application(rule) =
            &mut policy.rule_collection_groups[0].rule_collections[2].rules[0]
        else {
            panic!("expected application rule");
        };
        rule.description = Some(" padded ".to_string());
        rule.target_urls = vec![
            "www.example.com/a,b".to_string(),
            "www.example.com/c$d".to_string(),
        ];
        rule.http_headers_to_insert.push(HttpHeader {
            header: "X-List".to_string(),
            value: "a,b$c\\ ".to_string(),
        });
        let schema = CsvSchema::default();

        let text = encode_policy(&policy, &schema).expect("encode");

        assert!(text.contains(r"www.example.com/a\,b,www.example.com/c\$d"), "{text}");
        assert!(text.contains(";X-Env$test,X-List$a\\,b\\$c\\\\\\ "), "{text}");
        assert_eq!(decode("p.csv", &text, &schema).expect("decode"), vec![policy]);
    }

    #[test]
    fn values_that_would_read_back_differently_are_rejected() {
        let mut policy = sample_policy();
        let Rule::Network(rule) = &mut policy.rule_collection_groups[0].rule_collections[0].rules[0]
        else {
            panic!("expected network rule");
        };
        rule.source_addresses.push(String::new());

        let err = encode_policy(&policy, &CsvSchema::default()).expect_err("empty item");
        assert_eq!(err.entity, "net01/RCG_net_01/RC_net_1/Rnet1");
        assert_eq!(err.field, "sourceAddresses");

        let mut policy = sample_policy();
        let Rule::Network(rule) = &mut policy.rule_collection_groups[0].rule_collections[0].rules[0]
        else {
            panic!("expected network rule");
        };
        rule.description = Some(String::new());

        let err = encode_policy(&policy, &CsvSchema::default()).expect_err("empty description");
        assert_eq!(err.field, "description");
    }

    #[test]
    fn ip_group_resource_ids_decode_to_names() {
        let text = "PolicyName;RuleCollectionGroup;RuleCollectionGroupPriority;RuleCollection;RuleCollectionPriority;RuleCollectionType;RuleCollectionAction;RuleType;RuleName;IpProtocols;SourceIpGroups;DestinationAddresses;DestinationPorts\n\
                    net01;RCG_net_01;1000;RC_net_1;1000;FirewallPolicyFilterRuleCollection;Allow;NetworkRule;Rnet1;TCP;/subscriptions/s/resourceGroups/rg/providers/Microsoft.Network/ipGroups/ipg-web,ipg-db;11.2.3.4;80";

        let policies = decode("net01.csv", text, &CsvSchema::default()).expect("decode");

        let rule = &policies[0].rule_collection_groups[0].rule_collections[0].rules[0];
        assert_eq!(rule.ip_groups(), vec!["ipg-web", "ipg-db"]);
    }

    #[test]
    fn colliding_file_names_are_rejected() {
        let policies = [Policy::new("fw a"), Policy::new("fw-a")];

        let err = render_dir(&policies, &CsvSchema::default()).expect_err("collision");

        assert_eq!(
            err.to_string(),
            "cannot render fw-a: file name 'fw_a.csv' is also the file name of policy 'fw a'"
        );
    }
}
