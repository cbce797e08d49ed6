//! Environment and tool configuration.
//!
//! Environments live in `_firewalls/<order>.<key>.toml`, each listing one or
//! more `[[firewall]]` tables. The optional `azfw.toml` overrides directory
//! names, CSV separators and export/compare defaults.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::codec::arm::DEFAULT_API_VERSION;
use crate::codec::csv::CsvSchema;
use crate::codec::IpGroupResolver;
use crate::compare::DEFAULT_THRESHOLD;
use crate::error::ConfigError;

pub const TOOL_CONFIG_FILE: &str = "azfw.toml";
pub const DEFAULT_REGION: &str = "westeurope";

/// One firewall an environment deploys policies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Firewall {
    pub firewall_name: String,
    pub subscription_id: String,
    pub ip_groups_subscription_id: String,
    pub ip_groups_resource_group: String,
    pub policies_resource_group: String,
    pub tenant_id: Option<String>,
    pub region_name: String,
}

impl Firewall {
    pub fn ip_group_resolver(&self) -> IpGroupResolver {
        IpGroupResolver::new(&self.ip_groups_subscription_id, &self.ip_groups_resource_group)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFirewall {
    firewall_name: Option<String>,
    subscription_id: Option<String>,
    ip_groups_subscription_id: Option<String>,
    ip_groups_resource_group: Option<String>,
    policies_resource_group: Option<String>,
    tenant_id: Option<String>,
    region_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvironmentFile {
    #[serde(default)]
    firewall: Vec<RawFirewall>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Environment {
    pub order: u32,
    pub key: String,
    pub path: PathBuf,
    pub firewalls: Vec<Firewall>,
}

impl Environment {
    pub fn firewall(&self, name: &str) -> Option<&Firewall> {
        self.firewalls
            .iter()
            .find(|f| f.firewall_name.eq_ignore_ascii_case(name))
    }
}

/// All configured environments, sorted by order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environments {
    list: Vec<Environment>,
}

impl Environments {
    /// Load every `<order>.<key>.toml` file in `dir`.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let entries = fs::read_dir(dir).map_err(|source| ConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut list = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| ConfigError::Io {
                path: dir.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            list.push(load_environment(&path)?);
        }
        list.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
        let mut seen = BTreeSet::new();
        if let Some(dup) = list.iter().find(|e| !seen.insert(e.key.as_str())) {
            return Err(ConfigError::Invalid {
                path: dup.path.display().to_string(),
                message: format!("environment key '{}' is defined twice", dup.key),
            });
        }
        Ok(Self { list })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Environment> {
        self.list.iter()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Select by key, 1-based position, or the name of one of its firewalls.
    pub fn select(&self, selector: &str) -> Result<&Environment, ConfigError> {
        let selector = selector.trim();
        if let Some(env) = self.list.iter().find(|e| e.key.eq_ignore_ascii_case(selector)) {
            return Ok(env);
        }
        if let Ok(index) = selector.parse::<usize>() {
            if let Some(env) = index.checked_sub(1).and_then(|i| self.list.get(i)) {
                return Ok(env);
            }
        }
        self.list
            .iter()
            .find(|e| e.firewall(selector).is_some())
            .ok_or_else(|| ConfigError::UnknownEnvironment(selector.to_string()))
    }
}

fn load_environment(path: &Path) -> Result<Environment, ConfigError> {
    let display = path.display().to_string();
    let (order, key) = parse_file_name(path).ok_or_else(|| ConfigError::Invalid {
        path: display.clone(),
        message: "environment files must be named <order>.<key>.toml".to_string(),
    })?;
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: display.clone(),
        source,
    })?;
    let file: EnvironmentFile = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: display.clone(),
        source,
    })?;
    if file.firewall.is_empty() {
        return Err(ConfigError::Invalid {
            path: display,
            message: "no [[firewall]] tables".to_string(),
        });
    }
    let firewalls = file
        .firewall
        .into_iter()
        .enumerate()
        .map(|(index, raw)| firewall_from_raw(raw, &display, index + 1))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Environment {
        order,
        key,
        path: path.to_path_buf(),
        firewalls,
    })
}

fn parse_file_name(path: &Path) -> Option<(u32, String)> {
    let stem = path.file_stem()?.to_str()?;
    let (order, key) = stem.split_once('.')?;
    let order = order.parse().ok()?;
    (!key.is_empty()).then(|| (order, key.to_string()))
}

fn firewall_from_raw(raw: RawFirewall, path: &str, index: usize) -> Result<Firewall, ConfigError> {
    let required = |value: Option<String>, field: &'static str| {
        value
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                path: path.to_string(),
                index,
                field,
            })
    };
    let subscription_id = required(raw.subscription_id, "subscriptionId")?;
    Ok(Firewall {
        firewall_name: required(raw.firewall_name, "firewallName")?,
        ip_groups_subscription_id: raw
            .ip_groups_subscription_id
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| subscription_id.clone()),
        subscription_id,
        ip_groups_resource_group: required(raw.ip_groups_resource_group, "ipGroupsResourceGroup")?,
        policies_resource_group: required(raw.policies_resource_group, "policiesResourceGroup")?,
        tenant_id: raw.tenant_id.filter(|v| !v.trim().is_empty()),
        region_name: raw
            .region_name
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string()),
    })
}

/// Directory names relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub arm_import: PathBuf,
    pub arm_export: PathBuf,
    pub policies: PathBuf,
    pub csv: PathBuf,
    pub bicep: PathBuf,
    pub firewalls: PathBuf,
    pub comparison: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            arm_import: "arm_import".into(),
            arm_export: "arm_export".into(),
            policies: "_policies".into(),
            csv: "_csv".into(),
            bicep: "bicep".into(),
            firewalls: "_firewalls".into(),
            comparison: "comparison".into(),
        }
    }
}

impl PathsConfig {
    /// Resolve every directory against `base`. Absolute entries are kept.
    pub fn resolve(&self, base: &Path) -> PathsConfig {
        PathsConfig {
            arm_import: base.join(&self.arm_import),
            arm_export: base.join(&self.arm_export),
            policies: base.join(&self.policies),
            csv: base.join(&self.csv),
            bicep: base.join(&self.bicep),
            firewalls: base.join(&self.firewalls),
            comparison: base.join(&self.comparison),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub api_version: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            api_version: DEFAULT_API_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompareConfig {
    pub threshold: f64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Contents of `azfw.toml`. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub paths: PathsConfig,
    pub csv: CsvSchema,
    pub export: ExportConfig,
    pub compare: CompareConfig,
}

impl ToolConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&raw, &path.display().to_string())
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(raw: &str, path: &str) -> Result<Self, ConfigError> {
        let config: ToolConfig = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        config.validate(path)?;
        Ok(config)
    }

    fn validate(&self, path: &str) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::Invalid {
            path: path.to_string(),
            message,
        };
        self.csv.validate().map_err(|m| invalid(format!("[csv] {m}")))?;
        if !(0.0..=1.0).contains(&self.compare.threshold) {
            return Err(invalid(format!(
                "[compare] threshold {} is outside 0..=1",
                self.compare.threshold
            )));
        }
        if self.export.api_version.trim().is_empty() {
            return Err(invalid("[export] api_version is empty".to_string()));
        }
        Ok(())
    }
}
