//! Conversions between the policy model and its four representations.
//!
//! Decoders return [`crate::error::ParseError`] with the source name and the
//! position of the offending element; encoders return
//! [`crate::error::RenderError`] before producing any output.

pub mod arm;
pub mod bicep;
pub mod csv;
pub mod expr;
pub mod yaml;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, RenderError};
use crate::model::Policy;

/// Expands bare IP group names into Azure resource ids at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpGroupResolver {
    pub subscription_id: String,
    pub resource_group: String,
}

impl IpGroupResolver {
    pub fn new(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
        }
    }

    pub fn resource_id(&self, name: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/Microsoft.Network/ipGroups/{}",
            self.subscription_id, self.resource_group, name
        )
    }
}

/// Files under `dir` with extension `ext`, sorted by name. A missing
/// directory has no files.
pub fn list_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>, Error> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::io(dir, e))?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// File name of each policy, in order. Two policies whose names map to the
/// same file would overwrite each other and are rejected.
pub fn unique_file_names<'p>(
    policies: impl IntoIterator<Item = &'p Policy>,
    file_name: impl Fn(&Policy) -> String,
) -> Result<Vec<String>, RenderError> {
    let mut owners: BTreeMap<String, &str> = BTreeMap::new();
    let mut names = Vec::new();
    for policy in policies {
        let name = file_name(policy);
        if let Some(first) = owners.insert(name.clone(), &policy.name) {
            return Err(RenderError::new(
                &policy.name,
                "file name",
                format!("'{name}' is also the file name of policy '{first}'"),
            ));
        }
        names.push(name);
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{unique_file_names, IpGroupResolver};
    use crate::model::Policy;
    use crate::names::ip_group_name;

    #[test]
    fn resolved_ids_reduce_back_to_names() {
        let resolver = IpGroupResolver::new("0000-1111", "rg-ipgroups");
        let id = resolver.resource_id("ipg-web");

        assert_eq!(
            id,
            "/subscriptions/0000-1111/resourceGroups/rg-ipgroups/providers/Microsoft.Network/ipGroups/ipg-web"
        );
        assert_eq!(ip_group_name(&id), "ipg-web");
    }

    #[test]
    fn colliding_file_names_name_both_policies() {
        let policies = [Policy::new("fw a"), Policy::new("fw-b"), Policy::new("fw-a")];

        let err = unique_file_names(&policies, super::yaml::file_name).expect_err("collision");

        assert_eq!(
            err.to_string(),
            "cannot render fw-a: file name 'fw_a.yaml' is also the file name of policy 'fw a'"
        );
    }
}
