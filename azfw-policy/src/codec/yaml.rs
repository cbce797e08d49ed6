//! YAML codec: one document per policy, mirroring the model field for field.

use std::fs;
use std::path::Path;

use super::{list_files, unique_file_names};
use crate::error::{Error, ParseError, RenderError};
use crate::model::Policy;
use crate::names::file_stem;

pub const EXTENSION: &str = "yaml";

pub fn encode_policy(policy: &Policy) -> Result<String, RenderError> {
    serde_yaml::to_string(policy).map_err(|e| RenderError::new(&policy.name, "policy", e.to_string()))
}

/// Parse and validate one policy document.
pub fn decode_policy(source: &str, text: &str) -> Result<Policy, Error> {
    let text = text.trim_start_matches('\u{feff}');
    let mut policy: Policy = serde_yaml::from_str(text).map_err(|e| ParseError::Yaml {
        file: source.to_string(),
        source: e,
    })?;
    policy.shorten_ip_groups();
    policy.validate()?;
    Ok(policy)
}

/// File name of a policy's YAML document.
pub fn file_name(policy: &Policy) -> String {
    format!("{}.{EXTENSION}", file_stem(&policy.name))
}

/// Render every policy as `(file name, contents)`. Nothing is written.
pub fn render_dir(policies: &[Policy]) -> Result<Vec<(String, String)>, RenderError> {
    unique_file_names(policies, file_name)?
        .into_iter()
        .zip(policies)
        .map(|(name, policy)| Ok((name, encode_policy(policy)?)))
        .collect()
}

/// Read every `*.yaml` document under `dir`, ordered by file name. A missing
/// directory reads as empty.
pub fn read_dir(dir: &Path) -> Result<Vec<Policy>, Error> {
    list_files(dir, EXTENSION)?
        .into_iter()
        .map(|path| {
            let text = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
            decode_policy(&path.display().to_string(), &text)
        })
        .collect()
}
