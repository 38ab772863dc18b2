use crate::core::error::Result;
use crate::core::parser::{CURRENT_VERSION, ParseOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Engine options applied to every rule construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOptions {
    /// Require exactly one of `global` and `owner_uuid` in payloads
    #[serde(default)]
    pub enforce_global: bool,
    /// Newest rule language version the caller understands
    #[serde(default = "default_max_version")]
    pub max_version: u32,
    /// Reject subnets with host bits set
    #[serde(default)]
    pub enforce_subnet_mask: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            enforce_global: false,
            max_version: CURRENT_VERSION,
            enforce_subnet_mask: false,
        }
    }
}

fn default_max_version() -> u32 {
    CURRENT_VERSION
}

impl RuleOptions {
    /// Subset of the options the parser cares about
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            max_version: self.max_version,
            enforce_subnet_mask: self.enforce_subnet_mask,
        }
    }
}

/// Loads rule options from a JSON file.
///
/// Missing keys take their defaults, so `{}` is a valid options file.
///
/// # Errors
///
/// Returns `Error::Io` if the file can't be read and `Error::Serialization`
/// if it isn't a valid options object.
pub fn load_options(path: &Path) -> Result<RuleOptions> {
    let json = std::fs::read_to_string(path)?;
    let options: RuleOptions = serde_json::from_str(&json)?;
    debug!(path = %path.display(), ?options, "Loaded rule options");
    Ok(options)
}
