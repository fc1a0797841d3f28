use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Where operational events (lost DNS ownership) are announced
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    pub webhook_url: SmolStr,
}
