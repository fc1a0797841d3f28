use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Configuration {
    /// Cadence of the sweep over not-yet-verified hostnames, in seconds
    #[serde(default = "default_new_sweep_interval_secs")]
    pub new_sweep_interval_secs: u64,

    /// Cadence of the re-verification sweep over trusted hostnames, in seconds
    #[serde(default = "default_existing_sweep_interval_secs")]
    pub existing_sweep_interval_secs: u64,
}

fn default_new_sweep_interval_secs() -> u64 {
    5 * 60
}

fn default_existing_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            new_sweep_interval_secs: default_new_sweep_interval_secs(),
            existing_sweep_interval_secs: default_existing_sweep_interval_secs(),
        }
    }
}
