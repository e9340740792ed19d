use anyhow::{Context, Result};
use hub_transfers_logic::{ChainsConfig, ChainsTable};
use std::path::Path;

/// Load the chain metadata file and build the immutable chains table.
pub fn load_chains_from_file<P: AsRef<Path>>(path: P) -> Result<ChainsTable> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read chains config file: {:?}", path.as_ref()))?;

    let config: ChainsConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse chains config JSON: {:?}", path.as_ref()))?;

    ChainsTable::new(config)
        .with_context(|| format!("Invalid chains config: {:?}", path.as_ref()))
}
