use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChainsError {
    #[error("hub chain id is empty")]
    EmptyHubId,
    #[error("chain id '{0}' is declared more than once")]
    DuplicateChain(String),
}

/// Static chain metadata as read from the chains config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Alternative spellings that normalize to `id`.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Bech32 prefix of the chain's addresses, e.g. `osmo`.
    #[serde(default)]
    pub prefix_address: Option<String>,
    /// Newer identifiers the chain has been renamed to, oldest first.
    #[serde(default)]
    pub overrides: Vec<String>,
    #[serde(default)]
    pub endpoints: ChainEndpoints,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainEndpoints {
    #[serde(default)]
    pub lcd: Option<Url>,
    #[serde(default)]
    pub lcds: Vec<Url>,
}

impl ChainMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Primary LCD endpoint followed by the fallbacks, without duplicates.
    pub fn lcd_endpoints(&self) -> Vec<Url> {
        let mut seen = HashSet::new();
        self.endpoints
            .lcd
            .iter()
            .chain(self.endpoints.lcds.iter())
            .filter(|url| seen.insert(url.as_str().trim_end_matches('/').to_string()))
            .cloned()
            .collect()
    }

    /// The identifier the chain currently goes by.
    pub fn current_id(&self) -> &str {
        self.overrides.last().map(String::as_str).unwrap_or(&self.id)
    }

    fn is_known_as(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainsConfig {
    pub hub: ChainMetadata,
    #[serde(default)]
    pub evm: Vec<ChainMetadata>,
    #[serde(default)]
    pub cosmos: Vec<ChainMetadata>,
}

/// Immutable lookup table over the configured chains. Built once at startup
/// and shared by reference with every component that needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainsTable {
    hub: ChainMetadata,
    evm: Vec<ChainMetadata>,
    cosmos: Vec<ChainMetadata>,
}

impl ChainsTable {
    pub fn new(config: ChainsConfig) -> Result<Self, ChainsError> {
        if config.hub.id.trim().is_empty() {
            return Err(ChainsError::EmptyHubId);
        }
        let mut ids = HashSet::new();
        for chain in std::iter::once(&config.hub)
            .chain(config.evm.iter())
            .chain(config.cosmos.iter())
        {
            if !ids.insert(chain.id.to_lowercase()) {
                return Err(ChainsError::DuplicateChain(chain.id.clone()));
            }
        }

        Ok(Self {
            hub: config.hub,
            evm: config.evm,
            cosmos: config.cosmos,
        })
    }

    pub fn hub(&self) -> &ChainMetadata {
        &self.hub
    }

    pub fn is_hub(&self, chain: &str) -> bool {
        self.hub.is_known_as(chain.trim())
    }

    fn all(&self) -> impl Iterator<Item = &ChainMetadata> {
        std::iter::once(&self.hub)
            .chain(self.evm.iter())
            .chain(self.cosmos.iter())
    }

    /// Canonical lowercase identifier for a free-form chain name: trims
    /// whitespace and quotes, folds case and resolves aliases. Unknown
    /// names are returned cleaned but otherwise untouched.
    pub fn normalize_chain(&self, chain: &str) -> Option<String> {
        let cleaned = chain.trim().trim_matches('"').trim().to_lowercase();
        if cleaned.is_empty() {
            return None;
        }
        let canonical = self
            .all()
            .find(|c| c.is_known_as(&cleaned))
            .map(|c| c.id.to_lowercase())
            .unwrap_or(cleaned);
        Some(canonical)
    }

    /// Like [`Self::normalize_chain`], but maps a renamed chain identifier
    /// back to the id the chain was originally registered under.
    pub fn normalize_original_chain(&self, chain: &str) -> Option<String> {
        let normalized = self.normalize_chain(chain)?;
        let original = self
            .all()
            .find(|c| c.overrides.iter().any(|o| o.eq_ignore_ascii_case(&normalized)))
            .map(|c| c.id.to_lowercase())
            .unwrap_or(normalized);
        Some(original)
    }

    /// Non-hub Cosmos chain by id, alias or override id.
    pub fn cosmos_chain(&self, chain: &str) -> Option<&ChainMetadata> {
        let chain = chain.trim();
        self.cosmos.iter().filter(|c| !self.is_hub(&c.id)).find(|c| {
            c.is_known_as(chain) || c.overrides.iter().any(|o| o.eq_ignore_ascii_case(chain))
        })
    }

    /// Non-hub Cosmos chain whose address prefix starts `address`.
    pub fn cosmos_chain_by_address(&self, address: &str) -> Option<&ChainMetadata> {
        self.cosmos.iter().filter(|c| !self.is_hub(&c.id)).find(|c| {
            c.prefix_address
                .as_deref()
                .is_some_and(|prefix| !prefix.is_empty() && address.starts_with(prefix))
        })
    }

    /// EVM chain whose id prefixes a poll id such as `ethereum_0xabc_12`.
    pub fn evm_chain_prefixing(&self, poll_id: &str) -> Option<&ChainMetadata> {
        let poll_id = poll_id.to_lowercase();
        self.evm
            .iter()
            .find(|c| poll_id.starts_with(&format!("{}_", c.id.to_lowercase())))
    }
}
