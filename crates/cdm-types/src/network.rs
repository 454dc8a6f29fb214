//! Chain presets and deployment targets.
//!
//! A [`NetworkTarget`] is everything the pipeline needs to know about where
//! it deploys: the asset-hub endpoint transactions go to, the bulletin/IPFS
//! gateway metadata is served from, and the registry binding (absent until
//! the registry is bootstrapped). The named presets mirror the environments
//! the project ships against; CLI flags override any preset field.

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::ConfigError;

/// Static connection preset for a known chain environment.
#[derive(Debug, Clone, Copy)]
pub struct ChainPreset {
    pub name: &'static str,
    pub assethub_url: &'static str,
    pub bulletin_url: &'static str,
    pub ipfs_gateway_url: &'static str,
    /// Registry deployment on that chain, when one is live.
    pub registry_address: Option<&'static str>,
}

/// Environments with well-known endpoints.
pub const KNOWN_CHAINS: &[ChainPreset] = &[
    ChainPreset {
        name: "polkadot",
        assethub_url: "wss://polkadot-asset-hub-rpc.polkadot.io",
        bulletin_url: "wss://polkadot-bulletin-rpc.polkadot.io",
        ipfs_gateway_url: "https://polkadot-bulletin-rpc.polkadot.io/ipfs",
        registry_address: None,
    },
    ChainPreset {
        name: "paseo",
        assethub_url: "wss://asset-hub-paseo-rpc.n.dwellir.com",
        bulletin_url: "wss://previewnet.substrate.dev/bulletin",
        ipfs_gateway_url: "https://previewnet.substrate.dev/ipfs",
        registry_address: Some("0x21fa63bfac2a77b1a6de8bd9a0c2c172a48bb5e3"),
    },
    ChainPreset {
        name: "preview-net",
        assethub_url: "wss://previewnet.substrate.dev/asset-hub",
        bulletin_url: "wss://previewnet.substrate.dev/bulletin",
        ipfs_gateway_url: "https://previewnet.substrate.dev/ipfs",
        registry_address: Some("0x2c6fc00458f198f46ef072e1516b83cd56db7cf5"),
    },
    ChainPreset {
        name: "local",
        assethub_url: "ws://127.0.0.1:10020",
        bulletin_url: "ws://127.0.0.1:10030",
        ipfs_gateway_url: "http://127.0.0.1:8283/ipfs",
        registry_address: None,
    },
];

/// Look up a preset by name.
pub fn chain_preset(name: &str) -> Result<&'static ChainPreset, ConfigError> {
    KNOWN_CHAINS
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ConfigError::UnknownChain {
            name: name.to_string(),
            valid: KNOWN_CHAINS
                .iter()
                .map(|p| p.name)
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// A concrete deployment target resolved from presets and overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkTarget {
    pub assethub_url: String,
    pub ipfs_gateway_url: String,
    /// Registry contract on this target. `None` until bootstrapped.
    pub registry_address: Option<Address>,
}

impl NetworkTarget {
    pub fn from_preset(preset: &ChainPreset) -> Result<Self, ConfigError> {
        let registry_address = match preset.registry_address {
            Some(raw) => Some(Address::parse(raw).map_err(|e| ConfigError::InvalidAddress {
                context: format!("chain preset {}", preset.name),
                reason: e.to_string(),
            })?),
            None => None,
        };
        Ok(NetworkTarget {
            assethub_url: preset.assethub_url.to_string(),
            ipfs_gateway_url: preset.ipfs_gateway_url.to_string(),
            registry_address,
        })
    }

    /// Registry address for hashing purposes; the zero sentinel stands in
    /// while no registry is bound.
    pub fn registry_or_zero(&self) -> Address {
        self.registry_address.unwrap_or(Address::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_presets_resolve() {
        for preset in KNOWN_CHAINS {
            assert_eq!(chain_preset(preset.name).unwrap().name, preset.name);
            // every preset with a registry address must carry a parseable one
            NetworkTarget::from_preset(preset).unwrap();
        }
    }

    #[test]
    fn unknown_preset_lists_valid_names() {
        let err = chain_preset("westend").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("westend"));
        assert!(msg.contains("local"));
        assert!(msg.contains("preview-net"));
    }

    #[test]
    fn registry_or_zero_defaults_to_sentinel() {
        let target = NetworkTarget::from_preset(chain_preset("local").unwrap()).unwrap();
        assert!(target.registry_or_zero().is_zero());
    }
}
