use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of chains the platform accepts deposits on, plus `Fiat`
/// for virtual-account credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Solana,
    Aptos,
    Starknet,
    Fiat,
}

/// The RPC shape a chain's validator must speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFamily {
    Evm,
    Solana,
    Aptos,
    Starknet,
    Fiat,
}

impl Chain {
    pub fn family(&self) -> ChainFamily {
        match self {
            Chain::Ethereum | Chain::Polygon | Chain::Arbitrum | Chain::Optimism | Chain::Base => {
                ChainFamily::Evm
            }
            Chain::Solana => ChainFamily::Solana,
            Chain::Aptos => ChainFamily::Aptos,
            Chain::Starknet => ChainFamily::Starknet,
            Chain::Fiat => ChainFamily::Fiat,
        }
    }

    pub fn is_fiat(&self) -> bool {
        matches!(self, Chain::Fiat)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
            Chain::Arbitrum => "arbitrum",
            Chain::Optimism => "optimism",
            Chain::Base => "base",
            Chain::Solana => "solana",
            Chain::Aptos => "aptos",
            Chain::Starknet => "starknet",
            Chain::Fiat => "fiat",
        }
    }

    pub fn from_str_opt(s: &str) -> Option<Chain> {
        Some(match s {
            "ethereum" => Chain::Ethereum,
            "polygon" => Chain::Polygon,
            "arbitrum" => Chain::Arbitrum,
            "optimism" => Chain::Optimism,
            "base" => Chain::Base,
            "solana" => Chain::Solana,
            "aptos" => Chain::Aptos,
            "starknet" => Chain::Starknet,
            "fiat" => Chain::Fiat,
            _ => return None,
        })
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
