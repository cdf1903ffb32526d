use std::{fmt, str::FromStr};

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

use crate::CodecError;

/// Which chain the upstream daemon is tracking.
///
/// Selects which branch of the rules' initial state is requested and which
/// per-chain data directory is used.
#[derive(
    Copy,
    Clone,
    Debug,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Main,
    Test,
    Regtest,
}

impl Chain {
    /// The lowercase name, also used as the per-chain directory name.
    pub fn name(&self) -> &'static str {
        match self {
            Chain::Main => "main",
            Chain::Test => "test",
            Chain::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Chain {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "main" => Ok(Chain::Main),
            "test" => Ok(Chain::Test),
            "regtest" => Ok(Chain::Regtest),
            other => Err(CodecError::UnknownChain(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_names() {
        for chain in [Chain::Main, Chain::Test, Chain::Regtest] {
            assert_eq!(chain.name().parse::<Chain>().unwrap(), chain);
        }
    }

    #[test]
    fn test_unknown_name() {
        assert!(matches!(
            "mainnet".parse::<Chain>(),
            Err(CodecError::UnknownChain(_))
        ));
    }
}
