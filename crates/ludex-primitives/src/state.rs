use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};

/// Opaque game state owned by the rules author.
///
/// The engine stores and compares it as bytes; interpretation is entirely
/// up to the rules.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub struct GameStateData(Vec<u8>);

impl GameStateData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for GameStateData {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for GameStateData {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

impl From<&str> for GameStateData {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

/// Opaque undo blob produced by a forward transition.
///
/// Paired with the same block data it suffices to reconstruct the prior
/// state; it is consumed exactly once by the matching backward transition.
#[derive(
    Clone, Debug, Default, Eq, PartialEq, Hash, BorshSerialize, BorshDeserialize, Serialize,
    Deserialize,
)]
pub struct UndoData(Vec<u8>);

impl UndoData {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for UndoData {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for UndoData {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}
