//! Chat game over an opaque JSON state blob.
//!
//! The state is a JSON object mapping user to message; moves are arrays
//! of strings applied in order, so the last entry prevails.  The undo
//! blob is simply the prior state, which trivially satisfies the
//! round-trip law.

use std::sync::atomic::{AtomicBool, Ordering};

use ludex_primitives::{Block, Chain, GameStateData, UndoData};
use ludex_rules::{GameRules, InitialStateSpec, RulesError};

use crate::test_hash;

/// Height the chat game's initial state is declared at.
pub const CHAT_GENESIS_HEIGHT: u32 = 10;

/// Blob-state chat rules with a switchable failure mode.
#[derive(Debug, Default)]
pub struct ChatRules {
    should_fail: AtomicBool,
}

impl ChatRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, forward processing fails, for atomicity tests.
    pub fn set_should_fail(&self, v: bool) {
        self.should_fail.store(v, Ordering::SeqCst);
    }

    fn parse_state(state: &GameStateData) -> Result<serde_json::Map<String, serde_json::Value>, RulesError> {
        let value: serde_json::Value = serde_json::from_slice(state.as_bytes())
            .map_err(|e| RulesError::BadState(e.to_string()))?;
        match value {
            serde_json::Value::Object(map) => Ok(map),
            other => Err(RulesError::BadState(format!(
                "chat state is not an object: {other}"
            ))),
        }
    }
}

impl GameRules for ChatRules {
    fn initial_state(&self, _chain: Chain) -> Result<InitialStateSpec, RulesError> {
        let state = serde_json::json!({"domob": "hello world", "foo": "bar"});
        Ok(InitialStateSpec::new(
            GameStateData::from(state.to_string().as_str()),
            CHAT_GENESIS_HEIGHT,
            test_hash(CHAT_GENESIS_HEIGHT),
        ))
    }

    fn process_forward(
        &self,
        old: &GameStateData,
        block: &Block,
    ) -> Result<(GameStateData, UndoData), RulesError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(RulesError::Rejected("requested failure".into()));
        }

        let mut state = Self::parse_state(old)?;
        for m in &block.moves {
            let entries = m
                .mv
                .as_array()
                .ok_or_else(|| RulesError::Rejected("move is not an array".into()))?;
            for v in entries {
                let msg = v
                    .as_str()
                    .ok_or_else(|| RulesError::Rejected("move entry is not a string".into()))?;
                state.insert(m.name.clone(), serde_json::Value::String(msg.to_owned()));
            }
        }

        let new_state = serde_json::Value::Object(state).to_string();
        let undo = UndoData::from(old.as_bytes());
        Ok((GameStateData::from(new_state.as_str()), undo))
    }

    fn process_backward(
        &self,
        _old: &GameStateData,
        _block: &Block,
        undo: &UndoData,
    ) -> Result<GameStateData, RulesError> {
        Ok(GameStateData::from(undo.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use crate::{block_at, chat_move};

    use super::*;

    #[test]
    fn test_roundtrip() {
        let rules = ChatRules::new();
        let init = rules.initial_state(Chain::Regtest).unwrap();

        let block = block_at(
            11,
            test_hash(CHAT_GENESIS_HEIGHT),
            vec![chat_move("a", &["x", "y"]), chat_move("domob", &["new"])],
        );
        let (state, undo) = rules.process_forward(&init.state, &block).unwrap();

        let view: serde_json::Value = serde_json::from_slice(state.as_bytes()).unwrap();
        assert_eq!(
            view,
            serde_json::json!({"a": "y", "domob": "new", "foo": "bar"})
        );

        let restored = rules.process_backward(&state, &block, &undo).unwrap();
        assert_eq!(restored, init.state);
    }

    #[test]
    fn test_failure_mode() {
        let rules = ChatRules::new();
        let init = rules.initial_state(Chain::Regtest).unwrap();
        let block = block_at(11, test_hash(CHAT_GENESIS_HEIGHT), vec![]);

        rules.set_should_fail(true);
        assert!(rules.process_forward(&init.state, &block).is_err());

        rules.set_should_fail(false);
        assert!(rules.process_forward(&init.state, &block).is_ok());
    }
}
