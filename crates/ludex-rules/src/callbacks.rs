//! Callback-record façade over [`GameRules`].
//!
//! Some applications prefer supplying plain function values instead of
//! implementing the trait; this adapter wraps such a record into the same
//! capability.  One concept, two constructors.

use std::sync::Arc;

use ludex_primitives::{Block, Chain, GameStateData, UndoData};

use crate::{GameRules, InitialStateSpec, RulesError};

type InitialFn =
    dyn Fn(Chain) -> Result<InitialStateSpec, RulesError> + Send + Sync;
type ForwardFn = dyn Fn(&GameStateData, &Block) -> Result<(GameStateData, UndoData), RulesError>
    + Send
    + Sync;
type BackwardFn = dyn Fn(&GameStateData, &Block, &UndoData) -> Result<GameStateData, RulesError>
    + Send
    + Sync;
type ViewFn = dyn Fn(&GameStateData) -> Result<serde_json::Value, RulesError> + Send + Sync;

/// Record of rule callbacks.  `state_to_view` is optional; when absent the
/// trait default is used.
pub struct RuleCallbacks {
    pub initial_state: Arc<InitialFn>,
    pub process_forward: Arc<ForwardFn>,
    pub process_backward: Arc<BackwardFn>,
    pub state_to_view: Option<Arc<ViewFn>>,
}

impl std::fmt::Debug for RuleCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCallbacks")
            .field("state_to_view", &self.state_to_view.is_some())
            .finish()
    }
}

/// [`GameRules`] implementation backed by a [`RuleCallbacks`] record.
#[derive(Debug)]
pub struct CallbackRules {
    callbacks: RuleCallbacks,
}

impl CallbackRules {
    pub fn new(callbacks: RuleCallbacks) -> Self {
        Self { callbacks }
    }
}

impl GameRules for CallbackRules {
    fn initial_state(&self, chain: Chain) -> Result<InitialStateSpec, RulesError> {
        (self.callbacks.initial_state)(chain)
    }

    fn process_forward(
        &self,
        old: &GameStateData,
        block: &Block,
    ) -> Result<(GameStateData, UndoData), RulesError> {
        (self.callbacks.process_forward)(old, block)
    }

    fn process_backward(
        &self,
        old: &GameStateData,
        block: &Block,
        undo: &UndoData,
    ) -> Result<GameStateData, RulesError> {
        (self.callbacks.process_backward)(old, block, undo)
    }

    fn state_to_view(&self, state: &GameStateData) -> Result<serde_json::Value, RulesError> {
        match &self.callbacks.state_to_view {
            Some(f) => f(state),
            None => match serde_json::from_slice(state.as_bytes()) {
                Ok(v) => Ok(v),
                Err(_) => Ok(serde_json::Value::String(
                    String::from_utf8_lossy(state.as_bytes()).into_owned(),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use ludex_primitives::{BlockHash, BlockRef};

    use super::*;

    fn sample_rules() -> CallbackRules {
        CallbackRules::new(RuleCallbacks {
            initial_state: Arc::new(|_chain| {
                Ok(InitialStateSpec::new(
                    GameStateData::from("genesis"),
                    10,
                    BlockHash::zero(),
                ))
            }),
            process_forward: Arc::new(|old, block| {
                let undo = UndoData::from(old.as_bytes());
                let new = GameStateData::from(block.hash().to_hex().as_str());
                Ok((new, undo))
            }),
            process_backward: Arc::new(|_old, _block, undo| {
                Ok(GameStateData::from(undo.as_bytes()))
            }),
            state_to_view: None,
        })
    }

    #[test]
    fn test_forward_backward_roundtrip() {
        let rules = sample_rules();
        let initial = rules.initial_state(Chain::Regtest).unwrap();
        let block = Block::new(
            BlockRef::new(11, BlockHash::new([1; 32]), BlockHash::zero()),
            vec![],
        );

        let (state, undo) = rules.process_forward(&initial.state, &block).unwrap();
        let restored = rules.process_backward(&state, &block, &undo).unwrap();
        assert_eq!(restored, initial.state);
    }

    #[test]
    fn test_default_view_falls_back_to_string() {
        let rules = sample_rules();
        let view = rules
            .state_to_view(&GameStateData::from("not json"))
            .unwrap();
        assert_eq!(view, serde_json::Value::String("not json".into()));
    }
}
