//! The rule capability supplied by the application.
//!
//! Rules are pure state-transition functions over opaque state blobs; the
//! engine invokes them inside its block transactions and treats any error
//! as a precondition to roll the transaction back untouched.

mod callbacks;
mod errors;

use ludex_primitives::{Block, BlockHash, Chain, GameStateData, UndoData};

pub use callbacks::{CallbackRules, RuleCallbacks};
pub use errors::RulesError;

/// The rules' declared starting point and state for some chain.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InitialStateSpec {
    /// The initial game state.
    pub state: GameStateData,

    /// Height of the block the initial state is defined at.
    pub height: u32,

    /// Hash of that block.
    pub hash: BlockHash,
}

impl InitialStateSpec {
    pub fn new(state: GameStateData, height: u32, hash: BlockHash) -> Self {
        Self {
            state,
            height,
            hash,
        }
    }
}

/// Game rules as a capability record with four operations.
///
/// `process_forward` and `process_backward` must be exact inverses: for
/// every valid `(s, b)`,
/// `process_backward(process_forward(s, b).0, b, process_forward(s, b).1)`
/// yields `s` again.
pub trait GameRules: Send + Sync + 'static {
    /// Deterministic initial state per chain.
    fn initial_state(&self, chain: Chain) -> Result<InitialStateSpec, RulesError>;

    /// Applies one block on top of `old`, returning the new state and the
    /// undo blob that reverses it.
    fn process_forward(
        &self,
        old: &GameStateData,
        block: &Block,
    ) -> Result<(GameStateData, UndoData), RulesError>;

    /// Reverses the application of `block` using the undo blob produced by
    /// the matching forward step.
    fn process_backward(
        &self,
        old: &GameStateData,
        block: &Block,
        undo: &UndoData,
    ) -> Result<GameStateData, RulesError>;

    /// Projects a state into the JSON view served to queries.
    ///
    /// The default treats the state bytes as UTF-8 JSON, falling back to a
    /// JSON string of the raw bytes' UTF-8 when they are not.
    fn state_to_view(&self, state: &GameStateData) -> Result<serde_json::Value, RulesError> {
        match serde_json::from_slice(state.as_bytes()) {
            Ok(v) => Ok(v),
            Err(_) => Ok(serde_json::Value::String(
                String::from_utf8_lossy(state.as_bytes()).into_owned(),
            )),
        }
    }
}

impl<R: GameRules + ?Sized> GameRules for std::sync::Arc<R> {
    fn initial_state(&self, chain: Chain) -> Result<InitialStateSpec, RulesError> {
        (**self).initial_state(chain)
    }

    fn process_forward(
        &self,
        old: &GameStateData,
        block: &Block,
    ) -> Result<(GameStateData, UndoData), RulesError> {
        (**self).process_forward(old, block)
    }

    fn process_backward(
        &self,
        old: &GameStateData,
        block: &Block,
        undo: &UndoData,
    ) -> Result<GameStateData, RulesError> {
        (**self).process_backward(old, block, undo)
    }

    fn state_to_view(&self, state: &GameStateData) -> Result<serde_json::Value, RulesError> {
        (**self).state_to_view(state)
    }
}
