//! Named view selectors and their strict verification.

use std::fmt;

use ludex_primitives::BlockHash;

use crate::QueryError;

/// Which game state a query asks for.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ViewSelector {
    /// The rules' initial state; only valid while the checkpoint sits at
    /// the initial block.
    Initial,

    /// The state at a specific block; only valid when that block is the
    /// current checkpoint.
    Block(BlockHash),

    /// Whatever the current checkpoint is.
    Current,
}

impl ViewSelector {
    /// Parses the string form: `"initial"`, `"block <64-hex>"` or
    /// `"current"`.  Anything else is a caller bug.
    pub fn parse(s: &str) -> Result<Self, QueryError> {
        if s == "initial" {
            return Ok(ViewSelector::Initial);
        }
        if s == "current" {
            return Ok(ViewSelector::Current);
        }
        if let Some(hex) = s.strip_prefix("block ") {
            let hash = BlockHash::from_hex(hex)
                .map_err(|_| QueryError::BadSelector(s.to_owned()))?;
            return Ok(ViewSelector::Block(hash));
        }
        Err(QueryError::BadSelector(s.to_owned()))
    }
}

impl fmt::Display for ViewSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViewSelector::Initial => f.write_str("initial"),
            ViewSelector::Block(hash) => write!(f, "block {hash}"),
            ViewSelector::Current => f.write_str("current"),
        }
    }
}

/// Checks a selector against the current checkpoint.  A mismatch is a
/// caller bug, not a transient: the error is returned, never retried.
pub fn verify_selector(
    selector: &ViewSelector,
    current: &BlockHash,
    initial: &BlockHash,
) -> Result<(), QueryError> {
    match selector {
        ViewSelector::Initial => {
            if current != initial {
                return Err(QueryError::PreconditionFailed(format!(
                    "state 'initial' does not match the game's initial block \
                     (current is {current})"
                )));
            }
            Ok(())
        }
        ViewSelector::Block(hash) => {
            if hash != current {
                return Err(QueryError::PreconditionFailed(format!(
                    "state 'block {hash}' does not match claimed current game state {current}"
                )));
            }
            Ok(())
        }
        ViewSelector::Current => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> BlockHash {
        BlockHash::new([n; 32])
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(ViewSelector::parse("initial").unwrap(), ViewSelector::Initial);
        assert_eq!(ViewSelector::parse("current").unwrap(), ViewSelector::Current);

        let h = hash(3);
        let s = format!("block {}", h.to_hex());
        assert_eq!(ViewSelector::parse(&s).unwrap(), ViewSelector::Block(h));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["foo", "block", "block xyz", "Initial", ""] {
            assert!(matches!(
                ViewSelector::parse(bad),
                Err(QueryError::BadSelector(_))
            ));
        }
    }

    #[test]
    fn test_verify_initial_mismatch() {
        let err =
            verify_selector(&ViewSelector::Initial, &hash(2), &hash(1)).unwrap_err();
        let QueryError::PreconditionFailed(msg) = err else {
            panic!("wrong error kind");
        };
        assert!(msg.contains("does not match the game's initial block"));
    }

    #[test]
    fn test_verify_block_mismatch() {
        let err = verify_selector(&ViewSelector::Block(hash(9)), &hash(2), &hash(1))
            .unwrap_err();
        let QueryError::PreconditionFailed(msg) = err else {
            panic!("wrong error kind");
        };
        assert!(msg.contains("does not match claimed current game state"));
    }

    #[test]
    fn test_verify_accepts_matches() {
        verify_selector(&ViewSelector::Initial, &hash(1), &hash(1)).unwrap();
        verify_selector(&ViewSelector::Block(hash(2)), &hash(2), &hash(1)).unwrap();
        verify_selector(&ViewSelector::Current, &hash(7), &hash(1)).unwrap();
    }
}
