//! Step key chain

use crate::action::ActionRef;
use sha2::{Digest, Sha256};

/// Running hash over a base identity and the steps applied to it
#[derive(Debug, Clone)]
pub struct KeyChain {
    previous: String,
}

impl KeyChain {
    /// Seed the chain with `sha256(base)`
    pub fn new(base: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(base.as_bytes());
        Self {
            previous: hex::encode(hasher.finalize()),
        }
    }

    /// Last key of the chain (the seed before any step)
    pub fn current(&self) -> &str {
        &self.previous
    }

    /// Extend the chain with one step's cache key
    pub fn advance(&mut self, step_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.previous.as_bytes());
        hasher.update(step_key.as_bytes());
        self.previous = hex::encode(hasher.finalize());
        self.previous.clone()
    }

    /// Chain keys of every step built on `base`
    pub fn keys(base: &str, steps: &[ActionRef]) -> Vec<String> {
        let mut chain = Self::new(base);
        steps
            .iter()
            .map(|step| chain.advance(&step.cache_key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Mkdir, Run};
    use std::sync::Arc;

    fn steps() -> Vec<ActionRef> {
        vec![
            Arc::new(Run::new("apk add curl")) as ActionRef,
            Arc::new(Mkdir::new(vec!["/app".into()])),
        ]
    }

    #[test]
    fn keys_are_deterministic() {
        assert_eq!(KeyChain::keys("alpine", &steps()), KeyChain::keys("alpine", &steps()));
    }

    #[test]
    fn keys_depend_on_base_and_position() {
        let alpine = KeyChain::keys("alpine", &steps());
        let debian = KeyChain::keys("debian", &steps());
        assert_ne!(alpine[0], debian[0]);
        assert_ne!(alpine[0], alpine[1]);
        assert_eq!(alpine[0].len(), 64);
    }

    #[test]
    fn advance_hashes_previous_key() {
        let mut chain = KeyChain::new("alpine");
        let seed = chain.current().to_string();
        let first = chain.advance("Run(\"x\")");
        assert_ne!(seed, first);
        assert_eq!(chain.current(), first);

        let mut again = KeyChain::new("alpine");
        assert_eq!(again.advance("Run(\"x\")"), first);
    }
}
