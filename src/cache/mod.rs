//! Content-addressed layer cache
//!
//! Every step of a container build is keyed by a hash chain seeded from the
//! base image:
//!
//! ```text
//! seed   = sha256(base)
//! key[0] = sha256(seed ++ step[0])
//! key[i] = sha256(key[i-1] ++ step[i])
//! ```
//!
//! The layer committed after step `i` is stored as `repo:layer-<key[i]>`.
//! On the next run the longest prefix of steps whose layers still exist is
//! skipped and the build resumes from the last of them.
//!
//! # Layer States
//!
//! | State | Meaning |
//! |-------|---------|
//! | Retained | Reachable from the current step chain, reused |
//! | Stale | Built on a prefix that changed, removed before the build |

mod committer;
mod key;

pub use committer::LayerCommitter;
pub use key::KeyChain;

use crate::action::ActionRef;
use crate::backend::Backend;
use crate::error::{StrataError, StrataResult};
use crate::image::ImageRef;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of comparing a step chain against the committed layers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CachePlan {
    /// Chain key of every step, in order
    pub keys: Vec<String>,
    /// Number of leading steps whose layers can be reused
    pub reusable: usize,
    /// Layer names of the reusable prefix, in order
    pub retained: Vec<String>,
    /// Existing layers not reachable from the current chain
    pub stale: Vec<String>,
    /// Whether the backend answered the listing
    pub listed: bool,
}

impl CachePlan {
    /// Every step is covered by a cached layer
    pub fn is_complete(&self) -> bool {
        self.reusable == self.keys.len()
    }

    /// Layer the build resumes from, if any step is cached
    pub fn resume_from(&self) -> Option<&str> {
        self.retained.last().map(String::as_str)
    }
}

/// Cache of intermediate layers for one logical image
pub struct LayerCache {
    backend: Arc<dyn Backend>,
    image: ImageRef,
}

impl LayerCache {
    pub fn new(backend: Arc<dyn Backend>, image: ImageRef) -> Self {
        Self { backend, image }
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    /// Find the longest reusable prefix of `steps` built on `base`
    ///
    /// An unreachable backend counts as a full miss. Any other listing
    /// error is fatal, since stale layers could not be told apart.
    pub async fn resolve(&self, base: &str, steps: &[ActionRef]) -> StrataResult<CachePlan> {
        let keys = KeyChain::keys(base, steps);
        if keys.is_empty() {
            return Ok(CachePlan {
                listed: true,
                ..Default::default()
            });
        }

        let prefix = self.image.layer_prefix();
        let (existing, listed) = match self.backend.list_images(&prefix).await {
            Ok(names) => (names, true),
            Err(StrataError::BackendUnavailable { backend, reason }) => {
                warn!("{} unavailable, building without cache: {}", backend, reason);
                (Vec::new(), false)
            }
            Err(e) => return Err(e),
        };
        debug!("{} cached layers under {}", existing.len(), prefix);

        let known: HashSet<&str> = existing.iter().map(String::as_str).collect();
        let retained: Vec<String> = keys
            .iter()
            .map(|key| self.image.layer_name(key))
            .take_while(|name| known.contains(name.as_str()))
            .collect();

        let keep: HashSet<&str> = retained.iter().map(String::as_str).collect();
        let stale = existing
            .iter()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();

        Ok(CachePlan {
            reusable: retained.len(),
            keys,
            retained,
            stale,
            listed,
        })
    }

    /// Remove the stale layers of `plan`, returning how many were removed
    pub async fn invalidate(&self, plan: &CachePlan) -> StrataResult<usize> {
        if plan.stale.is_empty() {
            return Ok(0);
        }
        self.backend
            .remove_images(&plan.stale)
            .await
            .map_err(|e| match e {
                StrataError::CacheBackend { .. } => e,
                other => StrataError::cache_backend("removal", other.to_string()),
            })?;
        debug!("Removed {} stale layers of {}", plan.stale.len(), self.image);
        Ok(plan.stale.len())
    }
}
