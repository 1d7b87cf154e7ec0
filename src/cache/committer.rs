//! Layer commits driven by step completion

use crate::action::Action;
use crate::error::{StrataError, StrataResult};
use crate::image::{ImageFormat, ImageRef};
use crate::pipeline::StepHook;
use crate::target::Container;
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::debug;

/// Commits one layer after each successful step, strictly in chain order
pub struct LayerCommitter<'a> {
    container: &'a Container,
    image: &'a ImageRef,
    keys: &'a [String],
    format: ImageFormat,
    next: Mutex<usize>,
}

impl<'a> LayerCommitter<'a> {
    /// Commit layers for `keys[start..]`
    pub fn new(
        container: &'a Container,
        image: &'a ImageRef,
        keys: &'a [String],
        start: usize,
        format: ImageFormat,
    ) -> Self {
        Self {
            container,
            image,
            keys,
            format,
            next: Mutex::new(start),
        }
    }

    /// Number of the next step expected to commit
    pub fn position(&self) -> usize {
        *self.next.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl StepHook for LayerCommitter<'_> {
    async fn after_success(&self, index: usize, action: &dyn Action) -> StrataResult<()> {
        let expected = self.position();
        if index != expected {
            return Err(StrataError::Internal(format!(
                "layer {} committed out of order (expected {})",
                index, expected
            )));
        }
        let key = self.keys.get(index).ok_or_else(|| {
            StrataError::Internal(format!("no cache key for step {}", index))
        })?;

        let name = self.image.layer_name(key);
        let id = self.container.commit_layer(&name, self.format).await?;
        debug!("Committed {} as {} ({})", action.describe(), name, id);

        *self.next.lock().unwrap_or_else(|p| p.into_inner()) = index + 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Run;
    use crate::backend::StubBackend;
    use crate::process::{OutputRegistry, ProcessRunner};
    use std::sync::Arc;

    #[tokio::test]
    async fn commits_follow_step_order() {
        let stub = StubBackend::new();
        let (registry, _) = OutputRegistry::capture();
        let runner = ProcessRunner::new(Arc::new(registry));
        let ctr = Container::acquire(Arc::new(stub.clone()), "alpine", "app", runner)
            .await
            .unwrap();
        let image = ImageRef::parse("app");
        let keys = vec!["k0".to_string(), "k1".to_string(), "k2".to_string()];
        let committer = LayerCommitter::new(&ctr, &image, &keys, 1, ImageFormat::Docker);
        let step = Run::new("true");

        assert!(committer.after_success(2, &step).await.is_err());
        committer.after_success(1, &step).await.unwrap();
        committer.after_success(2, &step).await.unwrap();
        assert_eq!(committer.position(), 3);
        assert!(committer.after_success(3, &step).await.is_err());

        assert_eq!(
            stub.calls_to("commit"),
            vec![
                "commit stub-ctr-1 docker app:layer-k1",
                "commit stub-ctr-1 docker app:layer-k2",
            ]
        );
    }
}
