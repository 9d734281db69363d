//! Processor registry
//!
//! Processors are the domain logic a transition runs. They are registered by
//! name at startup through [`RegistryBuilder`]; the built [`ProcessorRegistry`]
//! is read-only and shared behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::errors::{DefinitionError, ProcessorFailure};

mod context;

pub use context::{merge_patch, EntityScope, ProcessorContext};

/// Future returned by closure-based processors
pub type HandlerFuture<'c> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'c>>;

/// Domain logic bound to a transition
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &mut ProcessorContext<'_>) -> anyhow::Result<()>;
}

/// Adapter turning a closure into a [`Processor`]
///
/// ```ignore
/// builder.register_fn("stamp", |ctx| Box::pin(async move {
///     ctx.mutate_self(serde_json::json!({"stamped": true}));
///     Ok(())
/// }))?;
/// ```
pub struct FnProcessor<F>(F);

#[async_trait]
impl<F> Processor for FnProcessor<F>
where
    F: for<'c, 'a> Fn(&'c mut ProcessorContext<'a>) -> HandlerFuture<'c> + Send + Sync,
{
    async fn process(&self, ctx: &mut ProcessorContext<'_>) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// Processor that leaves the payload untouched
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProcessor;

#[async_trait]
impl Processor for NoopProcessor {
    async fn process(&self, _ctx: &mut ProcessorContext<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl RegistryBuilder {
    pub fn register(
        &mut self,
        name: impl Into<String>,
        processor: impl Processor + 'static,
    ) -> Result<&mut Self, DefinitionError> {
        let name = name.into();
        if self.processors.contains_key(&name) {
            return Err(DefinitionError::DuplicateProcessor(name));
        }
        debug!(processor = %name, "Processor registered");
        self.processors.insert(name, Arc::new(processor));
        Ok(self)
    }

    pub fn register_fn<F>(
        &mut self,
        name: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, DefinitionError>
    where
        F: for<'c, 'a> Fn(&'c mut ProcessorContext<'a>) -> HandlerFuture<'c>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, FnProcessor(handler))
    }

    pub fn build(&mut self) -> ProcessorRegistry {
        ProcessorRegistry {
            processors: std::mem::take(&mut self.processors),
        }
    }
}

/// Frozen name → processor map
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl std::fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorRegistry")
            .field("processors", &self.names())
            .finish()
    }
}

impl ProcessorRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.processors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Run `name` against `ctx`, bounded by `limit`
    pub async fn invoke(
        &self,
        name: &str,
        ctx: &mut ProcessorContext<'_>,
        limit: Duration,
    ) -> Result<(), ProcessorFailure> {
        let processor = self
            .processors
            .get(name)
            .ok_or_else(|| ProcessorFailure::Unregistered(name.to_string()))?;

        match tokio::time::timeout(limit, processor.process(ctx)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(match error.downcast::<ProcessorFailure>() {
                Ok(failure) => failure,
                Err(error) => ProcessorFailure::Handler(error),
            }),
            Err(_) => {
                warn!(processor = %name, timeout_ms = limit.as_millis() as u64, "Processor timed out");
                Err(ProcessorFailure::Timeout(limit))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TechnicalId, TriggerContext, TriggerKind};
    use crate::store::InMemoryEntityStore;
    use serde_json::json;

    struct Stamp;

    #[async_trait]
    impl Processor for Stamp {
        async fn process(&self, ctx: &mut ProcessorContext<'_>) -> anyhow::Result<()> {
            ctx.mutate_self(json!({"stamped": true}));
            Ok(())
        }
    }

    fn scope() -> EntityScope<'static> {
        EntityScope {
            entity_type: "job",
            version: "1000",
            technical_id: TechnicalId::new(),
            transition: "go",
        }
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut builder = ProcessorRegistry::builder();
        builder.register("stamp", Stamp).unwrap();
        let err = builder.register("stamp", NoopProcessor).err().unwrap();
        assert!(matches!(err, DefinitionError::DuplicateProcessor(ref n) if n == "stamp"));
    }

    #[tokio::test]
    async fn test_invoke_runs_trait_and_closure_processors() {
        let registry = ProcessorRegistry::builder()
            .register("stamp", Stamp)
            .unwrap()
            .register_fn("count", |ctx| {
                Box::pin(async move {
                    let n = ctx.payload()["n"].as_i64().unwrap_or(0);
                    ctx.payload_mut()["n"] = json!(n + 1);
                    Ok(())
                })
            })
            .unwrap()
            .build();

        let store = InMemoryEntityStore::new();
        let trigger = TriggerContext::new(TriggerKind::Manual, "job");
        let mut ctx = ProcessorContext::new("t", scope(), &trigger, &[], &store, json!({"n": 1}));
        registry.invoke("stamp", &mut ctx, Duration::from_secs(1)).await.unwrap();
        registry.invoke("count", &mut ctx, Duration::from_secs(1)).await.unwrap();
        assert_eq!(ctx.payload(), &json!({"n": 2, "stamped": true}));
    }

    #[tokio::test]
    async fn test_invoke_maps_failures() {
        let registry = ProcessorRegistry::builder()
            .register_fn("boom", |_ctx| {
                Box::pin(async move {
                    let result: anyhow::Result<()> = Err(anyhow::anyhow!("upstream returned 500"));
                    result
                })
            })
            .unwrap()
            .register_fn("slow", |_ctx| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
            })
            .unwrap()
            .build();

        let store = InMemoryEntityStore::new();
        let trigger = TriggerContext::new(TriggerKind::Manual, "job");
        let mut ctx = ProcessorContext::new("t", scope(), &trigger, &[], &store, json!({}));

        let err = registry.invoke("boom", &mut ctx, Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("upstream returned 500"));

        let err = registry
            .invoke("slow", &mut ctx, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessorFailure::Timeout(_)));

        let err = registry.invoke("missing", &mut ctx, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, ProcessorFailure::Unregistered(_)));
    }
}
