//! Signal dispatch: a single `handle` capability with a no-handler fallback.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use np_common::{Signal, SignalType};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Something that reacts to delivered signals.
#[async_trait]
pub trait SignalHandler: Send + Sync {
    /// React to one signal.
    ///
    /// # Errors
    ///
    /// Errors are logged by the runtime and never stop the receive loop.
    async fn handle(&self, signal: &Signal) -> anyhow::Result<()>;
}

/// Fallback that only logs what arrived.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHandler;

#[async_trait]
impl SignalHandler for NoHandler {
    async fn handle(&self, signal: &Signal) -> anyhow::Result<()> {
        tracing::debug!(
            kind = %signal.signal_type,
            source = %signal.source,
            "no handler registered"
        );
        Ok(())
    }
}

type HandlerFn = Arc<dyn Fn(Signal) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Per-kind handler table that delegates unmatched kinds to a fallback.
pub struct Handlers {
    by_type: HashMap<SignalType, HandlerFn>,
    fallback: Arc<dyn SignalHandler>,
}

impl Default for Handlers {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut kinds: Vec<_> = self.by_type.keys().collect();
        kinds.sort();
        f.debug_struct("Handlers").field("kinds", &kinds).finish_non_exhaustive()
    }
}

impl Handlers {
    /// Empty table with [`NoHandler`] as fallback.
    #[must_use]
    pub fn new() -> Self {
        Self::with_fallback(Arc::new(NoHandler))
    }

    /// Empty table delegating unmatched kinds to `fallback`.
    #[must_use]
    pub fn with_fallback(fallback: Arc<dyn SignalHandler>) -> Self {
        Self {
            by_type: HashMap::new(),
            fallback,
        }
    }

    /// Register `handler` for `signal_type`, replacing any previous one.
    ///
    /// ```
    /// use npagent::handler::Handlers;
    /// use np_common::SignalType;
    ///
    /// let handlers = Handlers::new().on_signal(SignalType::Dopamine, |signal| async move {
    ///     println!("reward from {}", signal.source);
    ///     Ok(())
    /// });
    /// assert!(handlers.handles(SignalType::Dopamine));
    /// ```
    #[must_use]
    pub fn on_signal<F, Fut>(mut self, signal_type: SignalType, handler: F) -> Self
    where
        F: Fn(Signal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: HandlerFn = Arc::new(move |signal: Signal| -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(handler(signal))
        });
        self.by_type.insert(signal_type, boxed);
        self
    }

    /// Returns `true` if a handler is registered for `signal_type`.
    #[must_use]
    pub fn handles(&self, signal_type: SignalType) -> bool {
        self.by_type.contains_key(&signal_type)
    }
}

#[async_trait]
impl SignalHandler for Handlers {
    async fn handle(&self, signal: &Signal) -> anyhow::Result<()> {
        match self.by_type.get(&signal.signal_type) {
            Some(handler) => handler(signal.clone()).await,
            None => self.fallback.handle(signal).await,
        }
    }
}
