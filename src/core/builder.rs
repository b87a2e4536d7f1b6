use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    core::{
        admission::AdmissionController,
        engine::{Engine, Listener},
    },
    error::RegisterError,
    events::{Bus, Event},
    operations::{OpRef, OperationBinding},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing an [`Engine`] with its operations and subscribers.
pub struct EngineBuilder<I, V, E> {
    cfg: EngineConfig,
    bus: Bus,
    admission: AdmissionController,
    entries: HashMap<Arc<str>, OperationBinding<I, V, E>>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl<I, V, E> EngineBuilder<I, V, E>
where
    I: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: EngineConfig) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            admission: AdmissionController::new(bus.clone()),
            bus,
            cfg,
            entries: HashMap::new(),
            subscribers: Vec::new(),
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive engine events (attempts, backoff, admission) through
    /// dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Binds an operation. Bindings are immutable once registered.
    ///
    /// ### Errors
    /// [`RegisterError::Duplicate`] if the key is already bound.
    pub fn register(mut self, binding: OperationBinding<I, V, E>) -> Result<Self, RegisterError> {
        let key = Arc::clone(binding.key_arc());
        if self.entries.contains_key(&key) {
            return Err(RegisterError::Duplicate {
                key: key.to_string(),
            });
        }
        if let Some(policy) = binding.concurrency() {
            self.admission.register(Arc::clone(&key), *policy)?;
        }
        tracing::debug!(
            operation = %key,
            retry = binding.retry().is_some(),
            concurrency = binding.concurrency().is_some(),
            composition = ?binding.composition(),
            "operation registered"
        );
        self.entries.insert(key, binding);
        Ok(self)
    }

    /// Binds `op` under `key` with the policies configured for that key.
    ///
    /// A key absent from the configuration is bound as a passthrough.
    ///
    /// ### Errors
    /// - [`RegisterError::Duplicate`] if the key is already bound;
    /// - [`RegisterError::InvalidPolicy`] if the configured policy is malformed.
    pub fn register_configured(
        self,
        key: &str,
        op: OpRef<I, V, E>,
    ) -> Result<Self, RegisterError> {
        let binding = OperationBinding::new(key, op);
        let binding = match self.cfg.operations.get(key) {
            Some(op_cfg) => op_cfg
                .apply(binding)
                .map_err(|source| RegisterError::InvalidPolicy {
                    key: key.to_string(),
                    source,
                })?,
            None => binding,
        };
        self.register(binding)
    }

    /// Builds and returns the engine.
    ///
    /// With subscribers configured, this spawns the fan-out listener and one worker
    /// per subscriber, so it must run inside a Tokio runtime.
    pub fn build(self) -> Engine<I, V, E> {
        let listener = if self.subscribers.is_empty() {
            None
        } else {
            let subs = Arc::new(SubscriberSet::new(self.subscribers, self.bus.clone()));
            let token = CancellationToken::new();
            let handle = tokio::spawn(subscriber_listener(
                self.bus.subscribe(),
                Arc::clone(&subs),
                token.clone(),
            ));
            Some(Listener {
                token,
                handle,
                subs,
            })
        };
        Engine::new_internal(self.entries, self.admission, self.bus, listener)
    }
}

/// Forwards bus events to the subscriber set until cancelled, then drains what is left.
async fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: Arc<SubscriberSet>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            ev = rx.recv() => match ev {
                Ok(ev) => set.emit(&ev),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber listener lagged behind the bus");
                }
                Err(RecvError::Closed) => return,
            },
            _ = token.cancelled() => break,
        }
    }
    loop {
        match rx.try_recv() {
            Ok(ev) => set.emit(&ev),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "subscriber listener lagged behind the bus");
            }
            Err(TryRecvError::Empty | TryRecvError::Closed) => return,
        }
    }
}
