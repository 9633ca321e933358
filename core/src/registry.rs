use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use core_types::ProviderId;

use crate::error::{Result, StreamError};
use crate::provider::ExecutionProvider;
use crate::stream::{Notification, Stream};

/// Makes a consumer (stream, or the host when `None`) wait for a notification.
pub type WaitNotificationFn = fn(Option<&dyn Stream>, &dyn Notification) -> Result<()>;

/// Creates the stream a provider runs its kernels on.
pub type CreateStreamFn = Arc<dyn Fn(&dyn ExecutionProvider) -> Result<Box<dyn Stream>> + Send + Sync>;

/// Per-runtime table of wait functions and stream factories.
///
/// Filled while providers are brought up, read-only afterwards. Edges within
/// one provider need no entry: a single stream is already ordered.
#[derive(Clone, Default)]
pub struct StreamHandleRegistry {
    wait_fns:          HashMap<(ProviderId, ProviderId), WaitNotificationFn>,
    create_stream_fns: HashMap<ProviderId, CreateStreamFn>,
}

impl StreamHandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_wait_fn(&mut self, producer: ProviderId, consumer: ProviderId, wait_fn: WaitNotificationFn) {
        tracing::debug!(%producer, %consumer, "wait function registered");
        if self.wait_fns.insert((producer.clone(), consumer.clone()), wait_fn).is_some() {
            tracing::warn!(%producer, %consumer, "wait function replaced");
        }
    }

    pub fn register_create_stream_fn(&mut self, provider: ProviderId, create_fn: CreateStreamFn) {
        tracing::debug!(%provider, "stream factory registered");
        if self.create_stream_fns.insert(provider.clone(), create_fn).is_some() {
            tracing::warn!(%provider, "stream factory replaced");
        }
    }

    pub fn lookup_wait_fn(&self, producer: &ProviderId, consumer: &ProviderId) -> Result<WaitNotificationFn> {
        self.wait_fns
            .get(&(producer.clone(), consumer.clone()))
            .copied()
            .ok_or_else(|| StreamError::WaitFnUnregistered {
                producer: producer.clone(),
                consumer: consumer.clone(),
            })
    }

    pub fn has_stream_factory(&self, provider: &ProviderId) -> bool {
        self.create_stream_fns.contains_key(provider)
    }

    pub fn create_stream(&self, provider: &dyn ExecutionProvider) -> Result<Box<dyn Stream>> {
        let create_fn = self
            .create_stream_fns
            .get(provider.provider_type())
            .ok_or_else(|| StreamError::StreamFactoryUnregistered(provider.provider_type().clone()))?;
        create_fn(provider)
    }
}

impl fmt::Debug for StreamHandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandleRegistry")
            .field("wait_fns", &self.wait_fns.keys().collect::<Vec<_>>())
            .field("create_stream_fns", &self.create_stream_fns.keys().collect::<Vec<_>>())
            .finish()
    }
}
