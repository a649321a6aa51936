use std::sync::Arc;

use dashmap::DashMap;
use tilbud_backend::Backend;
use tilbud_core::Transport;

use super::delivery::Delivery;
use super::schedule::Schedule;
use super::{Inner, RequestQueue};
use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::debugger::Debugger;
use crate::executor::NetworkExecutor;
use crate::signer::{Credentials, StaticCredentials};

/// Marker type for unset builder fields.
///
/// When you see `NotSet` in a compiler error, it means you haven't called
/// the corresponding builder method yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotSet;

/// Builder for [`RequestQueue`].
///
/// Transport and backend are required and can each be set once; `build` is
/// only available after both.
pub struct QueueBuilder<T = NotSet, B = NotSet> {
    transport: T,
    backend: B,
    config: QueueConfig,
    credentials: Arc<dyn Credentials>,
    clock: Arc<dyn Clock>,
    debuggers: Vec<Arc<dyn Debugger>>,
}

impl QueueBuilder<NotSet, NotSet> {
    /// Creates a new builder with no fields set.
    pub fn new() -> Self {
        Self {
            transport: NotSet,
            backend: NotSet,
            config: QueueConfig::default(),
            credentials: Arc::new(StaticCredentials::default()),
            clock: Arc::new(SystemClock),
            debuggers: Vec::new(),
        }
    }
}

impl Default for QueueBuilder<NotSet, NotSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> QueueBuilder<NotSet, B> {
    /// Sets the transport that performs network exchanges.
    pub fn transport<T>(self, transport: T) -> QueueBuilder<T, B>
    where
        T: Transport + 'static,
    {
        QueueBuilder {
            transport,
            backend: self.backend,
            config: self.config,
            credentials: self.credentials,
            clock: self.clock,
            debuggers: self.debuggers,
        }
    }
}

impl<T> QueueBuilder<T, NotSet> {
    /// Sets the cache backend.
    pub fn backend<B>(self, backend: B) -> QueueBuilder<T, B>
    where
        B: Backend + 'static,
    {
        QueueBuilder {
            transport: self.transport,
            backend,
            config: self.config,
            credentials: self.credentials,
            clock: self.clock,
            debuggers: self.debuggers,
        }
    }
}

impl<T, B> QueueBuilder<T, B> {
    /// Replaces the configuration.
    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the signing credentials. Defaults to anonymous.
    pub fn credentials<C>(mut self, credentials: C) -> Self
    where
        C: Credentials + 'static,
    {
        self.credentials = Arc::new(credentials);
        self
    }

    /// Sets the time source for cache freshness. Defaults to the wall clock.
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Registers a debugger. May be called several times.
    pub fn debugger<D>(mut self, debugger: D) -> Self
    where
        D: Debugger + 'static,
    {
        self.debuggers.push(Arc::new(debugger));
        self
    }
}

impl<T, B> QueueBuilder<T, B>
where
    T: Transport + 'static,
    B: Backend + 'static,
{
    /// Builds the engine. Workers do not run until
    /// [`RequestQueue::start`].
    pub fn build(self) -> RequestQueue {
        let executor = NetworkExecutor::new(Arc::new(self.transport), self.config.timeout);
        RequestQueue {
            inner: Arc::new(Inner {
                executor,
                backend: Arc::new(self.backend),
                credentials: self.credentials,
                clock: self.clock,
                debuggers: self.debuggers,
                seq: Default::default(),
                flights: DashMap::new(),
                tickets: DashMap::new(),
                schedule: Schedule::default(),
                delivery: Delivery::default(),
                tasks: Default::default(),
                undelivered: Default::default(),
                accepting: true.into(),
                workers: Default::default(),
                config: self.config,
            }),
        }
    }
}
