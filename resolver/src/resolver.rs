use crate::cache::MemoCache;
use crate::config::{ConfigError, ConfigPatch, FlagConfig};
use crate::data::NormalizedDataMap;
use crate::descriptor::{DescriptorInit, FlagDescriptor};
use crate::key;
use crate::metrics_defs::{RESOLVE_RELAY, counter};
use crate::state::{ResolutionError, StateMachine};
use serde_json::Value;
use std::sync::Arc;

/// Outcome of a dynamic lookup: a configuration option or a flag.
#[derive(Clone, Debug, PartialEq)]
pub enum Resolved {
    Config(Value),
    Flag(Arc<FlagDescriptor>),
}

impl Resolved {
    pub fn into_flag(self) -> Option<Arc<FlagDescriptor>> {
        match self {
            Resolved::Flag(descriptor) => Some(descriptor),
            Resolved::Config(_) => None,
        }
    }

    pub fn as_config(&self) -> Option<&Value> {
        match self {
            Resolved::Config(value) => Some(value),
            Resolved::Flag(_) => None,
        }
    }
}

/// Resolves flag names against the most recently received feature data.
///
/// Resolution never fails: unknown keys, missing data and error states all
/// produce a descriptor that falls back to the configured default value.
/// Memoized descriptors are recomputed whenever the resolution state or the
/// configuration changes.
pub struct Resolver {
    config: FlagConfig,
    state: StateMachine,
    cache: MemoCache,
}

impl Resolver {
    pub fn new(config: FlagConfig) -> Self {
        Resolver {
            config,
            state: StateMachine::new(),
            cache: MemoCache::new(),
        }
    }

    pub fn config(&self) -> &FlagConfig {
        &self.config
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    /// Applies the known options in `options`, ignoring anything else.
    pub fn configure(&mut self, options: &Value) -> Result<(), ConfigError> {
        let patch = ConfigPatch::from_value(options)?;
        self.config.apply(patch)?;
        self.refresh_memoized();
        Ok(())
    }

    pub fn receive(&mut self, payload: &Value) -> Result<usize, ResolutionError> {
        let received = self
            .state
            .receive(payload, &self.config.feature_key, &self.config.enabled_key);
        self.refresh_memoized();
        received
    }

    pub fn receive_error(&mut self, reason: impl Into<String>) {
        self.state.receive_error(reason);
        self.refresh_memoized();
    }

    /// Every flag resolves as an enabled relay from now on, without memoization.
    pub fn enter_test_mode(&mut self) {
        if self.state.enter_test_mode() {
            self.config.should_memoize = false;
            self.cache.clear();
        }
    }

    pub fn did_fetch_data(&self) -> bool {
        self.state.did_fetch_data()
    }

    pub fn current_data(&self) -> Option<&NormalizedDataMap> {
        self.state.current_data()
    }

    pub fn last_error(&self) -> Option<&ResolutionError> {
        self.state.last_error()
    }

    pub fn is_memoized(&self, requested_key: &str) -> bool {
        self.cache.contains(&key::normalize(requested_key))
    }

    /// Configuration option names resolve to their values; every other key
    /// resolves as a flag.
    pub fn resolve(&self, requested_key: &str) -> Resolved {
        match self.config.option(requested_key) {
            Some(value) => Resolved::Config(value),
            None => Resolved::Flag(self.flag(requested_key)),
        }
    }

    pub fn flag(&self, requested_key: &str) -> Arc<FlagDescriptor> {
        let canonical_key = key::normalize(requested_key);

        if self.state.is_test_mode() {
            counter!(RESOLVE_RELAY).increment(1);
            return Arc::new(FlagDescriptor::relay(Value::Bool(true)));
        }

        if !self.config.should_memoize {
            return Arc::new(self.compute(&canonical_key));
        }

        if let Some(cached) = self.cache.get(&canonical_key) {
            tracing::debug!(key = %canonical_key, "memoized flag");
            return cached;
        }
        self.cache
            .put(&canonical_key, Arc::new(self.compute(&canonical_key)))
    }

    /// Recomputes `requested_key`, replacing any memoized descriptor.
    pub fn invalidate(&self, requested_key: &str) -> Arc<FlagDescriptor> {
        let canonical_key = key::normalize(requested_key);

        if self.state.is_test_mode() || !self.config.should_memoize {
            return self.flag(&canonical_key);
        }
        self.cache
            .invalidate_and_put(&canonical_key, Arc::new(self.compute(&canonical_key)))
    }

    /// Releases every memoized descriptor.
    pub fn teardown(&mut self) {
        self.cache.clear();
    }

    fn compute(&self, canonical_key: &str) -> FlagDescriptor {
        let descriptor = match self.state.current_data() {
            Some(data) => FlagDescriptor::new(DescriptorInit {
                default_value: self.config.default_value.clone(),
                data: data.get(canonical_key).cloned(),
                is_relay: false,
            }),
            None => FlagDescriptor::relay(self.config.default_value.clone()),
        };

        tracing::debug!(
            key = canonical_key,
            relay = descriptor.is_relay(),
            "resolved flag"
        );
        if descriptor.is_relay() {
            counter!(RESOLVE_RELAY).increment(1);
        }
        descriptor
    }

    fn refresh_memoized(&self) {
        if !self.config.should_memoize {
            self.cache.clear();
            return;
        }
        for canonical_key in self.cache.keys() {
            self.cache
                .invalidate_and_put(&canonical_key, Arc::new(self.compute(&canonical_key)));
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new(FlagConfig::default())
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.teardown();
    }
}
