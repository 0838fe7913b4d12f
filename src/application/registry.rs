//! Registry of named rate limiting policies.
//!
//! Each protected route class gets one named policy instance. Counters are
//! scoped by the policy name, so two instances never share quota even when
//! a request derives the same key under both.

use crate::domain::policy::{PolicyError, PolicyPreset, RateLimitPolicy};
use std::collections::HashMap;
use std::sync::Arc;

/// Named policies, built once at startup and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    policies: HashMap<Arc<str>, Arc<RateLimitPolicy>>,
}

impl PolicyRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding every [`PolicyPreset`].
    pub fn with_presets() -> Self {
        let mut registry = Self::new();
        for preset in PolicyPreset::ALL {
            let policy = preset.policy();
            registry
                .policies
                .insert(policy.shared_name(), Arc::new(policy));
        }
        registry
    }

    /// Register a policy under its name.
    ///
    /// # Errors
    /// Returns `PolicyError::DuplicateName` if the name is taken.
    pub fn register(
        &mut self,
        policy: RateLimitPolicy,
    ) -> Result<Arc<RateLimitPolicy>, PolicyError> {
        if self.policies.contains_key(policy.name()) {
            return Err(PolicyError::DuplicateName(policy.name().to_string()));
        }
        let policy = Arc::new(policy);
        self.policies
            .insert(policy.shared_name(), Arc::clone(&policy));
        Ok(policy)
    }

    /// Register a policy, replacing any policy with the same name.
    pub fn upsert(&mut self, policy: RateLimitPolicy) -> Option<Arc<RateLimitPolicy>> {
        self.policies.insert(policy.shared_name(), Arc::new(policy))
    }

    /// Look up a policy by name.
    pub fn get(&self, name: &str) -> Option<Arc<RateLimitPolicy>> {
        self.policies.get(name).cloned()
    }

    /// Look up the policy registered for a preset.
    pub fn preset(&self, preset: PolicyPreset) -> Option<Arc<RateLimitPolicy>> {
        self.get(preset.name())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.policies.keys().map(|name| &**name).collect();
        names.sort_unstable();
        names
    }

    /// Number of registered policies.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether no policy is registered.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}
