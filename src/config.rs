//! Bridge configuration and process-wide options.
//!
//! `BridgeConfig` is the static configuration supplied when a store is bridged.
//! `GlobalOptions` are the persisted, process-wide options; they are read through
//! an [`OptionsSource`] on every use because they can change at any time.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::action::Action;
use crate::error::ConfigError;

/// Element-wise decoder applied to every imported computed state.
pub type StateDecoder = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Element-wise decoder applied to every imported action.
pub type ActionDecoder = Arc<dyn Fn(Action) -> Action + Send + Sync>;

/// Static configuration of one bridged store.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Instance label shown by the observer. Defaults to the environment title.
    pub name: Option<String>,

    /// Only action types matching one of these patterns are relayed.
    pub actions_whitelist: Option<Vec<String>>,

    /// Action types matching one of these patterns are never relayed.
    pub actions_blacklist: Option<Vec<String>>,

    /// Decoder for imported computed states.
    #[serde(skip)]
    pub deserialize_state: Option<StateDecoder>,

    /// Decoder for imported actions.
    #[serde(skip)]
    pub deserialize_action: Option<ActionDecoder>,
}

impl BridgeConfig {
    /// Creates an empty configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the action whitelist.
    #[must_use]
    pub fn with_whitelist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions_whitelist = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the action blacklist.
    #[must_use]
    pub fn with_blacklist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actions_blacklist = Some(patterns.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the decoder for imported computed states.
    #[must_use]
    pub fn with_state_decoder(mut self, decoder: impl Fn(Value) -> Value + Send + Sync + 'static) -> Self {
        self.deserialize_state = Some(Arc::new(decoder));
        self
    }

    /// Sets the decoder for imported actions.
    #[must_use]
    pub fn with_action_decoder(mut self, decoder: impl Fn(Action) -> Action + Send + Sync + 'static) -> Self {
        self.deserialize_action = Some(Arc::new(decoder));
        self
    }

    /// True when either filter list was supplied, even empty.
    #[must_use]
    pub const fn has_local_filter(&self) -> bool {
        self.actions_whitelist.is_some() || self.actions_blacklist.is_some()
    }

    /// Parses a configuration from JSON. Decoders must be attached afterwards.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }
}

impl fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("name", &self.name)
            .field("actions_whitelist", &self.actions_whitelist)
            .field("actions_blacklist", &self.actions_blacklist)
            .field("deserialize_state", &self.deserialize_state.is_some())
            .field("deserialize_action", &self.deserialize_action.is_some())
            .finish()
    }
}

/// Process-wide options persisted by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GlobalOptions {
    /// Always send payloads in the serialized string form.
    pub serialize: bool,

    /// Enables the global action filter below.
    pub filter: bool,

    /// Global whitelist pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whitelist: Option<String>,

    /// Global blacklist pattern.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blacklist: Option<String>,

    /// History length after which the session is flagged as excess.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<usize>,
}

impl GlobalOptions {
    /// Parses options from JSON.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// Loads options from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&raw)
    }

    /// The configured max history length, ignoring zero.
    #[must_use]
    pub fn max_age(&self) -> Option<usize> {
        self.max_age.filter(|max| *max > 0)
    }
}

/// Source of the current process-wide options.
pub trait OptionsSource: Send + Sync {
    /// Returns a snapshot of the current options.
    fn options(&self) -> GlobalOptions;
}

impl OptionsSource for GlobalOptions {
    fn options(&self) -> GlobalOptions {
        self.clone()
    }
}

/// Options that can be updated while a bridge is running.
#[derive(Debug, Default)]
pub struct SharedOptions {
    inner: RwLock<GlobalOptions>,
}

impl SharedOptions {
    /// Wraps an initial set of options.
    #[must_use]
    pub fn new(options: GlobalOptions) -> Self {
        Self {
            inner: RwLock::new(options),
        }
    }

    /// Applies an in-place update.
    pub fn update(&self, f: impl FnOnce(&mut GlobalOptions)) {
        match self.inner.write() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Replaces the options wholesale.
    pub fn replace(&self, options: GlobalOptions) {
        self.update(|current| *current = options);
    }
}

impl OptionsSource for SharedOptions {
    fn options(&self) -> GlobalOptions {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Decides whether relaying is currently allowed.
pub trait Permission: Send + Sync {
    /// Returns true when the bridge may intercept the store.
    fn is_allowed(&self, options: &GlobalOptions) -> bool;
}

impl<F> Permission for F
where
    F: Fn(&GlobalOptions) -> bool + Send + Sync,
{
    fn is_allowed(&self, options: &GlobalOptions) -> bool {
        self(options)
    }
}

/// Always allows relaying.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Permission for AllowAll {
    fn is_allowed(&self, _options: &GlobalOptions) -> bool {
        true
    }
}

/// Never allows relaying; every store passes through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAll;

impl Permission for DenyAll {
    fn is_allowed(&self, _options: &GlobalOptions) -> bool {
        false
    }
}
