use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::shared::models::Meeting;

use super::builtin;
use super::error::{Result, StrategyError};
use super::interpreter::PythonInterpreter;
use super::script::{self, ScriptStrategy};

/// A way of retrieving one subject's published agendas.
#[async_trait]
pub trait FetchingStrategy: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, params: &Map<String, Value>) -> Result<Vec<Meeting>>;
}

pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn FetchingStrategy> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Builtin,
    Script(PathBuf),
}

/// A named strategy constructor.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub origin: Origin,
    factory: StrategyFactory,
}

impl Registration {
    pub fn new<F, S>(name: impl Into<String>, origin: Origin, factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: FetchingStrategy + 'static,
    {
        Self {
            name: name.into(),
            origin,
            factory: Arc::new(move || Box::new(factory()) as Box<dyn FetchingStrategy>),
        }
    }

    pub fn script(strategy: ScriptStrategy) -> Self {
        let name = strategy.name().to_string();
        let origin = Origin::Script(strategy.module_path().to_path_buf());
        Self::new(name, origin, move || strategy.clone())
    }

    pub fn instantiate(&self) -> Box<dyn FetchingStrategy> {
        (self.factory)()
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name)
            .field("origin", &self.origin)
            .finish()
    }
}

/// Name-keyed table of strategies. Built once per process and passed to
/// whoever dispatches fetches.
#[derive(Debug, Default, Clone)]
pub struct StrategyRegistry {
    entries: BTreeMap<String, Registration>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Native strategies compiled into the binary.
    pub fn with_builtins(http: reqwest::Client) -> Self {
        let mut registry = Self::new();
        for registration in builtin::registrations(http) {
            registry.register(registration);
        }
        registry
    }

    /// Built-in strategies plus everything discovered in `dir`.
    pub fn load_all(dir: &Path, interpreter: &PythonInterpreter, http: reqwest::Client) -> Result<Self> {
        let mut registry = Self::with_builtins(http);
        let discovered = discover_registrations(dir, interpreter)?;
        let count = discovered.len();
        registry.extend(discovered);
        info!(
            "Loaded {} strategies ({} from {})",
            registry.len(),
            count,
            dir.display()
        );
        Ok(registry)
    }

    /// Register a strategy. An existing entry with the same name is replaced;
    /// returns true when that happened.
    pub fn register(&mut self, registration: Registration) -> bool {
        let name = registration.name.clone();
        match self.entries.insert(name.clone(), registration) {
            Some(previous) => {
                warn!("Strategy {} re-registered, replacing {:?}", name, previous.origin);
                true
            }
            None => {
                debug!("Registered strategy {}", name);
                false
            }
        }
    }

    pub fn extend(&mut self, registrations: impl IntoIterator<Item = Registration>) {
        for registration in registrations {
            self.register(registration);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn registrations(&self) -> impl Iterator<Item = &Registration> {
        self.entries.values()
    }

    pub fn resolve(&self, name: &str) -> Result<Box<dyn FetchingStrategy>> {
        self.entries
            .get(name)
            .map(Registration::instantiate)
            .ok_or_else(|| StrategyError::UnknownStrategy(name.to_string()))
    }

    /// Instantiate `name` and fetch with `params` as keyword arguments.
    pub async fn get_agendas(&self, name: &str, params: &Map<String, Value>) -> Result<Vec<Meeting>> {
        let strategy = self.resolve(name)?;
        strategy.fetch(params).await
    }
}

/// One registration per strategy class found in the strategies package.
pub fn discover_registrations(dir: &Path, interpreter: &PythonInterpreter) -> Result<Vec<Registration>> {
    Ok(script::discover(dir, interpreter)?
        .into_iter()
        .map(Registration::script)
        .collect())
}

/// Interpret a strategy's raw output as a list of meetings.
pub fn meetings_from_value(name: &str, value: Value) -> Result<Vec<Meeting>> {
    serde_json::from_value(value).map_err(|err| StrategyError::InvalidOutput {
        name: name.to_string(),
        reason: err.to_string(),
    })
}
