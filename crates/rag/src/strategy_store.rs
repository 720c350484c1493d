//! Strategy store: trigger -> expansion, with optional durable backing
//!
//! Strategies proposed during a run enter the in-memory store at once and
//! are visible to later sections. They reach durable storage only through
//! [`StrategyStore::persist`], which the refinement engine calls after a
//! confirmed improvement when learning is enabled.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use verso_core::strategy::normalize_trigger;
use verso_core::Strategy;

use crate::RagError;

/// Durable strategy storage
pub trait StrategyPersistence: Send + Sync {
    /// All stored strategies in file order
    fn load(&self) -> Result<Vec<Strategy>, RagError>;

    /// Insert or replace by trigger; atomic per call
    fn upsert(&self, strategy: &Strategy) -> Result<(), RagError>;
}

/// On-disk layout of the strategy file
#[derive(Debug, Default, Serialize, Deserialize)]
struct StrategyFile {
    #[serde(default)]
    strategies: Vec<Strategy>,
}

/// YAML file persistence
///
/// Read-modify-write runs under a mutex and the new content replaces the
/// old file through a rename, so a crash never leaves a torn file.
#[derive(Debug)]
pub struct YamlStrategyFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl YamlStrategyFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<StrategyFile, RagError> {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) if raw.trim().is_empty() => Ok(StrategyFile::default()),
            Ok(raw) => serde_yaml::from_str(&raw).map_err(|e| {
                RagError::Persistence(format!("{}: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StrategyFile::default()),
            Err(e) => Err(RagError::Persistence(format!(
                "{}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn write(&self, file: &StrategyFile) -> Result<(), RagError> {
        let io_err = |e: std::io::Error| {
            RagError::Persistence(format!("{}: {}", self.path.display(), e))
        };

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let yaml = serde_yaml::to_string(file)
            .map_err(|e| RagError::Persistence(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(yaml.as_bytes()).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

impl StrategyPersistence for YamlStrategyFile {
    fn load(&self) -> Result<Vec<Strategy>, RagError> {
        let _guard = self.lock.lock();
        Ok(self.read()?.strategies)
    }

    fn upsert(&self, strategy: &Strategy) -> Result<(), RagError> {
        let _guard = self.lock.lock();
        let mut file = self.read()?;
        match file
            .strategies
            .iter_mut()
            .find(|s| s.trigger == strategy.trigger)
        {
            Some(existing) => *existing = strategy.clone(),
            None => file.strategies.push(strategy.clone()),
        }
        self.write(&file)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    /// Triggers in insertion order; the first match wins
    order: Vec<String>,
    by_trigger: HashMap<String, Strategy>,
    /// Triggers added during this run
    session: HashSet<String>,
}

/// Thread-safe strategy store
pub struct StrategyStore {
    inner: RwLock<StoreInner>,
    persistence: Option<Arc<dyn StrategyPersistence>>,
}

impl Default for StrategyStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyStore {
    /// Empty store without durable backing
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            persistence: None,
        }
    }

    /// Store seeded from, and persisting to, `persistence`
    pub fn open(persistence: Arc<dyn StrategyPersistence>) -> Result<Self, RagError> {
        let seeds = persistence.load()?;
        let store = Self {
            inner: RwLock::new(StoreInner::default()),
            persistence: Some(persistence),
        };
        {
            let mut inner = store.inner.write();
            for s in seeds {
                Self::put(&mut inner, s);
            }
        }
        tracing::info!(strategies = store.len(), "Strategy store loaded");
        Ok(store)
    }

    /// Store seeded from fixed strategies (no durable backing)
    pub fn with_strategies(strategies: impl IntoIterator<Item = Strategy>) -> Self {
        let store = Self::new();
        {
            let mut inner = store.inner.write();
            for s in strategies {
                Self::put(&mut inner, s);
            }
        }
        store
    }

    fn put(inner: &mut StoreInner, mut strategy: Strategy) {
        // Hand-edited files may carry mixed-case triggers
        strategy.trigger = normalize_trigger(&strategy.trigger);
        if strategy.trigger.is_empty() {
            return;
        }
        if !inner.by_trigger.contains_key(&strategy.trigger) {
            inner.order.push(strategy.trigger.clone());
        }
        inner.by_trigger.insert(strategy.trigger.clone(), strategy);
    }

    /// First strategy whose trigger occurs in the query
    pub fn first_match(&self, query: &str) -> Option<Strategy> {
        let lowered = query.to_lowercase();
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter_map(|t| inner.by_trigger.get(t))
            .find(|s| s.matches(&lowered))
            .cloned()
    }

    pub fn contains(&self, trigger: &str) -> bool {
        self.inner
            .read()
            .by_trigger
            .contains_key(&normalize_trigger(trigger))
    }

    pub fn get(&self, trigger: &str) -> Option<Strategy> {
        self.inner
            .read()
            .by_trigger
            .get(&normalize_trigger(trigger))
            .cloned()
    }

    /// Add to the session overlay; replaces a strategy with the same trigger
    pub fn add_session(&self, strategy: Strategy) {
        let mut inner = self.inner.write();
        inner.session.insert(strategy.trigger.clone());
        Self::put(&mut inner, strategy);
    }

    /// Write a stored strategy to durable storage
    ///
    /// Returns `Ok(false)` when the store has no durable backing.
    pub fn persist(&self, trigger: &str) -> Result<bool, RagError> {
        let Some(persistence) = &self.persistence else {
            return Ok(false);
        };
        let strategy = self
            .get(trigger)
            .ok_or_else(|| RagError::NotFound(format!("strategy '{}'", trigger)))?;
        persistence.upsert(&strategy)?;
        tracing::info!(trigger = %strategy.trigger, "Strategy persisted");
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.inner.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Triggers added during this run, in insertion order
    pub fn session_triggers(&self) -> Vec<String> {
        let inner = self.inner.read();
        inner
            .order
            .iter()
            .filter(|t| inner.session.contains(*t))
            .cloned()
            .collect()
    }
}
