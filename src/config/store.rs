use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{IndicatorParams, RiskParams, SymbolSettings};
use crate::models::SymbolId;
use crate::Result;

/// Immutable view of the live configuration
///
/// Workers grab one at the top of each cycle and use it for the whole
/// cycle; later edits land in a new snapshot with a higher `version`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub symbols: Vec<SymbolId>,
    pub overrides: BTreeMap<SymbolId, SymbolSettings>,
    pub defaults: SymbolSettings,
}

impl ConfigSnapshot {
    pub fn settings_for(&self, symbol: &SymbolId) -> SymbolSettings {
        self.overrides
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    pub fn contains(&self, symbol: &SymbolId) -> bool {
        self.symbols.contains(symbol)
    }
}

/// Partial update for one symbol's settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsPatch {
    pub interval: Option<String>,
    pub cycle_interval_secs: Option<u64>,
    pub kline_limit: Option<u32>,
    pub indicator: Option<IndicatorParams>,
    pub risk: Option<RiskParams>,
}

impl SettingsPatch {
    fn apply(self, mut settings: SymbolSettings) -> SymbolSettings {
        if let Some(interval) = self.interval {
            settings.interval = interval;
        }
        if let Some(secs) = self.cycle_interval_secs {
            settings.cycle_interval_secs = secs;
        }
        if let Some(limit) = self.kline_limit {
            settings.kline_limit = limit;
        }
        if let Some(indicator) = self.indicator {
            settings.indicator = indicator;
        }
        if let Some(risk) = self.risk {
            settings.risk = risk;
        }
        settings
    }
}

/// On-disk layout of `dynamic_config.json`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct DynamicConfigFile {
    symbols: Vec<SymbolId>,
    pairs: BTreeMap<SymbolId, SymbolSettings>,
}

/// Live, versioned per-symbol configuration backed by a JSON file
///
/// Reads are lock-free (`ArcSwap`). Writers are serialized by a mutex,
/// persist the new state, and then publish it.
pub struct ConfigStore {
    path: PathBuf,
    defaults: SymbolSettings,
    current: ArcSwap<ConfigSnapshot>,
    write_lock: Mutex<()>,
}

impl ConfigStore {
    /// Open the store at `path`, creating it from `initial_symbols` if absent
    pub fn open(
        path: impl Into<PathBuf>,
        defaults: SymbolSettings,
        initial_symbols: Vec<SymbolId>,
    ) -> Result<Self> {
        let path = path.into();

        let file = if path.exists() {
            match read_file(&path) {
                Ok(file) => {
                    tracing::info!(
                        "📂 Loaded dynamic config from {} ({} symbols)",
                        path.display(),
                        file.symbols.len()
                    );
                    file
                }
                Err(e) => {
                    tracing::warn!(
                        "Could not parse {}: {}. Starting from configured symbols",
                        path.display(),
                        e
                    );
                    DynamicConfigFile {
                        symbols: initial_symbols,
                        pairs: BTreeMap::new(),
                    }
                }
            }
        } else {
            let file = DynamicConfigFile {
                symbols: initial_symbols,
                pairs: BTreeMap::new(),
            };
            write_file(&path, &file)?;
            tracing::info!("📝 Initialized {}", path.display());
            file
        };

        let snapshot = ConfigSnapshot {
            version: 1,
            symbols: file.symbols,
            overrides: file.pairs,
            defaults: defaults.clone(),
        };

        Ok(Self {
            path,
            defaults,
            current: ArcSwap::from_pointee(snapshot),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    pub fn settings_for(&self, symbol: &SymbolId) -> SymbolSettings {
        self.current.load().settings_for(symbol)
    }

    pub fn symbols(&self) -> Vec<SymbolId> {
        self.current.load().symbols.clone()
    }

    /// Returns false if the symbol was already configured
    pub fn add_symbol(&self, symbol: SymbolId) -> Result<bool> {
        self.modify(|file| {
            if file.symbols.contains(&symbol) {
                return false;
            }
            file.symbols.push(symbol.clone());
            true
        })
    }

    /// Returns false if the symbol was not configured. Overrides are kept.
    pub fn remove_symbol(&self, symbol: &SymbolId) -> Result<bool> {
        self.modify(|file| {
            let before = file.symbols.len();
            file.symbols.retain(|s| s != symbol);
            file.symbols.len() != before
        })
    }

    pub fn update_settings(&self, symbol: &SymbolId, patch: SettingsPatch) -> Result<SymbolSettings> {
        let defaults = self.defaults.clone();
        let mut updated = None;

        self.modify(|file| {
            let base = file.pairs.get(symbol).cloned().unwrap_or_else(|| defaults.clone());
            let settings = patch.clone().apply(base);
            file.pairs.insert(symbol.clone(), settings.clone());
            updated = Some(settings);
            true
        })?;

        tracing::info!(symbol = %symbol, "⚙️  Settings updated");
        Ok(updated.unwrap_or(defaults))
    }

    /// Drop the overrides for one symbol, or for all of them
    pub fn reset(&self, symbol: Option<&SymbolId>) -> Result<()> {
        self.modify(|file| match symbol {
            Some(symbol) => file.pairs.remove(symbol).is_some(),
            None => {
                let changed = !file.pairs.is_empty();
                file.pairs.clear();
                changed
            }
        })?;
        Ok(())
    }

    pub fn backup(&self, backup_path: &Path) -> Result<()> {
        let _guard = self.write_lock.lock();
        write_file(backup_path, &to_file(&self.current.load()))?;
        tracing::info!("💾 Config backup written to {}", backup_path.display());
        Ok(())
    }

    pub fn restore(&self, backup_path: &Path) -> Result<()> {
        let file = read_file(backup_path)?;

        let _guard = self.write_lock.lock();
        write_file(&self.path, &file)?;
        self.publish(file);

        tracing::info!("♻️  Config restored from {}", backup_path.display());
        Ok(())
    }

    /// Pick up edits made to the file by another process
    ///
    /// Returns true if the on-disk state differed from the live snapshot.
    pub fn reload(&self) -> Result<bool> {
        let file = read_file(&self.path)?;

        let _guard = self.write_lock.lock();
        let current = self.current.load();
        if current.symbols == file.symbols && current.overrides == file.pairs {
            return Ok(false);
        }
        self.publish(file);
        Ok(true)
    }

    fn modify<F>(&self, change: F) -> Result<bool>
    where
        F: FnOnce(&mut DynamicConfigFile) -> bool,
    {
        let _guard = self.write_lock.lock();

        let mut file = to_file(&self.current.load());
        if !change(&mut file) {
            return Ok(false);
        }

        write_file(&self.path, &file)?;
        self.publish(file);
        Ok(true)
    }

    /// Caller must hold `write_lock`
    fn publish(&self, file: DynamicConfigFile) {
        let version = self.current.load().version + 1;
        self.current.store(Arc::new(ConfigSnapshot {
            version,
            symbols: file.symbols,
            overrides: file.pairs,
            defaults: self.defaults.clone(),
        }));
    }
}

fn to_file(snapshot: &ConfigSnapshot) -> DynamicConfigFile {
    DynamicConfigFile {
        symbols: snapshot.symbols.clone(),
        pairs: snapshot.overrides.clone(),
    }
}

fn read_file(path: &Path) -> Result<DynamicConfigFile> {
    let raw = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Write via a sibling temp file so a crash never leaves a truncated file
fn write_file(path: &Path, file: &DynamicConfigFile) -> Result<()> {
    let json = serde_json::to_string_pretty(file)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
