use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::execution::{EngineControl, TradingEngine};
use crate::models::SymbolId;

/// Control side of a spawned engine
pub struct EngineHandle {
    control: watch::Sender<EngineControl>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn state(&self) -> EngineControl {
        *self.control.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[derive(Default)]
struct Slots {
    running: HashMap<SymbolId, EngineHandle>,
    /// Engines told to stop whose task may still be mid-cycle
    stopping: HashMap<SymbolId, JoinHandle<()>>,
}

impl Slots {
    fn clear_stopped(&mut self) {
        self.stopping.retain(|_, task| !task.is_finished());
    }
}

/// Directory of engines, at most one live task per symbol
///
/// Every read and write goes through the same lock. Spawning happens while
/// the lock is held so two concurrent `start` calls cannot both win. A
/// stopped engine keeps its slot until its task has returned.
#[derive(Default)]
pub struct BotRegistry {
    engines: Mutex<Slots>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn an engine for `symbol` unless one is already registered
    ///
    /// Returns `false` (and builds nothing) for a duplicate or while the
    /// previous engine for `symbol` is still winding down.
    pub fn start<F>(&self, symbol: SymbolId, build: F) -> bool
    where
        F: FnOnce() -> TradingEngine,
    {
        let mut engines = self.engines.lock();
        engines.clear_stopped();
        if engines.running.contains_key(&symbol) {
            tracing::warn!(symbol = %symbol, "⚠️  Engine already running, start ignored");
            return false;
        }
        if engines.stopping.contains_key(&symbol) {
            tracing::warn!(symbol = %symbol, "⚠️  Previous engine still stopping, start deferred");
            return false;
        }

        let (control, rx) = watch::channel(EngineControl::Running);
        let task = tokio::spawn(build().run(rx));
        engines.running.insert(symbol.clone(), EngineHandle { control, task });
        tracing::info!(symbol = %symbol, "▶️  Engine registered");
        true
    }

    /// Ask the engine to stop; it stays in the stopping set until its task returns
    ///
    /// Returns `false` for symbols with no running engine.
    pub fn stop(&self, symbol: &SymbolId) -> bool {
        let mut engines = self.engines.lock();
        let Some(handle) = engines.running.remove(symbol) else {
            return false;
        };
        handle.control.send_replace(EngineControl::Stopped);
        if !handle.task.is_finished() {
            engines.stopping.insert(symbol.clone(), handle.task);
        }
        tracing::info!(symbol = %symbol, "⏹️  Engine stop requested");
        true
    }

    /// Whether a stopped engine for `symbol` has not returned yet
    pub fn is_stopping(&self, symbol: &SymbolId) -> bool {
        let mut engines = self.engines.lock();
        engines.clear_stopped();
        engines.stopping.contains_key(symbol)
    }

    pub fn pause(&self, symbol: &SymbolId) -> bool {
        self.set_state(symbol, EngineControl::Paused)
    }

    pub fn resume(&self, symbol: &SymbolId) -> bool {
        self.set_state(symbol, EngineControl::Running)
    }

    fn set_state(&self, symbol: &SymbolId, state: EngineControl) -> bool {
        match self.engines.lock().running.get(symbol) {
            Some(handle) => {
                handle.control.send_replace(state);
                tracing::info!(symbol = %symbol, ?state, "Engine state changed");
                true
            }
            None => false,
        }
    }

    pub fn state(&self, symbol: &SymbolId) -> Option<EngineControl> {
        self.engines.lock().running.get(symbol).map(EngineHandle::state)
    }

    pub fn is_registered(&self, symbol: &SymbolId) -> bool {
        self.engines.lock().running.contains_key(symbol)
    }

    /// Registered symbols, sorted
    pub fn list(&self) -> Vec<SymbolId> {
        let mut symbols: Vec<SymbolId> = self.engines.lock().running.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.engines.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.lock().running.is_empty()
    }

    /// Drop entries whose task ended on its own (e.g. panicked)
    pub fn reap_finished(&self) -> Vec<SymbolId> {
        let mut engines = self.engines.lock();
        engines.clear_stopped();
        let finished: Vec<SymbolId> = engines
            .running
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(symbol, _)| symbol.clone())
            .collect();
        for symbol in &finished {
            engines.running.remove(symbol);
            tracing::warn!(symbol = %symbol, "Engine task ended unexpectedly");
        }
        finished
    }

    /// Stop everything, returning the tasks to await (including ones already stopping)
    pub fn stop_all(&self) -> Vec<JoinHandle<()>> {
        let mut engines = self.engines.lock();
        let mut tasks: Vec<JoinHandle<()>> = engines.stopping.drain().map(|(_, task)| task).collect();
        for (_, handle) in engines.running.drain() {
            handle.control.send_replace(EngineControl::Stopped);
            tasks.push(handle.task);
        }
        tasks
    }
}
