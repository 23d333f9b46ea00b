//! Optional second opinion on the indicator signal
//!
//! A refiner looks at the same snapshot the engine used and returns its own
//! label with a confidence. The engine only lets it override the base
//! signal when the two disagree and the confidence clears
//! [`OVERRIDE_CONFIDENCE`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::indicators::{columns, IndicatorSnapshot};
use crate::models::Signal;
use crate::Result;

/// Confidence a disagreeing refiner must exceed to replace the base signal
pub const OVERRIDE_CONFIDENCE: f64 = 0.75;

/// Columns fed to the classifier, in order
pub const FEATURE_COLUMNS: [&str; 5] = [
    columns::RSI,
    columns::MACD,
    columns::ATR,
    columns::BB_WIDTH,
    columns::OBV,
];

/// Which refiner the engines are built with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinerKind {
    #[default]
    None,
    RuleBased,
}

pub trait SignalRefiner: Send + Sync {
    fn name(&self) -> &str;

    /// Refined label and its confidence in `[0, 1]`
    fn analyze(&self, snapshot: &IndicatorSnapshot, base: Signal, price: f64) -> (Signal, f64);

    /// Rebuild internal state from history; a no-op for stateless refiners
    fn retrain(&self, history: &IndicatorSnapshot) -> Result<()>;
}

/// Returns the refined signal the engine should act on
pub fn apply_refinement(base: Signal, refined: Signal, confidence: f64) -> Signal {
    if refined != base && confidence > OVERRIDE_CONFIDENCE {
        refined
    } else {
        base
    }
}

/// Builds the configured refiner, if any
pub fn build_refiner(kind: RefinerKind) -> Option<Arc<dyn SignalRefiner>> {
    match kind {
        RefinerKind::None => None,
        RefinerKind::RuleBased => Some(Arc::new(RuleBasedRefiner::default())),
    }
}

/// Confirms buys taken in deeply oversold conditions
#[derive(Debug, Clone)]
pub struct RuleBasedRefiner {
    pub oversold: f64,
}

impl Default for RuleBasedRefiner {
    fn default() -> Self {
        Self { oversold: 30.0 }
    }
}

impl SignalRefiner for RuleBasedRefiner {
    fn name(&self) -> &str {
        "rule_based"
    }

    fn analyze(&self, snapshot: &IndicatorSnapshot, base: Signal, _price: f64) -> (Signal, f64) {
        let rsi = snapshot
            .len()
            .checked_sub(1)
            .and_then(|last| snapshot.value(columns::RSI, last));

        match rsi {
            Some(rsi) if base == Signal::Buy && rsi < self.oversold => (Signal::Buy, 0.9),
            _ => (base, 0.5),
        }
    }

    fn retrain(&self, _history: &IndicatorSnapshot) -> Result<()> {
        Ok(())
    }
}

/// Rows of features with a binary "next close was higher" target
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    pub features: Vec<Vec<f64>>,
    pub targets: Vec<bool>,
}

impl Dataset {
    /// Every row where all features and the next close are defined
    pub fn from_snapshot(snapshot: &IndicatorSnapshot, names: &[&str]) -> Self {
        let mut dataset = Self::default();
        for i in 0..snapshot.len().saturating_sub(1) {
            let row: Option<Vec<f64>> = names.iter().map(|n| snapshot.value(n, i)).collect();
            let (Some(row), Some(close), Some(next)) = (
                row,
                snapshot.value(columns::CLOSE, i),
                snapshot.value(columns::CLOSE, i + 1),
            ) else {
                continue;
            };
            dataset.features.push(row);
            dataset.targets.push(next > close);
        }
        dataset
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// External up/down model
pub trait Classifier: Send + Sync {
    /// Probability that the next close is higher
    fn predict_up(&self, features: &[f64]) -> Option<f64>;

    fn fit(&mut self, dataset: &Dataset) -> Result<()>;
}

/// Minimum labelled rows before a retrain is attempted
const MIN_TRAINING_ROWS: usize = 100;

/// Wraps a [`Classifier`]: "up" maps to buy, "down" to sell
pub struct ClassifierRefiner {
    model: RwLock<Box<dyn Classifier>>,
    features: Vec<&'static str>,
}

impl ClassifierRefiner {
    pub fn new(model: Box<dyn Classifier>) -> Self {
        Self {
            model: RwLock::new(model),
            features: FEATURE_COLUMNS.to_vec(),
        }
    }

    pub fn with_features(mut self, features: Vec<&'static str>) -> Self {
        self.features = features;
        self
    }
}

impl SignalRefiner for ClassifierRefiner {
    fn name(&self) -> &str {
        "classifier"
    }

    fn analyze(&self, snapshot: &IndicatorSnapshot, base: Signal, _price: f64) -> (Signal, f64) {
        let Some(features) = snapshot.features(&self.features) else {
            tracing::debug!("Classifier features unavailable, keeping base signal");
            return (base, 0.5);
        };

        match self.model.read().predict_up(&features) {
            Some(p_up) if p_up >= 0.5 => (Signal::Buy, p_up),
            Some(p_up) => (Signal::Sell, 1.0 - p_up),
            None => (base, 0.5),
        }
    }

    fn retrain(&self, history: &IndicatorSnapshot) -> Result<()> {
        let dataset = Dataset::from_snapshot(history, &self.features);
        if dataset.len() < MIN_TRAINING_ROWS {
            tracing::warn!(rows = dataset.len(), "⚠️  Not enough data to retrain classifier");
            return Ok(());
        }

        self.model.write().fit(&dataset)?;
        tracing::info!(rows = dataset.len(), "🧠 Classifier retrained");
        Ok(())
    }
}
