// Trading strategy module
pub mod refiner;
pub mod signals;

pub use refiner::{
    apply_refinement, build_refiner, Classifier, ClassifierRefiner, Dataset, RefinerKind,
    RuleBasedRefiner, SignalRefiner, OVERRIDE_CONFIDENCE,
};
pub use signals::{crossover, crossunder, indicator_signal, signal_at};
