pub mod classifier;
pub mod persistence;

pub use classifier::{ClassifierConfig, RegimeClassifier};
pub use persistence::{ConfirmedRegimeState, PersistenceConfig, PersistenceFilter, TransitionEvent};
