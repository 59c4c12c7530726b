mod buffer;
mod reconcile;

pub use buffer::{LayerSnapshot, PlayerInputRecord, PredictedInput, PredictionBuffer, WeaponState};
pub use reconcile::{ReconcileConfig, ReconciliationReport, Reconciler};
