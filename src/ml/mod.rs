pub mod features;
pub mod model;
pub mod persistence;
pub mod predictor;
pub mod registry;
pub mod tracker;

pub use predictor::{ModelReloader, PredictionEngine, PredictionRequest, TradeDecisionRequest};
pub use registry::ModelRegistry;
