pub mod aggregator;
pub mod clock;
pub mod history;
pub mod insight;
pub mod metrics;
pub mod prediction_engine;
pub mod predictor;
pub mod rules;
pub mod telemetry;
pub mod weather;
