//! Health reporting and aggregate counters.

pub mod aggregator;

pub use aggregator::HealthAggregator;
