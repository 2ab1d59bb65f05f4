pub mod aggregate;
pub mod aggregator;
pub mod hourly;
pub mod median;
pub mod oracle_timing;

pub use aggregate::{averages, AggregateStats, Averages, Stat};
pub use aggregator::StatsAggregator;
