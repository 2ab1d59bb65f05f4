pub mod health;
pub mod poller;
pub mod round_tracker;

pub use health::HealthMonitor;
pub use poller::RoundPoller;
