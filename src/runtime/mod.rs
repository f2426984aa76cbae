/// Background Runtime Services
///
/// Long-running jobs that run beside the request handlers:
/// - Cron-scheduled eviction of stale presence entries

// Presence eviction on tokio-cron-scheduler
pub mod sweeper;

pub use sweeper::PresenceSweeper;
