/// Real-time collaboration
///
/// Volatile presence tracking and the cursor-paged activity feed with its
/// notify channel for long-polling readers.

// In-memory heartbeat tracking with a liveness window
pub mod presence;

// Cursor-paged activity feed plus change notices
pub mod activity;

pub use activity::{ActivityFeed, ActivityNotice, ActivityPage, MAX_PAGE_SIZE};
pub use presence::{PresenceEntry, PresenceTracker};
