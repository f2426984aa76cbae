/// Assessway: assessment workflow engine
///
/// This library drives maturity assessments through review and approval:
/// a guarded lifecycle state machine, append-only version history, review
/// rounds, threaded axis comments, viewer presence and an activity feed.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every component
pub mod error;

// Identity, role permissions and reviewer resolution
pub mod access;

// Workflow layer - types, state machine, versions, reviews and comments
pub mod workflow;

// Storage backends (in-memory and SQLite)
pub mod storage;

// Presence and activity feed
pub mod collab;

// AI advisory collaborator
pub mod advisory;

// Single entry point for every verb
pub mod facade;

// Background jobs
pub mod runtime;

// HTTP API layer - REST endpoints over the facade
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use access::Actor;
pub use error::{EngineError, Failure};
pub use facade::WorkflowFacade;
pub use server::start_server;
pub use workflow::{AssessmentWorkflow, WorkflowState, WorkflowSummary};
