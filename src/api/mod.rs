/// HTTP API Layer
///
/// This module exposes every facade verb over REST. It handles:
/// - Actor extraction from gateway headers
/// - Workflow lifecycle, version and review endpoints
/// - Comments, presence, activity and advisory endpoints
/// - Role table administration

// Actor extraction from request headers
pub mod extract;

// Engine failure → HTTP response mapping
pub mod error;

// Lifecycle, version and review endpoints
pub mod workflows;

// Comments, presence, activity and advice
pub mod collaboration;

// Role table administration
pub mod admin;

// Re-export router builders
pub use admin::create_admin_routes;
pub use collaboration::create_collaboration_routes;
pub use error::ApiError;
pub use workflows::{create_workflow_routes, AppState};
