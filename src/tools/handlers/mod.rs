//! Tool handlers, grouped by concern.

pub mod captain;
pub mod documents;
pub mod lifecycle;
pub mod memory;
pub mod recon;
pub mod review;
pub mod workflow;

use super::ToolRegistry;

/// Register the full tool surface.
pub fn register_all(registry: &mut ToolRegistry) {
    lifecycle::register(registry);
    workflow::register(registry);
    review::register(registry);
    memory::register(registry);
    captain::register(registry);
    documents::register(registry);
    recon::register(registry);
}
