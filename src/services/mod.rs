//! Orchestration services built over the storage planes.

pub mod approval;
pub mod captain;
pub mod event_bus;
pub mod lifecycle;
pub mod presence;
pub mod review_board;
pub mod state_store;

pub use approval::ApprovalEngine;
pub use captain::{AgentSignal, CaptainBridge};
pub use event_bus::{EventBus, EventBusStats, EventSubscription, DEFAULT_BUFFER};
pub use lifecycle::LifecycleCoordinator;
pub use presence::{CleanupReport, PresenceMonitor};
pub use review_board::{ConsensusOutcome, ReviewBoardService};
pub use state_store::StateStore;
