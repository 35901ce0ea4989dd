//! Application layer: subprocess spawning and server composition.

pub mod server;
pub mod spawner;

pub use server::Server;
pub use spawner::{AgentSpawner, SpawnError};
