pub mod claude;
pub mod config;
pub mod errors;
pub mod events;
pub mod foundry;
pub mod orchestrator;
pub mod registry;
pub mod sandbox;
pub mod scaffold;
pub mod server;
pub mod stream;
pub mod tools;

pub use foundry::Foundry;
