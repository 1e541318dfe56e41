pub mod connection_repository;
pub mod markers;
pub mod presence_handlers;
pub mod presence_models;
pub mod registry;
pub mod sweeper;

pub use markers::PresenceMarkers;
pub use registry::ConnectionRegistry;
pub use sweeper::start_sweeper;
