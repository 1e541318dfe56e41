pub mod broadcaster;
pub mod bus;
pub mod events;
pub mod sse_handler;
pub mod types;
pub mod ws_handler;

pub use broadcaster::Broadcaster;
pub use bus::EventBus;
