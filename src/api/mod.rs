//! HTTP surface: the cold staking controller and wallet queries.

pub mod handlers;
pub mod server;
pub mod types;

pub use handlers::AppState;
pub use server::{router, start_server};
