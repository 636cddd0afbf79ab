pub mod handlers;
pub mod server;
pub mod volume_loop;

pub use server::{serve, serve_with};
