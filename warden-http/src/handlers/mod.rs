use std::sync::Arc;
use warden::volume::SharedProtection;
use warden::Dispatcher;

pub mod bindings;
pub mod health;

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub protection: Option<SharedProtection>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher, protection: Option<SharedProtection>) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            protection,
            start_time: std::time::Instant::now(),
        }
    }
}

pub use bindings::invoke_binding;
pub use health::health;
