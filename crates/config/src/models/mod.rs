pub mod app_config;
pub mod environment;
pub mod logging;
pub mod sync;
pub mod worker_channel;

pub use app_config::*;
pub use environment::*;
pub use logging::*;
pub use sync::*;
pub use worker_channel::*;
