pub mod entities;
pub mod messages;
pub mod task_config;

pub use entities::*;
pub use messages::*;
pub use task_config::*;
