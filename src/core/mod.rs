// Core domain layer
pub mod models;
pub mod plugin;
pub mod services;

pub use models::*;
pub use services::*;