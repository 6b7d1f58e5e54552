pub mod clock;
pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;

pub use error::{EntitlementError, Result};
pub use startup::{build_router, AppState, Application};
