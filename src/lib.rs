pub mod admission;
pub mod config;
pub mod driver;
pub mod error;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pool;
pub mod scheduler;
pub mod signal;

pub use error::CoreError;
