// Application layer - use cases and orchestration

pub mod error;
pub mod locks;
pub mod reporting;
pub mod service;

pub use error::*;
pub use locks::*;
pub use reporting::*;
pub use service::*;
