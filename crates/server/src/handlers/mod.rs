//! HTTP request handlers.

pub mod audit;
pub mod files;
pub mod health;
pub mod multipart;

pub use audit::*;
pub use files::*;
pub use health::*;
pub use multipart::*;
