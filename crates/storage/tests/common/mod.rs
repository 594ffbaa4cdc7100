pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{seeded_bytes, split_chunks};
