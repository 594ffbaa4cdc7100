//! Repository traits for catalog operations.

pub mod audit;
pub mod content;
pub mod links;
pub mod reclaim;

pub use audit::AuditRepo;
pub use content::ContentRepo;
pub use links::LinkRepo;
pub use reclaim::ReclaimRepo;
