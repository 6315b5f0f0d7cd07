//! Repository traits for metadata operations.

pub mod fulfillments;
pub mod leads;
pub mod sweeps;

pub use fulfillments::FulfillmentRepo;
pub use leads::LeadRepo;
pub use sweeps::{SweepJobState, SweepRepo};
