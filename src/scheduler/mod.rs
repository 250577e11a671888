pub mod lease;

pub use lease::{Lease, LeaseOutcome, LeaseScheduler, DEFAULT_LEASE_MINUTES};
