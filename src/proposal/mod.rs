//! Proposal domain: data models and the authoritative store.

pub mod models;
pub mod store;

pub use models::{
    AuditEntry, Proposal, ProposalStatus, ProposalSummary, TestStatus, TransitionMetadata,
};
pub use store::ProposalStore;
