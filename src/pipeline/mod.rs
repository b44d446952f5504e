//! The proposal pipeline
//!
//! - Mirror: one synchronized local working copy of the remote tree
//! - Generator: reviewer cycles turning mirror files into proposals
//! - Gate: verification of approved proposals against the mirror
//! - Publisher: commits verified changes and opens change requests
//! - Scheduler: the timers driving all of the above

pub mod gate;
pub mod generator;
pub mod mirror;
pub mod publisher;
pub mod scheduler;
