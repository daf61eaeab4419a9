//! ABOUTME: Repository modules providing job and event persistence operations

pub mod events;
pub mod jobs;
