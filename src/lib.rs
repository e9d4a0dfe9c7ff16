//! Follow-event drain job for Knitted.
//!
//! Pops profile events from the hosted queue, applies each follow/unfollow
//! through the backend's state-transition procedure and archives it.

pub mod backend;
pub mod config;
pub mod drain;
pub mod model;
pub mod trigger;
