// Integration tests for Unibox
// Each module drives the crate through its public API against in-memory fakes.

pub mod common;
pub mod sync_engine;
pub mod send_pipeline;
pub mod tracking_beacons;
pub mod timeline;
pub mod api;
