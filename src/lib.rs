//! Merges GTFS-realtime feeds from several publishers into one consistent,
//! versioned view of what is true right now.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gtfs;
pub mod maintenance;
pub mod source;
pub mod state;

#[cfg(test)]
mod test_utils;
