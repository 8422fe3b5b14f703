//! Upgrade scout
//!
//! Watches a private tracker's search results for releases that improve on
//! titles already in the library (Dolby Vision FEL, Atmos, resolution) and
//! announces them, optionally asking for approval before downloading.

pub mod cli;
pub mod config;
pub mod db;
pub mod indexer;
pub mod jobs;
pub mod services;
pub mod torrent;
