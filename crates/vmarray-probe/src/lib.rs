//! vmarray-probe library: measures reserved vs. resident memory of a
//! `VirtualArray` on the running OS.

pub mod app;
pub mod completion;
pub mod config;
pub mod errors;
pub mod metrics;
pub mod output;
pub mod report;
