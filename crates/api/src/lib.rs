//! Administrative HTTP surface: job triggers, job state, proposal tallies.

pub mod app;
