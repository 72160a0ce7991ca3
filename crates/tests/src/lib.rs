//! End-to-end suite for the host↔sandbox command channel.

pub mod harness;

#[cfg(test)]
mod scenarios;
