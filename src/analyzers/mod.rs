//! Grid-cell analyses over featured pings.
//!
//! Each submodule computes one table; [`analyzer`] runs them in order and
//! writes the results.

pub mod aggregate;
pub mod analyzer;
pub mod desert;
pub mod integrity;
pub mod segment;
pub mod types;
pub mod utility;
pub mod zones;
