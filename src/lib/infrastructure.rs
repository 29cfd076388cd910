//! Infrastructure adapters

pub mod cli;
pub mod email;
