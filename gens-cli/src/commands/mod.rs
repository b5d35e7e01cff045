//! Command implementations for the Gens CLI

pub mod load;
pub mod query;
pub mod replay;
