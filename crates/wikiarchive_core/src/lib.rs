pub mod archive;
pub mod config;
pub mod discovery;
pub mod error;
pub mod harvest;
pub mod manifest;
pub mod naming;
pub mod pacing;
pub mod paginate;
pub mod transport;
pub mod worklist;

#[cfg(test)]
mod testing;
