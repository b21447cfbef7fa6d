pub mod config;
mod io;
pub mod job;
pub mod outside;
pub mod queue;
pub mod result;
#[cfg(test)]
mod testing;
pub mod types;
mod utils;
pub mod workers;
