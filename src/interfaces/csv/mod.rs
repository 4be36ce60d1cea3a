//! CSV adapters for the command-line driver.

pub mod collection_writer;
pub mod command_reader;
pub mod seed_reader;
