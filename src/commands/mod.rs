pub mod check;
pub mod command;
pub mod get_chunk;
pub mod plan;
