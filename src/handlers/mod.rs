//! Command Handlers module
//!
//! CQRS command side: validate input, replay the account, decide the next
//! event and append it.

mod commands;
mod processor;


pub use commands::*;
pub use processor::CommandProcessor;
