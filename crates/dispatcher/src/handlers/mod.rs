//! Intent handlers

mod replay;
mod write;

pub use replay::handle_replay;
pub use write::handle_write;
