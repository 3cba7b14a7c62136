mod reader;
mod throttle;
mod writer;

pub use reader::*;
pub use writer::*;
