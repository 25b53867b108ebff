mod assemble;
mod capture;

pub use assemble::{run_assemble, AssembleArgs};
pub use capture::run_capture;
