mod listen;

pub use listen::{ListenArgs, run_listen};
