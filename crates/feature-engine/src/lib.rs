pub mod analyzer;
pub mod indicators;

pub use analyzer::*;
pub use indicators::*;
