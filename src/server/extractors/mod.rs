mod client_extractor;
mod validation_extractor;

pub use client_extractor::*;
pub use validation_extractor::*;
