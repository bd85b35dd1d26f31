pub mod dataset;
pub mod errors;

pub use dataset::*;
pub use errors::*;
