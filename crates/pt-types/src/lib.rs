pub mod costs;
pub mod errors;
pub mod params;
pub mod problem;

pub use costs::*;
pub use errors::*;
pub use params::*;
pub use problem::*;
