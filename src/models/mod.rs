pub mod filter;
pub mod issue;
pub mod raw;

pub use filter::*;
pub use issue::*;
