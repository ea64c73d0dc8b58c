mod chain_source;
mod repository;

pub use chain_source::*;
pub use repository::*;
