pub mod chain;
pub mod model;
pub mod prompt;

pub use chain::ParserChain;
pub use model::QueryExplainer;
