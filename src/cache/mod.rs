pub mod examples;
pub mod store;
pub mod types;

pub use examples::ExampleStore;
pub use store::{is_reserved_key, write_atomic, ParseCache};
pub use types::{ExampleEntry, ParseRecord, ParseSource, RenamePlanEntry, TableRow};
