pub mod store;
pub mod memory;

pub use memory::InMemoryContextStore;
pub use store::ContextStore;
