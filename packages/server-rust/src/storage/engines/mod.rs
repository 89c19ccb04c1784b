pub mod memory;

pub use memory::MemoryEntityStore;
