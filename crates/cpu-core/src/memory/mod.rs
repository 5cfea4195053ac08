//! Guest physical memory model: the RAM extent, read-only ROM regions,
//! A20 masking and the code-translation cache.

/// Page-granular cache of translated code.
pub mod code_cache;
/// RAM/ROM region map and routed accessors.
pub mod map;

pub use code_cache::{page_base, CodeCache, PAGE_SHIFT, PAGE_SIZE};
pub use map::{
    MemoryError, PhysMemory, RomRegion, A20_BIT, OPEN_BUS, PHYS_ADDRESS_SPACE_BYTES,
};
