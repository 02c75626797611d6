//! Chain storage implementations

mod in_memory;
mod seed;

pub use in_memory::{
    InMemoryChainRepository, InMemoryTargetTextRepository, InMemoryTemplateRepository,
};
pub use seed::{SeedData, SeedTarget};
