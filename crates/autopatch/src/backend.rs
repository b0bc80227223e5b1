pub mod memory;
pub mod pipewire;

pub use memory::MemoryGraph;
pub use pipewire::PipeWireGraph;
