//! Shared foundation for the tremor renderer: vector/plane/matrix math,
//! the entity-text tokenizer, and the on-disk BSP record layer.

pub mod bspfile;
pub mod math;
pub mod tokenize;
