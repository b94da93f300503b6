pub mod analysis;
pub mod generation;
pub mod lifecycle;
