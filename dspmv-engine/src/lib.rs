//! The online half of the system: loading a partition file into memory and
//! running the SpMV driver against it.
pub mod driver;
pub mod loader;
