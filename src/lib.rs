pub mod buffers;
pub mod chain;
pub mod checkpoint;
pub mod dedup;
pub mod io;
pub mod kernels;
pub mod likelihood;
pub mod model;
pub mod progress;
pub mod scaling;
pub mod stack;

pub use likelihood::{CoreConfig, LikelihoodCore};

#[cfg(not(feature = "single-precision"))]
pub type Real = f64;

#[cfg(feature = "single-precision")]
pub type Real = f32;
