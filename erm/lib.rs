#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod config;
pub mod fit;
pub mod losses;
pub mod model;
pub mod regularizers;
pub mod results;
pub mod solvers;
pub mod source;
pub mod split;

// Unsupervised factorization
#[path = "../factor/mod.rs"]
pub mod factor;
