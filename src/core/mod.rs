pub mod cancel;
pub mod duplicate;
pub mod hash;
pub mod image;
pub mod models;
pub mod perceptual;
pub mod union_find;
