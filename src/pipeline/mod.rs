pub mod encoder;
#[cfg(feature = "facial-recognition")]
pub mod face;
pub mod image;
pub mod matcher;
