pub mod codec;
pub mod loader;
pub mod source;
