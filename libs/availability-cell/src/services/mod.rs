pub mod exceptions;
pub mod patterns;
pub mod slots;
