pub mod core;
pub mod error;
pub mod indices;
pub mod marker;
pub mod tech;
