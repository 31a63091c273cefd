pub mod status;
pub mod stream;
