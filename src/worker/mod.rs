pub mod buffer;
pub mod capture;
