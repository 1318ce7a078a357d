pub mod errors;
pub mod ports;
pub mod risk;
pub mod types;
