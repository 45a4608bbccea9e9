pub mod services;
pub mod set;
