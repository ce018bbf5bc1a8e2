pub mod currency;
pub mod phone;
pub mod pii;
pub mod token;
