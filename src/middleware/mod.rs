pub mod main_middleware;
pub mod rate_limit;

pub use main_middleware::{auth, JWTAuthMiddeware};
pub use rate_limit::*;
