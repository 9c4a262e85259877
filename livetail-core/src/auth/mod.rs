pub mod jwt;

pub use jwt::{Claims, JwtService};
