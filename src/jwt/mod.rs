//! JWKS key lifecycle and JWT minting for downstream controllers.

pub mod jwks;
pub mod mint;

pub use jwks::JwksService;
pub use mint::JwtService;
