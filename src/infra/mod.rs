//! =============================================================================
//! INFRASTRUCTURE MODULE
//! =============================================================================
//! Módulo de infraestrutura para integração com serviços externos
//! Inclui PostgreSQL, Vault (secrets) e OpenFGA (relation store)

pub mod openfga;
pub mod pg;
pub mod vault;

pub use openfga::*;
pub use pg::*;
pub use vault::*;
