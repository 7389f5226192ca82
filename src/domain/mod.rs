//! Camada de domínio: entidades da frota, value objects (tags, acessos,
//! ciclos de vida), taxonomia de erros e contratos de repositório.

pub mod entities;
pub mod errors;
pub mod repositories;
pub mod value_objects;
