pub mod repository;
pub mod sbom_document;
pub mod types;
