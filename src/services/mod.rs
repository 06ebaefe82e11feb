pub mod batch;
pub mod cache;
pub mod cnpj;
pub mod extractor;
pub mod memory;
pub mod persistence;
pub mod queue;
pub mod sintegra;
pub mod submission;
pub mod worker;
