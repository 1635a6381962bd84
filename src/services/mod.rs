pub mod extractor;
pub mod filtering;
