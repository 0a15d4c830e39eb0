//! Concrete embedding providers.

pub mod openai;
pub mod trigram;

pub use openai::OpenAiProvider;
pub use trigram::TrigramProvider;
