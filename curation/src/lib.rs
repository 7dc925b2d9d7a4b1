pub mod assembler;
pub mod blocks;
pub mod classifier;
pub mod compare;
pub mod config;
pub mod dedup;
pub mod error;
pub mod jsonl;
pub mod linker;
pub mod pairer;
pub mod parse;
pub mod pipeline;
pub mod redact;
pub mod sanitiser;
pub mod tabular;
pub mod tone;
pub mod transcript;

pub use config::CurationConfig;
pub use error::CurationError;
