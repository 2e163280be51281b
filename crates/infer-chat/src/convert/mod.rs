//! Conversion between canonical types and remote wire formats

pub mod openai;
