pub mod client;
pub mod json;
#[cfg(test)]
pub(crate) mod mock;
pub mod openai;
pub mod prompts;
pub mod structured;
pub mod validation;

pub use client::*;
pub use json::*;
pub use openai::*;
pub use prompts::*;
pub use structured::*;
