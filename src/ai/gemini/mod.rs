pub mod client;
pub mod files;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::GeminiDirectClient;
pub use files::GeminiFilesClient;
