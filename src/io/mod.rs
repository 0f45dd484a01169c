pub mod convert;
pub mod crypto;
pub mod paths;
pub mod progress;
pub mod settings;
