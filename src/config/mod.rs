pub mod retry;
pub mod settings;

#[derive(Debug)]
pub enum ConfigError {
    MissingParameter(String),
    InvalidArgument(String),
}
