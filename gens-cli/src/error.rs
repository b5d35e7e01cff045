//! Error handling for the Gens CLI

use gens_core::ApiError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Gens CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Input/Output error: {message}")]
    Io { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Parsing error in {file}: {message}")]
    Parse { file: String, message: String },

    #[error("Unknown sample: {sample_id}")]
    UnknownSample { sample_id: String },

    #[error("Request failed with status {status}: {message}")]
    Request { status: u16, message: String },
}

impl CliError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config { message: message.into() }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    pub fn file_not_found(path: PathBuf) -> Self {
        Self::FileNotFound { path }
    }

    pub fn parse<F: Into<String>, S: Into<String>>(file: F, message: S) -> Self {
        Self::Parse {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn unknown_sample<S: Into<String>>(sample_id: S) -> Self {
        Self::UnknownSample { sample_id: sample_id.into() }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<ApiError> for CliError {
    fn from(err: ApiError) -> Self {
        Self::Request {
            status: err.status,
            message: err.message,
        }
    }
}

/// Provide helpful error messages and suggestions
pub fn format_error_with_suggestions(error: &CliError) -> String {
    let mut message = error.to_string();

    match error {
        CliError::FileNotFound { path } => {
            message.push_str(&format!(
                "\n\nSuggestions:\n\
                 • Check that the file path is correct: {}\n\
                 • Relative paths in gens.toml are resolved against the config file's directory\n\
                 • Compressed track files must end in .gz",
                path.display()
            ));
        }

        CliError::Parse { .. } => {
            message.push_str(
                "\n\nSuggestions:\n\
                 • Track rows are tab-separated: chromosome, start, end, then value or label/type\n\
                 • Header lines must start with '#'\n\
                 • Replay files hold one JSON track request per line",
            );
        }

        CliError::Config { .. } => {
            message.push_str(
                "\n\nSuggestions:\n\
                 • Check your gens.toml configuration file\n\
                 • Use 'gens config --example' to generate a sample configuration\n\
                 • Verify that all configuration values are valid",
            );
        }

        CliError::UnknownSample { .. } => {
            message.push_str(
                "\n\nSuggestions:\n\
                 • Add the sample to the [[samples]] list in gens.toml\n\
                 • Run 'gens load' to list the samples that were loaded",
            );
        }

        CliError::Request { status, .. } => match status {
            400 => message.push_str(
                "\n\nSuggestions:\n\
                 • Check that the region lies within the chromosome (e.g. 1:1000000-2000000)\n\
                 • Verify the genome build in the [general] section",
            ),
            404 => message.push_str(
                "\n\nSuggestions:\n\
                 • Configure a file for this track kind in the sample's [[samples]] entry",
            ),
            422 => message.push_str(
                "\n\nSuggestions:\n\
                 • Use a larger --width\n\
                 • Add resolution levels in the [ladder] section",
            ),
            _ => {}
        },

        _ => {}
    }

    message
}

/// Print error with helpful suggestions and exit
pub fn print_error_and_exit(error: &CliError) -> ! {
    eprintln!("Error: {}", format_error_with_suggestions(error));
    std::process::exit(1);
}
