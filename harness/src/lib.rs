pub mod cli;
pub mod commands;
pub mod report;
pub mod settings;
pub mod sources;

pub use cli::{BackendArgs, Cli, Commands, CustomArgs, RunArgs};
pub use commands::{CliError, CliResult, RunOutcome};
pub use settings::{Settings, SettingsError};
pub use sources::{InlineSource, KnowledgeSource, QaFileSource, SourceError};
