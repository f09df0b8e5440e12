// Configuration management module
// TOML configuration for the embedder, chunking, and retrieval defaults

pub mod settings;


pub use settings::{
    CONFIG_HOME_ENV, Config, ConfigError, EmbedderConfig, EmbedderProvider, RetrievalConfig,
};
