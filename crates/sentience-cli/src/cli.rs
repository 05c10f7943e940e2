use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sentience", version, about = "Agent verification runtime demo CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted verification flow against the in-memory mock driver.
    Demo {
        /// Goal recorded on the single demo step.
        #[arg(long, default_value = "sign in and reach the dashboard")]
        goal: String,
    },
    /// List the tools registered in the demo tool registry.
    Tools,
}

#[derive(Clone, Debug, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
