use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[value(alias = "google")]
    Gemini,
    #[value(alias = "openai")]
    OpenAI,
    Anthropic,
    Ollama,
}

#[derive(Parser, Debug)]
#[command(name = "vibe_sitegen", version, about = "Prompt-to-static-site generator with optional GitHub Pages publishing")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// TOML or YAML config file
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[arg(long, value_enum, global = true)]
    pub provider: Option<ProviderKind>,

    #[arg(long, global = true)]
    pub model: Option<String>,

    #[arg(long, global = true)]
    pub projects_root: Option<String>,

    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Keep each stage's instruction and raw reply under .vibe/tx
    #[arg(long, default_value_t = false, global = true)]
    pub save_responses: bool,

    #[arg(long, default_value_t = false, global = true)]
    pub debug: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the pipeline once and print the result
    Generate(GenerateArgs),
    /// Serve the HTTP front end
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug)]
pub struct GenerateArgs {
    #[arg(long)]
    pub prompt: String,

    #[arg(long)]
    pub image: Option<String>,

    #[arg(long)]
    pub project_name: Option<String>,

    #[arg(long, default_value_t = false)]
    pub deploy: bool,

    #[arg(long)]
    pub github_username: Option<String>,

    #[arg(long)]
    pub repo_name: Option<String>,

    /// Print the result record as JSON instead of the dashboard
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[arg(long, default_value_t = true)]
    pub progress: bool,
}

#[derive(ClapArgs, Debug)]
pub struct ServeArgs {
    #[arg(long)]
    pub bind: Option<String>,
}
