// CLI module for polygate

use clap::Parser;

/// polygate - Multi-account AI gateway with cross-protocol request translation
#[derive(Parser, Debug)]
#[command(name = "polygate", version, about, long_about = None)]
pub struct Args {
    /// Run a login flow for a provider (claude, gemini, openai), then start
    /// the server
    #[arg(long, value_name = "PROVIDER")]
    pub login: Option<String>,

    /// Store the given API key for --login instead of running OAuth
    #[arg(long, value_name = "KEY", requires = "login")]
    pub api_key: Option<String>,

    /// Account id for --login (defaults to the provider identity)
    #[arg(long, value_name = "ID", requires = "login")]
    pub account: Option<String>,

    /// Config file path (defaults to ~/.polygate/config.toml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,
}
