use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bazaar-server", about = "Bazaar buyer/seller chat relay")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/bazaar.toml")]
    pub config: String,

    /// Listen address (overrides config and environment)
    #[arg(long)]
    pub bind: Option<String>,
}
