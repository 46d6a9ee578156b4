use authzd::{server, settings};
use clap::Parser;
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "authzd",
    version,
    about = "Authorization policy decision point"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Load and validate the policy directory, print a summary and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    if cli.check {
        let check = server::check_policies(&settings)?;
        println!(
            "{}: {} roles, {} bindings ({} system, {} dangling)",
            settings.authz.policies_dir.display(),
            check.roles,
            check.mappings,
            check.system_mappings,
            check.dangling_mappings
        );
        return Ok(());
    }

    server::serve(settings).await?;
    Ok(())
}
