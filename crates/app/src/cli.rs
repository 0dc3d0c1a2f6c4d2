use std::path::PathBuf;

use clap::{ArgGroup, Args, Parser, Subcommand};
use tracing::info;

use storefront_storage::Database;
use storefront_util::{AppConfig, NotifierConfig};

use crate::bootstrap::{self, SiteBootstrap};
use crate::notify;

#[derive(Parser, Debug)]
#[command(
    name = "storefront",
    about = "Administer storefront sites, partners and site configurations",
    version
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending database migrations
    Migrate,
    /// Create sites, themes, partners and site configurations for a sandbox
    CreateSitesAndPartners(CreateSitesArgs),
    /// Log every partner, site, theme and site configuration
    PrintAll,
    /// Delete every partner, site, theme and site configuration
    DeleteAll,
    /// Enable or disable marketing notifications for a partner
    PartnerSailthru(PartnerSailthruArgs),
    /// Replay a basket or checkout event from a JSON file through the marketing notifier
    Notify(NotifyArgs),
}

#[derive(Args, Debug)]
struct CreateSitesArgs {
    /// DNS name substituted for `{dns_name}` in sandbox configuration files
    #[arg(long)]
    dns_name: String,
    /// Directory scanned for sandbox_configuration.json files
    #[arg(long)]
    theme_path: PathBuf,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("switch").required(true).args(["enable", "disable"])))]
struct PartnerSailthruArgs {
    /// Partner short code
    #[arg(long)]
    short_code: String,
    #[arg(long)]
    enable: bool,
    #[arg(long)]
    disable: bool,
}

#[derive(Args, Debug)]
struct NotifyArgs {
    /// JSON file holding one lifecycle event tagged by `type`
    #[arg(long)]
    event: PathBuf,
}

pub(crate) async fn run(cli: Cli, config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let database = Database::connect(&config.database_url).await?;
    database.run_migrations().await?;

    match cli.command {
        Command::Migrate => {
            info!(stage = "app", database_url = %config.database_url, "migrations applied");
        }
        Command::CreateSitesAndPartners(args) => {
            SiteBootstrap::new(database)
                .run(&args.dns_name, &args.theme_path)
                .await?;
        }
        Command::PrintAll => bootstrap::print_all(&database).await?,
        Command::DeleteAll => {
            let deleted = database.delete_tenancy().await?;
            info!(
                stage = "bootstrap",
                sites = deleted.sites,
                site_themes = deleted.site_themes,
                partners = deleted.partners,
                site_configurations = deleted.site_configurations,
                "tenancy rows deleted"
            );
            bootstrap::print_all(&database).await?;
        }
        Command::PartnerSailthru(args) => {
            let partner = database
                .partners()
                .set_sailthru_enabled(&args.short_code, args.enable && !args.disable)
                .await?;
            info!(
                stage = "app",
                partner = %partner.short_code,
                enable_sailthru = partner.enable_sailthru,
                "partner updated"
            );
        }
        Command::Notify(args) => {
            let notifier_config = NotifierConfig::from_env()?;
            notify::run(notifier_config, database, &args.event).await?;
        }
    }

    Ok(())
}
