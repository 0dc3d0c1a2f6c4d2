use std::{
    fs, io,
    path::{Path, PathBuf},
};

use metrics::counter;
use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use storefront_core::descriptor::{
    DescriptorError, DescriptorParser, DescriptorSet, SiteDescriptor, SANDBOX_CONFIGURATION_FILE,
};
use storefront_storage::{Database, GetOrCreate, TenancyError};

/// Errors that abort the bootstrap command.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("invalid descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        source: DescriptorError,
    },
    #[error("failed to create tenancy records: {0}")]
    Tenancy(#[from] TenancyError),
}

/// Counts of rows created or found per record kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootstrapSummary {
    pub descriptors: usize,
    pub created: RecordCounts,
    pub existing: RecordCounts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub sites: usize,
    pub site_themes: usize,
    pub partners: usize,
    pub site_configurations: usize,
}

impl BootstrapSummary {
    fn tally<T>(&mut self, kind: &'static str, result: &GetOrCreate<T>) {
        let counts = if result.created {
            &mut self.created
        } else {
            &mut self.existing
        };
        match kind {
            "site" => counts.sites += 1,
            "site_theme" => counts.site_themes += 1,
            "partner" => counts.partners += 1,
            _ => counts.site_configurations += 1,
        }
        counter!("bootstrap_records_total", "kind" => kind, "outcome" => result.outcome_str())
            .increment(1);
    }
}

/// Creates sites, themes, partners and site configurations from sandbox descriptors.
pub struct SiteBootstrap {
    database: Database,
}

impl SiteBootstrap {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn run(
        &self,
        dns_name: &str,
        theme_path: &Path,
    ) -> Result<BootstrapSummary, BootstrapError> {
        info!(stage = "bootstrap", dns_name, "DNS name: '{dns_name}'");
        info!(
            stage = "bootstrap",
            theme_path = %theme_path.display(),
            "Theme path: '{}'",
            theme_path.display()
        );

        let descriptors = load_descriptors(dns_name, theme_path)?;
        let mut summary = BootstrapSummary {
            descriptors: descriptors.len(),
            ..BootstrapSummary::default()
        };

        for descriptor in descriptors.iter() {
            info!(
                stage = "bootstrap",
                partner = %descriptor.partner_code,
                "Creating '{}' Site",
                descriptor.partner_code
            );
            self.create_site(descriptor, &mut summary).await?;
        }

        info!(
            stage = "bootstrap",
            descriptors = summary.descriptors,
            sites_created = summary.created.sites,
            partners_created = summary.created.partners,
            site_configurations_created = summary.created.site_configurations,
            "bootstrap completed"
        );
        Ok(summary)
    }

    async fn create_site(
        &self,
        descriptor: &SiteDescriptor,
        summary: &mut BootstrapSummary,
    ) -> Result<(), BootstrapError> {
        let site_domain = descriptor.site_domain.as_str();

        let site = self
            .database
            .sites()
            .get_or_create(site_domain, &descriptor.theme_dir_name)
            .await?;
        summary.tally("site", &site);

        info!(stage = "bootstrap", site_domain, "Creating '{site_domain}' SiteTheme");
        let theme = self
            .database
            .site_themes()
            .get_or_create(site.record.id, &descriptor.theme_dir_name)
            .await?;
        summary.tally("site_theme", &theme);

        info!(stage = "bootstrap", site_domain, "Creating '{site_domain}' Partner");
        let partner = self
            .database
            .partners()
            .get_or_create(&descriptor.partner_code, &descriptor.partner_code)
            .await?;
        summary.tally("partner", &partner);

        info!(
            stage = "bootstrap",
            site_domain, "Creating '{site_domain}' SiteConfiguration"
        );
        let configuration = self
            .database
            .site_configurations()
            .get_or_create(site.record.id, partner.record.id, &descriptor.configuration)
            .await?;
        summary.tally("site_configuration", &configuration);

        Ok(())
    }
}

/// Returns every sandbox configuration file below `root`, in a stable order.
///
/// Directory symlinks are not descended into. Unreadable entries are logged
/// and skipped.
pub fn find_configuration_files(root: &Path) -> Vec<PathBuf> {
    if !root.exists() {
        warn!(stage = "bootstrap", theme_path = %root.display(), "theme path does not exist");
        return Vec::new();
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(stage = "bootstrap", error = %err, "skipping unreadable theme entry");
                continue;
            }
        };
        if entry.file_name() == SANDBOX_CONFIGURATION_FILE && entry.path().is_file() {
            files.push(entry.into_path());
        }
    }
    files
}

/// Reads and decodes every descriptor below `root`, keyed by partner code.
pub fn load_descriptors(dns_name: &str, root: &Path) -> Result<DescriptorSet, BootstrapError> {
    let mut descriptors = DescriptorSet::new();

    for path in find_configuration_files(root) {
        info!(stage = "bootstrap", file = %path.display(), "Reading file from {}", path.display());
        let raw = fs::read_to_string(&path).map_err(|source| BootstrapError::Read {
            path: path.clone(),
            source,
        })?;
        let descriptor = DescriptorParser::parse(&raw, dns_name)
            .map_err(|source| BootstrapError::Descriptor {
                path: path.clone(),
                source,
            })?;

        if let Some(replaced) = descriptors.insert(descriptor) {
            warn!(
                stage = "bootstrap",
                partner = %replaced.partner_code,
                replaced_domain = %replaced.site_domain,
                file = %path.display(),
                "partner code seen in an earlier file; keeping the later descriptor"
            );
        }
    }

    Ok(descriptors)
}

/// Logs every tenancy row.
pub async fn print_all(database: &Database) -> Result<(), TenancyError> {
    info!(stage = "bootstrap", "------------------PARTNERS------------------");
    for partner in database.partners().list_all().await? {
        info!(stage = "bootstrap", ?partner);
    }

    info!(stage = "bootstrap", "------------------SITES------------------");
    for site in database.sites().list_all().await? {
        info!(stage = "bootstrap", ?site);
    }

    info!(stage = "bootstrap", "------------------SITES THEMES------------------");
    for theme in database.site_themes().list_all().await? {
        info!(stage = "bootstrap", ?theme);
    }

    info!(stage = "bootstrap", "------------------CONFIG------------------");
    for configuration in database.site_configurations().list_all().await? {
        info!(stage = "bootstrap", ?configuration);
    }

    Ok(())
}
