use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// File name the bootstrap command looks for under the theme directory.
pub const SANDBOX_CONFIGURATION_FILE: &str = "sandbox_configuration.json";

/// Token replaced with the sandbox DNS name before a descriptor is parsed.
pub const DNS_NAME_PLACEHOLDER: &str = "{dns_name}";

const DESCRIPTOR_KEY: &str = "ecommerce_configuration";

/// Errors raised while decoding a site descriptor file.
#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("failed to parse descriptor json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("descriptor root must be a json object")]
    NotAnObject,
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("field '{0}' must be a string")]
    NotAString(&'static str),
    #[error("field 'configuration' must be a json object")]
    InvalidConfiguration,
}

/// One tenant to bootstrap: site, theme, partner and site configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteDescriptor {
    pub partner_code: String,
    pub site_domain: String,
    pub theme_dir_name: String,
    pub configuration: SiteConfigurationDefaults,
}

/// Values used when a site configuration has to be created.
///
/// Keys without a dedicated column are kept in `extra` and persisted as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteConfigurationDefaults {
    #[serde(default)]
    pub lms_url_root: Option<String>,
    #[serde(default)]
    pub theme_scss_path: Option<String>,
    #[serde(default)]
    pub payment_processors: Option<String>,
    #[serde(default)]
    pub from_email: Option<String>,
    #[serde(default)]
    pub segment_key: Option<String>,
    #[serde(default)]
    pub oauth_settings: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decodes descriptor files after placeholder substitution.
pub struct DescriptorParser;

impl DescriptorParser {
    /// Replaces every `{dns_name}` token in `raw` and decodes the descriptor.
    pub fn parse(raw: &str, dns_name: &str) -> Result<SiteDescriptor, DescriptorError> {
        let substituted = raw.replace(DNS_NAME_PLACEHOLDER, dns_name);
        let document: Value = serde_json::from_str(&substituted)?;
        let root = document.as_object().ok_or(DescriptorError::NotAnObject)?;
        let block = root
            .get(DESCRIPTOR_KEY)
            .ok_or(DescriptorError::MissingField(DESCRIPTOR_KEY))?;

        let configuration = block
            .get("configuration")
            .ok_or(DescriptorError::MissingField("configuration"))?;
        if !configuration.is_object() {
            return Err(DescriptorError::InvalidConfiguration);
        }
        let configuration: SiteConfigurationDefaults =
            serde_json::from_value(configuration.clone())?;

        Ok(SiteDescriptor {
            partner_code: string_field(block, "site_partner")?,
            site_domain: string_field(block, "site_domain")?,
            theme_dir_name: string_field(block, "theme_dir_name")?,
            configuration,
        })
    }
}

fn string_field(block: &Value, field: &'static str) -> Result<String, DescriptorError> {
    block
        .get(field)
        .ok_or(DescriptorError::MissingField(field))?
        .as_str()
        .map(str::to_string)
        .ok_or(DescriptorError::NotAString(field))
}

/// Descriptors keyed by partner short code.
///
/// Inserting a descriptor whose partner code is already present replaces
/// the earlier one in place, so iteration keeps first-seen order.
#[derive(Debug, Default)]
pub struct DescriptorSet {
    entries: Vec<SiteDescriptor>,
}

impl DescriptorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a descriptor, returning the one it replaced.
    pub fn insert(&mut self, descriptor: SiteDescriptor) -> Option<SiteDescriptor> {
        match self
            .entries
            .iter_mut()
            .find(|existing| existing.partner_code == descriptor.partner_code)
        {
            Some(existing) => Some(std::mem::replace(existing, descriptor)),
            None => {
                self.entries.push(descriptor);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SiteDescriptor> {
        self.entries.iter()
    }
}
