//! Overpass interpreter endpoints.
//!
//! Each endpoint is a TOML file under `services/`, embedded at compile
//! time. The file stem must match the `id` inside the file. Endpoints are
//! parsed once and kept sorted by priority, so [`default_service`] is the
//! first enabled entry of [`all_services`].

use std::sync::LazyLock;

use serde::Deserialize;

/// One configured gateway endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayService {
    /// Unique identifier, equal to the TOML file stem.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Whether this service may be picked without naming it.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower is preferred.
    pub priority: u32,
    pub provider: ProviderConfig,
}

/// Provider-specific configuration, tagged by `type` in TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    /// `OpenStreetMap` Overpass API interpreter endpoint.
    Overpass {
        /// Interpreter URL, ending in `/api/interpreter`.
        base_url: String,
        /// Server-side query timeout in seconds (`[timeout:N]`).
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
        /// Retries for transient failures.
        #[serde(default = "default_max_retries")]
        max_retries: u32,
    },
}

const fn default_enabled() -> bool {
    true
}

const fn default_timeout_secs() -> u64 {
    25
}

const fn default_max_retries() -> u32 {
    3
}

impl GatewayService {
    #[must_use]
    pub fn base_url(&self) -> &str {
        let ProviderConfig::Overpass { base_url, .. } = &self.provider;
        base_url
    }
}

/// Why an embedded endpoint file was rejected.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("File '{file}' declares id '{id}'")]
    IdMismatch { file: String, id: String },
}

/// Parses the endpoint stored in `services/{file}.toml`.
///
/// # Errors
///
/// Returns [`RegistryError`] if the document is malformed or its `id`
/// differs from `file`.
pub fn parse_service(file: &str, toml_str: &str) -> Result<GatewayService, RegistryError> {
    let service: GatewayService = toml::de::from_str(toml_str)?;
    if service.id != file {
        return Err(RegistryError::IdMismatch {
            file: file.to_string(),
            id: service.id,
        });
    }
    Ok(service)
}

const SERVICE_FILES: &[(&str, &str)] = &[
    ("overpass_main", include_str!("../services/overpass_main.toml")),
    (
        "overpass_private_coffee",
        include_str!("../services/overpass_private_coffee.toml"),
    ),
    ("overpass_kumi", include_str!("../services/overpass_kumi.toml")),
];

static SERVICES: LazyLock<Vec<GatewayService>> = LazyLock::new(|| {
    let mut services: Vec<_> = SERVICE_FILES
        .iter()
        .map(|(file, toml_str)| {
            // Embedded at compile time; the tests below keep these valid.
            parse_service(file, toml_str)
                .unwrap_or_else(|e| panic!("Invalid services/{file}.toml: {e}"))
        })
        .collect();
    services.sort_by_key(|s| s.priority);
    services
});

/// Every configured endpoint, enabled or not, by ascending priority.
#[must_use]
pub fn all_services() -> &'static [GatewayService] {
    &SERVICES
}

/// Enabled endpoints by ascending priority.
pub fn enabled_services() -> impl Iterator<Item = &'static GatewayService> {
    SERVICES.iter().filter(|s| s.enabled)
}

/// The endpoint used when none is named.
#[must_use]
pub fn default_service() -> Option<&'static GatewayService> {
    enabled_services().next()
}

/// Looks up an endpoint by id, whether or not it is enabled.
#[must_use]
pub fn find_service(id: &str) -> Option<&'static GatewayService> {
    SERVICES.iter().find(|s| s.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_embedded_file_is_registered() {
        assert_eq!(all_services().len(), SERVICE_FILES.len());
        for (file, _) in SERVICE_FILES {
            assert!(find_service(file).is_some(), "services/{file}.toml missing");
        }
    }

    #[test]
    fn interpreters_are_https_overpass_endpoints() {
        for service in all_services() {
            let url = service.base_url();
            assert!(url.starts_with("https://"), "{}: {url}", service.id);
            assert!(url.ends_with("/api/interpreter"), "{}: {url}", service.id);
        }
    }

    #[test]
    fn registry_is_ordered_by_priority() {
        let priorities: Vec<u32> = all_services().iter().map(|s| s.priority).collect();
        assert!(priorities.is_sorted());
    }

    #[test]
    fn main_instance_is_the_default() {
        assert_eq!(default_service().map(|s| s.id.as_str()), Some("overpass_main"));
    }

    #[test]
    fn disabled_mirror_is_findable_but_never_default() {
        let kumi = find_service("overpass_kumi").unwrap();
        assert!(!kumi.enabled);
        assert!(enabled_services().all(|s| s.id != "overpass_kumi"));

        let ProviderConfig::Overpass {
            timeout_secs,
            max_retries,
            ..
        } = kumi.provider;
        assert_eq!(timeout_secs, 60);
        assert_eq!(max_retries, 3);
    }

    #[test]
    fn omitted_fields_take_defaults() {
        let service = parse_service(
            "local",
            r#"
id = "local"
name = "Local interpreter"
priority = 9

[provider]
type = "overpass"
base_url = "http://localhost:12345/api/interpreter"
"#,
        )
        .unwrap();

        assert!(service.enabled);
        let ProviderConfig::Overpass {
            timeout_secs,
            max_retries,
            ..
        } = service.provider;
        assert_eq!(timeout_secs, 25);
        assert_eq!(max_retries, 3);
    }

    #[test]
    fn id_must_match_file_name() {
        let toml_str = SERVICE_FILES[0].1;
        assert!(matches!(
            parse_service("renamed", toml_str),
            Err(RegistryError::IdMismatch { .. })
        ));
    }

    #[test]
    fn unknown_provider_type_is_rejected() {
        let result = parse_service(
            "nominatim",
            r#"
id = "nominatim"
name = "Not a building source"
priority = 1

[provider]
type = "nominatim"
base_url = "https://nominatim.openstreetmap.org"
"#,
        );
        assert!(matches!(result, Err(RegistryError::Toml(_))));
    }
}
