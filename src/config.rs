//! Controller configuration
//!
//! Loaded from a YAML file. Every field has a default so an empty file is
//! valid; command-line flags override the controller section.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub labels: LabelsConfig,
    pub controller: ControllerSettings,
    /// Endpoint host -> endpoint settings
    pub virtual_centers: BTreeMap<String, VirtualCenterConfig>,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.labels.zone.is_empty() || self.labels.region.is_empty() {
            return Err(Error::Configuration(
                "labels.zone and labels.region must not be empty".into(),
            ));
        }
        for (server, vc) in &self.virtual_centers {
            for dc in &vc.datacenters {
                if dc.name.is_empty() {
                    return Err(Error::Configuration(format!(
                        "virtual center {} has a datacenter without a name",
                        server
                    )));
                }
                for cluster in &dc.datastore_clusters {
                    if cluster.datastores.is_empty() {
                        return Err(Error::Configuration(format!(
                            "datastore cluster {} in {}/{} has no member datastores",
                            cluster.name, server, dc.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Tag categories used for zone lookups
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelsConfig {
    pub zone: String,
    pub region: String,
}

impl Default for LabelsConfig {
    fn default() -> Self {
        Self {
            zone: "k8s-zone".to_string(),
            region: "k8s-region".to_string(),
        }
    }
}

/// Controller behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerSettings {
    /// Serialize concurrent creates of the same name within this process
    pub serialize_creates: bool,
    /// Per-request deadline in seconds
    pub request_timeout_secs: u64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            serialize_creates: false,
            request_timeout_secs: 30,
        }
    }
}

/// One virtualization-management endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualCenterConfig {
    pub port: u16,
    pub api_version: String,
    pub datacenters: Vec<DatacenterConfig>,
}

impl Default for VirtualCenterConfig {
    fn default() -> Self {
        Self {
            port: 443,
            api_version: "6.7.0".to_string(),
            datacenters: Vec::new(),
        }
    }
}

/// Inventory of one datacenter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatacenterConfig {
    pub name: String,
    pub zone: Option<String>,
    pub region: Option<String>,
    pub datastores: Vec<String>,
    pub datastore_clusters: Vec<DatastoreClusterConfig>,
    /// DNS names of node VMs
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatastoreClusterConfig {
    pub name: String,
    pub datastores: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
labels:
  zone: k8s-zone
  region: k8s-region
controller:
  serializeCreates: true
virtualCenters:
  vc1.example.com:
    apiVersion: "6.5.0"
    datacenters:
      - name: dc-1
        zone: zone-a
        region: region-x
        datastores: [ds-1]
        datastoreClusters:
          - name: pod-1
            datastores: [ds-2, ds-3]
        nodes: [node-1.example.com]
"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert!(config.controller.serialize_creates);
        assert_eq!(config.controller.request_timeout_secs, 30);

        let vc = &config.virtual_centers["vc1.example.com"];
        assert_eq!(vc.port, 443);
        assert_eq!(vc.api_version, "6.5.0");
        assert_eq!(vc.datacenters[0].zone.as_deref(), Some("zone-a"));
        assert_eq!(vc.datacenters[0].datastore_clusters[0].datastores.len(), 2);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = Config::from_yaml("").unwrap();
        assert_eq!(config.labels.zone, "k8s-zone");
        assert!(config.virtual_centers.is_empty());
        assert!(!config.controller.serialize_creates);
    }

    #[test]
    fn test_rejects_empty_cluster() {
        let raw = r#"
virtualCenters:
  vc1:
    datacenters:
      - name: dc-1
        datastoreClusters:
          - name: pod-1
"#;
        assert!(matches!(
            Config::from_yaml(raw),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.virtual_centers.len(), 1);

        assert!(Config::from_file("/nonexistent/csi.yaml").is_err());
    }
}
