//! Engine configuration.

use crate::error::{Error, Result};
use crate::resource::ResourceKind;

/// Configuration for a reflection engine instance
#[derive(Debug, Clone)]
pub struct ReflectionConfig {
    /// Identifier of the peered cluster, used to derive natted
    /// namespace names
    pub cluster_id: String,
    /// Kinds mirrored in every registered namespace
    pub kinds: Vec<ResourceKind>,
    /// Reconcile workers per reflector
    pub queue_workers: usize,
    /// Pod CIDR the peer remapped ours to, if any
    pub remapped_pod_cidr: Option<String>,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            kinds: vec![ResourceKind::Pods],
            queue_workers: 2,
            remapped_pod_cidr: None,
        }
    }
}

impl ReflectionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cluster_id.is_empty() {
            return Err(Error::config("cluster_id cannot be empty"));
        }
        if self.kinds.is_empty() {
            return Err(Error::config("at least one resource kind must be mirrored"));
        }
        if self.queue_workers == 0 {
            return Err(Error::config("queue_workers must be at least 1"));
        }
        if let Some(cidr) = &self.remapped_pod_cidr {
            let valid = match cidr.split_once('/') {
                Some((addr, prefix)) => {
                    addr.parse::<std::net::Ipv4Addr>().is_ok()
                        && prefix.parse::<u8>().map(|p| p <= 32).unwrap_or(false)
                }
                None => false,
            };
            if !valid {
                return Err(Error::config(format!(
                    "remapped_pod_cidr {cidr:?} is not a valid IPv4 CIDR"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> ReflectionConfig {
        ReflectionConfig {
            cluster_id: "peer-1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_valid_config_passes() {
        valid().validate().expect("valid config");
    }

    #[test]
    fn test_missing_cluster_id_rejected() {
        assert!(ReflectionConfig::default().validate().is_err());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid();
        config.queue_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cidr_validation() {
        let mut config = valid();
        config.remapped_pod_cidr = Some("10.200.0.0/16".to_string());
        config.validate().expect("valid CIDR");

        config.remapped_pod_cidr = Some("not-a-cidr".to_string());
        assert!(config.validate().is_err());

        config.remapped_pod_cidr = Some("10.200.0.0/40".to_string());
        assert!(config.validate().is_err());
    }
}
