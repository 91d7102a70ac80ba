//! Object translation
//!
//! Pure, deterministic transforms applied to objects as they cross the
//! cluster boundary: server-populated metadata is scrubbed, the
//! namespace is retargeted, and kind-specific fields that only make
//! sense inside one cluster (pod IPs in a conflicting CIDR, service
//! cluster IPs, scheduling pins) are rewritten or dropped.
//!
//! Nothing in this module performs I/O or consults shared state; the
//! same inputs always produce the same output.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};
use crate::resource::MirroredObject;

/// Rewrite parameters shared by all translations of one peering
#[derive(Clone, Debug, Default)]
pub struct TranslationParams {
    /// CIDR the foreign cluster's pod network was remapped into on the
    /// home side (e.g. `"10.200.0.0/16"`). When set, incoming pod IPs
    /// are rewritten into this range with their host bits preserved.
    pub remapped_pod_cidr: Option<String>,
}

/// Translate an object observed on the foreign side into its home-side
/// shape, retargeted to `home_namespace`.
///
/// Status is kept: the incoming direction exists to reflect remote
/// runtime state home.
pub fn foreign_to_home(
    obj: &MirroredObject,
    home_namespace: &str,
    params: &TranslationParams,
) -> Result<MirroredObject> {
    let mut translated = obj.clone();
    scrub_metadata(&mut translated);
    translated.set_namespace(home_namespace);

    if let MirroredObject::Pod(pod) = &mut translated {
        // The foreign scheduler's node assignment means nothing at home.
        if let Some(spec) = pod.spec.as_mut() {
            spec.node_name = None;
        }
        if let Some(cidr) = &params.remapped_pod_cidr {
            remap_pod_ips(pod, cidr, obj.key().unwrap_or_default())?;
        }
    }

    Ok(translated)
}

/// Translate an object created on the home side into its foreign-side
/// shape, retargeted to `foreign_namespace`.
///
/// Status and scheduling pins are dropped so the foreign cluster runs
/// the object fresh.
pub fn home_to_foreign(
    obj: &MirroredObject,
    foreign_namespace: &str,
    _params: &TranslationParams,
) -> Result<MirroredObject> {
    let mut translated = obj.clone();
    scrub_metadata(&mut translated);
    translated.set_namespace(foreign_namespace);

    match &mut translated {
        MirroredObject::Pod(pod) => {
            pod.status = None;
            if let Some(spec) = pod.spec.as_mut() {
                spec.node_name = None;
            }
        }
        MirroredObject::Service(svc) => {
            // Cluster IPs are allocated per cluster.
            if let Some(spec) = svc.spec.as_mut() {
                spec.cluster_ip = None;
                spec.cluster_ips = None;
            }
            svc.status = None;
        }
        MirroredObject::ConfigMap(_)
        | MirroredObject::Secret(_)
        | MirroredObject::Endpoints(_) => {}
    }

    Ok(translated)
}

/// Drop everything the source API server populated; the target server
/// assigns its own identity and bookkeeping.
fn scrub_metadata(obj: &mut MirroredObject) {
    let meta = obj.meta_mut();
    meta.uid = None;
    meta.resource_version = None;
    meta.creation_timestamp = None;
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
    meta.generation = None;
    meta.managed_fields = None;
    meta.owner_references = None;
}

fn remap_pod_ips(
    pod: &mut k8s_openapi::api::core::v1::Pod,
    cidr: &str,
    key: String,
) -> Result<()> {
    let Some(status) = pod.status.as_mut() else {
        return Ok(());
    };
    if let Some(ip) = status.pod_ip.take() {
        let remapped = remap_ip(&ip, cidr).map_err(|msg| Error::translation(&key, msg))?;
        if let Some(pod_ips) = status.pod_ips.as_mut() {
            for entry in pod_ips.iter_mut() {
                if entry.ip == ip {
                    entry.ip = remapped.clone();
                }
            }
        }
        status.pod_ip = Some(remapped);
    }
    Ok(())
}

/// Move an IPv4 address into `cidr`, preserving its host bits.
fn remap_ip(ip: &str, cidr: &str) -> std::result::Result<String, String> {
    let (net, prefix_len) = cidr
        .split_once('/')
        .ok_or_else(|| format!("invalid CIDR {cidr:?}"))?;
    let prefix_len: u32 = prefix_len
        .parse()
        .map_err(|_| format!("invalid prefix length in {cidr:?}"))?;
    if prefix_len > 32 {
        return Err(format!("invalid prefix length in {cidr:?}"));
    }
    let net: Ipv4Addr = net.parse().map_err(|_| format!("invalid CIDR {cidr:?}"))?;
    let addr: Ipv4Addr = ip.parse().map_err(|_| format!("invalid pod IP {ip:?}"))?;

    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - prefix_len)
    };
    let remapped = (u32::from(net) & mask) | (u32::from(addr) & !mask);
    Ok(Ipv4Addr::from(remapped).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Pod, PodIP, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn running_pod(namespace: &str, name: &str, ip: &str) -> MirroredObject {
        MirroredObject::Pod(Box::new(Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                uid: Some("abc-123".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("worker-7".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ip: Some(ip.to_string()),
                pod_ips: Some(vec![PodIP { ip: ip.to_string() }]),
                ..Default::default()
            }),
            ..Default::default()
        }))
    }

    #[test]
    fn test_remap_ip_preserves_host_bits() {
        assert_eq!(
            remap_ip("10.100.3.7", "10.200.0.0/16").expect("remap succeeds"),
            "10.200.3.7"
        );
        assert_eq!(
            remap_ip("192.168.1.9", "10.0.0.0/8").expect("remap succeeds"),
            "10.168.1.9"
        );
    }

    #[test]
    fn test_remap_ip_rejects_bad_inputs() {
        assert!(remap_ip("10.0.0.1", "not-a-cidr").is_err());
        assert!(remap_ip("10.0.0.1", "10.0.0.0/40").is_err());
        assert!(remap_ip("not-an-ip", "10.0.0.0/16").is_err());
    }

    #[test]
    fn test_foreign_to_home_retargets_and_remaps() {
        let params = TranslationParams {
            remapped_pod_cidr: Some("10.200.0.0/16".to_string()),
        };
        let obj = running_pod("ns-a-peer", "p1", "10.100.3.7");
        let translated =
            foreign_to_home(&obj, "ns-a", &params).expect("translation succeeds");

        assert_eq!(translated.namespace(), Some("ns-a"));
        let MirroredObject::Pod(pod) = &translated else {
            panic!("expected pod");
        };
        let status = pod.status.as_ref().expect("status kept");
        assert_eq!(status.pod_ip.as_deref(), Some("10.200.3.7"));
        assert_eq!(status.pod_ips.as_ref().expect("pod_ips kept")[0].ip, "10.200.3.7");
        // Server identity and scheduling pins are gone.
        assert_eq!(pod.metadata.uid, None);
        assert_eq!(pod.metadata.resource_version, None);
        assert_eq!(pod.spec.as_ref().expect("spec kept").node_name, None);
    }

    #[test]
    fn test_foreign_to_home_without_cidr_keeps_ip() {
        let obj = running_pod("ns-a-peer", "p1", "10.100.3.7");
        let translated = foreign_to_home(&obj, "ns-a", &TranslationParams::default())
            .expect("translation succeeds");
        let MirroredObject::Pod(pod) = &translated else {
            panic!("expected pod");
        };
        assert_eq!(
            pod.status.as_ref().expect("status kept").pod_ip.as_deref(),
            Some("10.100.3.7")
        );
    }

    #[test]
    fn test_home_to_foreign_drops_status() {
        let obj = running_pod("ns-a", "p1", "10.100.3.7");
        let translated = home_to_foreign(&obj, "ns-a-peer", &TranslationParams::default())
            .expect("translation succeeds");
        let MirroredObject::Pod(pod) = &translated else {
            panic!("expected pod");
        };
        assert_eq!(translated.namespace(), Some("ns-a-peer"));
        assert!(pod.status.is_none());
    }

    #[test]
    fn test_translation_is_deterministic() {
        let params = TranslationParams {
            remapped_pod_cidr: Some("10.200.0.0/16".to_string()),
        };
        let obj = running_pod("ns-a-peer", "p1", "10.100.3.7");
        let a = foreign_to_home(&obj, "ns-a", &params).expect("first translation");
        let b = foreign_to_home(&obj, "ns-a", &params).expect("second translation");
        assert_eq!(a, b);
    }
}
