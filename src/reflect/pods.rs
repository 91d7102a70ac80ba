//! Pod reflection hooks.
//!
//! Wires the generic [`Reflector`] to pod semantics: namespace NAT for
//! addressing, and the pod translation rules (node unbinding, status
//! handling, pod IP remapping) at each lifecycle step.

use std::sync::Arc;

use crate::cache::manager::CacheManager;
use crate::error::Result;
use crate::nat::NamespaceNatting;
use crate::reflect::{Direction, PushMode, Reflector, ReflectorHooks};
use crate::resource::{MirroredObject, ResourceKind};
use crate::translate::{self, TranslationParams};

/// Hooks mirroring pods in `direction` through `natting`
pub fn pod_hooks(
    direction: Direction,
    natting: Arc<dyn NamespaceNatting>,
    params: TranslationParams,
) -> ReflectorHooks {
    let map_ns = {
        let natting = Arc::clone(&natting);
        move |namespace: &str, create: bool| match direction {
            Direction::HomeToForeign => natting.nat_namespace(namespace, create),
            // Reverse mappings only exist for namespaces the engine
            // natted; nothing is ever created from the foreign side.
            Direction::ForeignToHome => natting.denat_namespace(namespace),
        }
    };

    let translate_pod = {
        let map_ns = map_ns.clone();
        move |obj: &MirroredObject| -> Result<MirroredObject> {
            let source_ns = obj.namespace().unwrap_or_default();
            let target_ns = map_ns(source_ns, false)?;
            match direction {
                Direction::HomeToForeign => translate::home_to_foreign(obj, &target_ns, &params),
                Direction::ForeignToHome => translate::foreign_to_home(obj, &target_ns, &params),
            }
        }
    };

    let pre_update = {
        let translate_pod = translate_pod.clone();
        move |new: &MirroredObject, _old: Option<&MirroredObject>| translate_pod(new)
    };

    ReflectorHooks {
        target_namespace: Arc::new(map_ns),
        keyer: Arc::new(|obj: &MirroredObject| obj.key()),
        pre_add: Arc::new(translate_pod),
        pre_update: Arc::new(pre_update),
        // Deletion targets are already expressed in target-side terms.
        pre_delete: Arc::new(|obj: &MirroredObject| Ok(obj.clone())),
    }
}

/// Pod reflector for one direction
pub fn pod_reflector(
    direction: Direction,
    manager: Arc<CacheManager>,
    natting: Arc<dyn NamespaceNatting>,
    params: TranslationParams,
    push_mode: PushMode,
) -> Result<Arc<Reflector>> {
    Reflector::new(
        ResourceKind::Pods,
        direction,
        manager,
        pod_hooks(direction, natting, params),
        push_mode,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nat::NattingTable;
    use k8s_openapi::api::core::v1::{Pod, PodStatus};

    fn pod(namespace: &str, name: &str) -> MirroredObject {
        let mut pod = Pod::default();
        pod.metadata.name = Some(name.to_string());
        pod.metadata.namespace = Some(namespace.to_string());
        MirroredObject::from(pod)
    }

    fn natting_with(home: &str, foreign: &str) -> Arc<NattingTable> {
        let table = NattingTable::new("peer-1");
        table.insert_mapping(home, foreign).expect("fresh mapping");
        Arc::new(table)
    }

    #[test]
    fn test_home_to_foreign_hooks_retarget_namespace() {
        let natting = natting_with("demo", "demo-peer-1");
        let hooks = pod_hooks(
            Direction::HomeToForeign,
            natting,
            TranslationParams::default(),
        );

        let mapped = (hooks.target_namespace)("demo", false).expect("mapping exists");
        assert_eq!(mapped, "demo-peer-1");

        let translated = (hooks.pre_add)(&pod("demo", "web")).expect("translates");
        assert_eq!(translated.namespace(), Some("demo-peer-1"));
        assert_eq!(translated.name(), Some("web"));
    }

    #[test]
    fn test_foreign_to_home_hooks_denat_and_remap_ips() {
        let natting = natting_with("demo", "demo-peer-1");
        let params = TranslationParams {
            remapped_pod_cidr: Some("10.200.0.0/16".to_string()),
        };
        let hooks = pod_hooks(Direction::ForeignToHome, natting, params);

        let mut foreign_pod = Pod::default();
        foreign_pod.metadata.name = Some("web".to_string());
        foreign_pod.metadata.namespace = Some("demo-peer-1".to_string());
        foreign_pod.status = Some(PodStatus {
            pod_ip: Some("10.1.2.3".to_string()),
            ..Default::default()
        });

        let translated = (hooks.pre_update)(&MirroredObject::from(foreign_pod), None)
            .expect("translates");
        assert_eq!(translated.namespace(), Some("demo"));
        let MirroredObject::Pod(translated) = &translated else {
            panic!("pod hooks must produce a pod");
        };
        let status = translated.status.as_ref().expect("status preserved");
        assert_eq!(status.pod_ip.as_deref(), Some("10.200.2.3"));
    }

    #[test]
    fn test_unmapped_namespace_fails_without_create() {
        let natting: Arc<NattingTable> = Arc::new(NattingTable::new("peer-1"));
        let hooks = pod_hooks(
            Direction::HomeToForeign,
            Arc::clone(&natting) as Arc<dyn NamespaceNatting>,
            TranslationParams::default(),
        );

        assert!((hooks.pre_add)(&pod("demo", "web")).is_err());

        // Registration path creates the mapping, after which translation
        // succeeds.
        let created = (hooks.target_namespace)("demo", true).expect("mapping created");
        assert_eq!(created, "demo-peer-1");
        assert!((hooks.pre_add)(&pod("demo", "web")).is_ok());
    }
}
