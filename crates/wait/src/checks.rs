use std::sync::Arc;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use tracing::error;
use yard_core::{ResourceObject, StoreError, TypedResource};

/// Outcome of one fetch of the watched object.
pub type Fetched = Result<ResourceObject, StoreError>;

/// Predicate over the latest fetch. Checks interpret fetch errors themselves:
/// NotFound is success for `does_not_exist` and "keep waiting" for `exists`.
pub type ConditionCheck = Arc<dyn Fn(&Fetched) -> bool + Send + Sync>;

pub fn check(f: impl Fn(&Fetched) -> bool + Send + Sync + 'static) -> ConditionCheck { Arc::new(f) }

pub fn all_pass(checks: &[ConditionCheck], fetched: &Fetched) -> bool {
    checks.iter().all(|c| c(fetched))
}

pub fn exists() -> ConditionCheck {
    check(|fetched| match fetched {
        Ok(_) => true,
        Err(e) => {
            if !e.is_not_found() { error!(error = %e, "fetch failed while waiting"); }
            false
        }
    })
}

/// The object is gone. A kind the server no longer serves counts as gone.
pub fn does_not_exist() -> ConditionCheck {
    check(|fetched| matches!(fetched, Err(e) if e.is_not_found() || e.is_no_match()))
}

/// CRD has `Established=True`. Objects that are not CRDs pass.
pub fn crd_established() -> ConditionCheck {
    check(|fetched| match fetched {
        Ok(obj) => match obj.typed() {
            TypedResource::CustomResourceDefinition(crd) => crd_condition(&crd, "Established") == Some("True"),
            _ => true,
        },
        Err(_) => false,
    })
}

/// Deployment or StatefulSet with readyReplicas == replicas. Other kinds pass.
pub fn replicas_ready() -> ConditionCheck {
    check(|fetched| match fetched {
        Ok(obj) => match obj.typed() {
            TypedResource::Deployment(d) => {
                let s = d.status.unwrap_or_default();
                s.ready_replicas.unwrap_or(0) == s.replicas.unwrap_or(0)
            }
            TypedResource::StatefulSet(s) => {
                let s = s.status.unwrap_or_default();
                s.ready_replicas.unwrap_or(0) == s.replicas
            }
            _ => true,
        },
        Err(_) => false,
    })
}

pub fn pod_running() -> ConditionCheck {
    check(|fetched| match fetched {
        Ok(obj) => matches!(obj.typed(), TypedResource::Pod(p) if p.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")),
        Err(_) => false,
    })
}

/// Reason of a `NamesAccepted=False` condition, if the CRD has one.
pub fn crd_names_rejected(obj: &ResourceObject) -> Option<String> {
    match obj.typed() {
        TypedResource::CustomResourceDefinition(crd) => {
            let cond = crd.status.as_ref()?.conditions.as_ref()?.iter().find(|c| c.type_ == "NamesAccepted")?;
            (cond.status == "False").then(|| cond.reason.clone().unwrap_or_default())
        }
        _ => None,
    }
}

fn crd_condition<'a>(crd: &'a CustomResourceDefinition, kind: &str) -> Option<&'a str> {
    crd.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == kind)
        .map(|c| c.status.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> ResourceObject { ResourceObject::from_value(v).unwrap() }

    fn crd(conditions: serde_json::Value) -> ResourceObject {
        obj(json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": {"name": "widgets.example.com"},
            "spec": {
                "group": "example.com",
                "names": {"kind": "Widget", "plural": "widgets"},
                "scope": "Namespaced",
                "versions": [{"name": "v1", "served": true, "storage": true}]
            },
            "status": {"acceptedNames": {"kind": "Widget", "plural": "widgets"}, "conditions": conditions}
        }))
    }

    #[test]
    fn existence_checks_read_the_error() {
        let missing: Fetched = Err(StoreError::NotFound("x".into()));
        let gone_kind: Fetched = Err(StoreError::NoMatch { group: "example.com".into(), kind: "Widget".into() });
        let broken: Fetched = Err(StoreError::Transport("refused".into()));
        assert!(!exists()(&missing));
        assert!(does_not_exist()(&missing));
        assert!(does_not_exist()(&gone_kind));
        assert!(!does_not_exist()(&broken));
        assert!(!exists()(&broken));
    }

    #[test]
    fn crd_established_reads_conditions() {
        let pending = crd(json!([{"type": "NamesAccepted", "status": "True"}]));
        let ready = crd(json!([{"type": "Established", "status": "True"}]));
        assert!(!crd_established()(&Ok(pending)));
        assert!(crd_established()(&Ok(ready)));
        let cm = obj(json!({"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}}));
        assert!(crd_established()(&Ok(cm)));
    }

    #[test]
    fn rejected_names_surface_reason() {
        let rejected = crd(json!([{"type": "NamesAccepted", "status": "False", "reason": "PluralConflict"}]));
        assert_eq!(crd_names_rejected(&rejected).as_deref(), Some("PluralConflict"));
        assert_eq!(crd_names_rejected(&crd(json!([]))), None);
    }

    #[test]
    fn replicas_ready_for_workloads() {
        let dep = |ready: i32| obj(json!({
            "apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "app"},
            "status": {"replicas": 2, "readyReplicas": ready}
        }));
        assert!(!replicas_ready()(&Ok(dep(1))));
        assert!(replicas_ready()(&Ok(dep(2))));
        let sts = obj(json!({
            "apiVersion": "apps/v1", "kind": "StatefulSet", "metadata": {"name": "db"},
            "status": {"replicas": 3, "readyReplicas": 3}
        }));
        assert!(replicas_ready()(&Ok(sts)));
        let svc = obj(json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": "s"}}));
        assert!(replicas_ready()(&Ok(svc)));
    }

    #[test]
    fn pod_running_checks_phase() {
        let pod = |phase: &str| obj(json!({
            "apiVersion": "v1", "kind": "Pod", "metadata": {"name": "p"}, "status": {"phase": phase}
        }));
        assert!(pod_running()(&Ok(pod("Running"))));
        assert!(!pod_running()(&Ok(pod("Pending"))));
    }
}
