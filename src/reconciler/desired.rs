use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment as K8sDeployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecurityContext, Service as K8sService, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend,
    IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;

use crate::db::models::{Deployment, Environment, Project, Release, RuntimeConfig, Service};

pub const MANAGED_BY_LABEL: (&str, &str) = ("managed-by", "enclii");

pub fn labels(service: &Service, deployment: &Deployment) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), service.name.clone()),
        (MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string()),
        ("enclii.dev/service-id".to_string(), service.id.to_string()),
        ("enclii.dev/deployment-id".to_string(), deployment.id.to_string()),
    ])
}

pub fn annotations(deployment: &Deployment, release: &Release) -> BTreeMap<String, String> {
    let mut a = BTreeMap::from([
        ("enclii.dev/release-id".to_string(), release.id.to_string()),
        ("enclii.dev/git-sha".to_string(), release.git_sha.clone()),
    ]);
    if let Some(obj) = deployment.annotations.as_object() {
        if let Some(from) = obj.get("rollback-from").and_then(|v| v.as_str()) {
            a.insert("enclii.dev/rollback-from".to_string(), from.to_string());
        }
        if let Some(at) = obj.get("rollback-at").and_then(|v| v.as_str()) {
            a.insert("enclii.dev/rollback-at".to_string(), at.to_string());
        }
    }
    a
}

pub fn namespace_name(project: &Project, environment: &Environment) -> String {
    environment
        .default_namespace
        .replace("{project_slug}", &project.slug)
        .replace("{environment}", &environment.name)
}

pub fn desired_namespace(project: &Project, environment: &Environment, extra_labels: &BTreeMap<String, String>) -> Namespace {
    let mut labels = BTreeMap::from([(MANAGED_BY_LABEL.0.to_string(), MANAGED_BY_LABEL.1.to_string())]);
    labels.extend(extra_labels.clone());
    Namespace {
        metadata: ObjectMeta { name: Some(namespace_name(project, environment)), labels: Some(labels), ..Default::default() },
        ..Default::default()
    }
}

pub fn deployment_name(service: &Service) -> String {
    service.name.clone()
}

pub fn service_name(service: &Service) -> String {
    service.name.clone()
}

#[allow(clippy::too_many_arguments)]
pub fn desired_deployment(
    project: &Project,
    environment: &Environment,
    service: &Service,
    deployment: &Deployment,
    release: &Release,
    runtime: &RuntimeConfig,
    resolved_env: Vec<(String, String)>,
) -> anyhow::Result<K8sDeployment> {
    let image = release
        .image_uri
        .clone()
        .ok_or_else(|| anyhow::anyhow!("release {} has no image_uri; cannot build desired Deployment", release.id))?;

    let labels_map = labels(service, deployment);
    let env_vars = resolved_env.into_iter().map(|(name, value)| EnvVar { name, value: Some(value), ..Default::default() }).collect::<Vec<_>>();

    let probe = Probe {
        http_get: Some(HTTPGetAction {
            path: Some(runtime.health_check.path.clone()),
            port: IntOrString::Int(runtime.health_check.port as i32),
            ..Default::default()
        }),
        initial_delay_seconds: Some(3),
        period_seconds: Some(10),
        ..Default::default()
    };

    let resources = ResourceRequirements {
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), quantity(format!("{}m", runtime.resource_requests.cpu_millicores))),
            ("memory".to_string(), quantity(format!("{}Mi", runtime.resource_requests.memory_mb))),
        ])),
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), quantity(format!("{}m", runtime.resource_limits.cpu_millicores))),
            ("memory".to_string(), quantity(format!("{}Mi", runtime.resource_limits.memory_mb))),
        ])),
        ..Default::default()
    };

    Ok(K8sDeployment {
        metadata: ObjectMeta {
            name: Some(deployment_name(service)),
            namespace: Some(namespace_name(project, environment)),
            labels: Some(labels_map.clone()),
            annotations: Some(annotations(deployment, release)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(deployment.desired_replicas),
            selector: LabelSelector { match_labels: Some(labels_map.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels_map), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "app".to_string(),
                        image: Some(image),
                        image_pull_policy: Some("IfNotPresent".to_string()),
                        ports: Some(vec![ContainerPort { container_port: runtime.port as i32, ..Default::default() }]),
                        env: if env_vars.is_empty() { None } else { Some(env_vars) },
                        readiness_probe: Some(probe.clone()),
                        liveness_probe: Some(probe),
                        resources: Some(resources),
                        security_context: Some(SecurityContext {
                            run_as_non_root: Some(true),
                            allow_privilege_escalation: Some(false),
                            read_only_root_filesystem: Some(false),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    })
}

pub fn desired_service(project: &Project, environment: &Environment, service: &Service, deployment: &Deployment, runtime: &RuntimeConfig) -> K8sService {
    K8sService {
        metadata: ObjectMeta {
            name: Some(service_name(service)),
            namespace: Some(namespace_name(project, environment)),
            labels: Some(labels(service, deployment)),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(labels(service, deployment)),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: 80,
                target_port: Some(IntOrString::Int(runtime.port as i32)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn ingress_name(service: &Service) -> String {
    format!("{}-ingress", service.name)
}

pub fn desired_ingress(project: &Project, environment: &Environment, service: &Service, deployment: &Deployment, hostname: &str, ingress_class: &str, tls_secret_name: Option<&str>) -> Ingress {
    Ingress {
        metadata: ObjectMeta {
            name: Some(ingress_name(service)),
            namespace: Some(namespace_name(project, environment)),
            labels: Some(labels(service, deployment)),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(ingress_class.to_string()),
            tls: tls_secret_name.map(|secret| {
                vec![k8s_openapi::api::networking::v1::IngressTLS { hosts: Some(vec![hostname.to_string()]), secret_name: Some(secret.to_string()) }]
            }),
            rules: Some(vec![IngressRule {
                host: Some(hostname.to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: service_name(service),
                                port: Some(ServiceBackendPort { name: Some("http".to_string()), ..Default::default() }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

fn quantity(value: String) -> k8s_openapi::apimachinery::pkg::api::resource::Quantity {
    k8s_openapi::apimachinery::pkg::api::resource::Quantity(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_project() -> Project {
        Project { id: Uuid::new_v4(), slug: "checkout".into(), name: "Checkout".into(), description: None, status: crate::db::models::ProjectStatus::Active, created_at: Utc::now(), updated_at: Utc::now() }
    }

    fn sample_environment(project_id: Uuid) -> Environment {
        Environment { id: Uuid::new_v4(), project_id, name: "production".into(), default_namespace: "enclii-{project_slug}".into(), variables: serde_json::json!({}), created_at: Utc::now(), updated_at: Utc::now() }
    }

    #[test]
    fn namespace_name_substitutes_project_slug() {
        let project = sample_project();
        let env = sample_environment(project.id);
        assert_eq!(namespace_name(&project, &env), "enclii-checkout");
    }
}
