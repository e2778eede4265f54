//! Kubernetes Deployment, Service and Ingress manifests for one application

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
    IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::models::application::ApplicationDeploymentSpec;
use crate::models::server::IngressSettings;

pub const MANAGED_LABEL: &str = "keel.managed";
pub const APPLICATION_ID_LABEL: &str = "keel.applicationId";

fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

fn non_empty_map<V>(map: BTreeMap<String, V>) -> Option<BTreeMap<String, V>> {
    (!map.is_empty()).then_some(map)
}

/// Pod labels: `app` and the application id, overridden by custom labels
pub fn pod_labels(app: &ApplicationDeploymentSpec) -> BTreeMap<String, String> {
    let id = app.id.to_string();
    let mut pod_labels = labels(&[("app", app.identifier()), (APPLICATION_ID_LABEL, id.as_str())]);
    pod_labels.extend(app.kubernetes.pod_labels.clone());
    pod_labels
}

fn resources(app: &ApplicationDeploymentSpec) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    if let Some(memory) = app.limits.memory() {
        quantities.insert("memory".to_string(), Quantity(memory.to_string()));
    }
    if let Some(cpus) = app.limits.cpus() {
        quantities.insert("cpu".to_string(), Quantity(cpus.to_string()));
    }
    if quantities.is_empty() {
        return None;
    }

    // requests equal limits for guaranteed QoS
    Some(ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
        ..Default::default()
    })
}

pub fn deployment(app: &ApplicationDeploymentSpec, image: &str) -> Deployment {
    let name = app.identifier();
    let id = app.id.to_string();

    let env: Vec<EnvVar> = app
        .runtime_env()
        .map(|e| EnvVar {
            name: e.key.clone(),
            value: Some(e.value.clone()),
            ..Default::default()
        })
        .collect();

    let ports: Vec<ContainerPort> = app
        .exposed_ports()
        .into_iter()
        .map(|port| ContainerPort {
            container_port: i32::from(port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    let container = Container {
        name: name.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        env: non_empty(env),
        ports: non_empty(ports),
        resources: resources(app),
        ..Default::default()
    };

    let overrides = &app.kubernetes;
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(&[
                ("app", name),
                (MANAGED_LABEL, "true"),
                (APPLICATION_ID_LABEL, id.as_str()),
            ])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(i32::try_from(overrides.replicas).unwrap_or(i32::MAX)),
            selector: LabelSelector {
                match_labels: Some(labels(&[("app", name)])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(pod_labels(app)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    node_selector: non_empty_map(overrides.node_selector.clone()),
                    tolerations: non_empty(overrides.tolerations.clone()),
                    affinity: overrides.affinity.clone(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service over every exposed port, or port 80 when none are exposed
pub fn service(app: &ApplicationDeploymentSpec, service_type: &str) -> Service {
    let name = app.identifier();

    let exposed = app.exposed_ports();
    let ports = if exposed.is_empty() {
        vec![ServicePort {
            name: Some("http".to_string()),
            port: 80,
            target_port: Some(IntOrString::Int(80)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]
    } else {
        exposed
            .into_iter()
            .map(|port| ServicePort {
                name: Some(format!("port-{}", port)),
                port: i32::from(port),
                target_port: Some(IntOrString::Int(i32::from(port))),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect()
    };

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(&[("app", name), (MANAGED_LABEL, "true")])),
            annotations: non_empty_map(app.kubernetes.service_annotations.clone()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(labels(&[("app", name)])),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress routing every FQDN host to the service. `None` without hosts.
pub fn ingress(app: &ApplicationDeploymentSpec, settings: &IngressSettings) -> Option<Ingress> {
    let hosts = app.domains();
    if hosts.is_empty() {
        return None;
    }

    let name = app.identifier();
    let port = i32::from(app.primary_port());

    let rules = hosts
        .iter()
        .map(|host| IngressRule {
            host: Some(host.clone()),
            http: Some(HTTPIngressRuleValue {
                paths: vec![HTTPIngressPath {
                    path: Some("/".to_string()),
                    path_type: "Prefix".to_string(),
                    backend: IngressBackend {
                        service: Some(IngressServiceBackend {
                            name: name.to_string(),
                            port: Some(ServiceBackendPort {
                                number: Some(port),
                                ..Default::default()
                            }),
                        }),
                        ..Default::default()
                    },
                }],
            }),
        })
        .collect();

    Some(Ingress {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels(&[("app", name), (MANAGED_LABEL, "true")])),
            annotations: Some(labels(&[
                ("kubernetes.io/ingress.class", settings.class.as_str()),
                ("cert-manager.io/cluster-issuer", settings.cluster_issuer.as_str()),
            ])),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: Some(settings.class.clone()),
            rules: Some(rules),
            tls: Some(vec![IngressTLS {
                hosts: Some(hosts),
                secret_name: Some(format!("{}-tls", name)),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    })
}
