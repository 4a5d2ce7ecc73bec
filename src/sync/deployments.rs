//! Deployment metadata extraction from rendered manifests

use serde_yaml::Value;

use crate::db::NewDeployment;
use crate::render::RenderedDocument;

const DEPLOYMENT_KIND: &str = "Deployment";

/// Derive one deployment per rendered `Deployment` document
pub fn extract_deployments(documents: &[RenderedDocument]) -> Vec<NewDeployment> {
    documents
        .iter()
        .filter(|document| document.kind == DEPLOYMENT_KIND)
        .map(|document| {
            let content: Value = serde_yaml::from_str(&document.content).unwrap_or(Value::Null);
            let title = content
                .get("metadata")
                .and_then(|metadata| metadata.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| document.name.clone());

            NewDeployment {
                title,
                ports: container_ports(&content),
            }
        })
        .collect()
}

/// Distinct container ports of a deployment in discovery order.
///
/// Both a direct `containerPort` and the entries of `ports` are collected;
/// malformed structures contribute nothing.
pub fn container_ports(deployment: &Value) -> Vec<String> {
    let mut ports: Vec<String> = Vec::new();
    let mut add = |port: Option<String>| {
        if let Some(port) = port {
            if !ports.contains(&port) {
                ports.push(port);
            }
        }
    };

    let containers = deployment
        .get("spec")
        .and_then(|spec| spec.get("template"))
        .and_then(|template| template.get("spec"))
        .and_then(|spec| spec.get("containers"))
        .and_then(Value::as_sequence);

    for container in containers.into_iter().flatten() {
        add(container.get("containerPort").and_then(port_string));

        let declared = container.get("ports").and_then(Value::as_sequence);
        for port in declared.into_iter().flatten() {
            add(port.get("containerPort").and_then(port_string));
        }
    }

    ports
}

fn port_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}
