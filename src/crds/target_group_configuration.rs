use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::target_group_binding::{TargetGroupBindingIpAddressType, TargetGroupBindingTargetType};

/// Attaches configuration to a Service or Gateway (spec §6). At most one per
/// Gateway per namespace — enforced by the admission webhook; this core treats
/// a second sighting for the same Gateway as a configuration conflict.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1alpha1",
    kind = "TargetGroupConfiguration",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupConfigurationSpec {
    pub target_reference: TargetReference,
    pub default_configuration: Option<TargetGroupProps>,
    #[serde(default)]
    pub target_group_configs: Vec<PortSpecificConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetReference {
    pub group: Option<String>,
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSpecificConfig {
    pub target_group_props: TargetGroupProps,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupProps {
    pub target_type: Option<TargetGroupBindingTargetType>,
    pub ip_address_type: Option<TargetGroupBindingIpAddressType>,
    pub protocol: Option<String>,
    pub protocol_version: Option<String>,
    pub healthcheck_config: Option<HealthCheckProps>,
    pub node_selector: Option<LabelSelector>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckProps {
    pub healthcheck_protocol: Option<String>,
    pub healthcheck_port: Option<String>,
    pub healthcheck_path: Option<String>,
    pub healthcheck_interval_seconds: Option<i32>,
    pub healthcheck_timeout_seconds: Option<i32>,
    pub healthy_threshold_count: Option<i32>,
    pub unhealthy_threshold_count: Option<i32>,
}
