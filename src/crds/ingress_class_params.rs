use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster-scoped per-class defaults (spec §6): scheme, subnets, tags, SSL
/// policy, inbound CIDRs, load-balancer/listener attributes, minimum capacity,
/// IPAM pool, auth config, namespace selector.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1beta1",
    kind = "IngressClassParams",
    plural = "ingressclassparams"
)]
#[serde(rename_all = "camelCase")]
pub struct IngressClassParamsSpec {
    pub scheme: Option<String>,
    pub ip_address_type: Option<String>,
    pub subnets: Option<SubnetSelection>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub ssl_policy: Option<String>,
    #[serde(default)]
    pub inbound_cidrs: Vec<String>,
    #[serde(default)]
    pub load_balancer_attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub listener_attributes: BTreeMap<String, String>,
    pub minimum_load_balancer_capacity: Option<MinimumLoadBalancerCapacity>,
    pub ipam_pool_id: Option<String>,
    pub default_certificate_arn: Option<String>,
    /// Only Ingresses in namespaces this selector matches may join a group
    /// governed by this class (spec §4.3 supplement).
    pub namespace_selector: Option<LabelSelector>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSelection {
    pub ids: Option<Vec<String>>,
    pub tags: Option<BTreeMap<String, Vec<String>>>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinimumLoadBalancerCapacity {
    pub capacity_units: i32,
}
