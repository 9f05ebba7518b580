use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Listeners (TCP/UDP + port ranges) and endpoint groups (spec §6). Optional
/// feature; the reconcile core validates its bounded fields but otherwise
/// treats it the same way it treats any other CRD-sourced desired state.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[kube(
    group = "elbv2.k8s.aws",
    version = "v1alpha1",
    kind = "GlobalAccelerator",
    namespaced,
    status = "GlobalAcceleratorStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAcceleratorSpec {
    #[serde(default)]
    pub listeners: Vec<GaListener>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GaListener {
    pub protocol: GaProtocol,
    pub port_ranges: Vec<GaPortRange>,
    #[serde(default)]
    pub endpoint_groups: Vec<GaEndpointGroup>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum GaProtocol {
    Tcp,
    Udp,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, JsonSchema)]
pub struct GaPortRange {
    pub from_port: u16,
    pub to_port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GaEndpointGroup {
    pub region: String,
    pub endpoints: Vec<GaEndpoint>,
    pub traffic_dial_percentage: Option<u8>,
    pub health_check_interval_seconds: Option<u8>,
    pub threshold_count: Option<u8>,
}

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GaEndpoint {
    pub endpoint_id: String,
    pub weight: Option<u16>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GlobalAcceleratorStatus {
    pub accelerator_arn: Option<String>,
}

/// Validates the bounded fields spec §6 names: port ranges `1..65535` with
/// `fromPort<=toPort`; endpoint groups need `>=1` endpoint, weights `0..255`,
/// traffic-dial `0..100`, health interval `10..30`, threshold `1..10`.
pub fn validate_listener(listener: &GaListener) -> Result<(), String> {
    if listener.port_ranges.is_empty() {
        return Err("listener must declare at least one port range".to_string());
    }
    for range in &listener.port_ranges {
        if range.from_port == 0 || range.from_port > range.to_port {
            return Err(format!(
                "invalid port range {}..{}",
                range.from_port, range.to_port
            ));
        }
    }
    for group in &listener.endpoint_groups {
        if group.endpoints.is_empty() {
            return Err(format!("endpoint group {} has zero endpoints", group.region));
        }
        for endpoint in &group.endpoints {
            if let Some(weight) = endpoint.weight {
                if weight > 255 {
                    return Err(format!(
                        "endpoint {} weight {weight} out of range 0..255",
                        endpoint.endpoint_id
                    ));
                }
            }
        }
        if let Some(dial) = group.traffic_dial_percentage {
            if dial > 100 {
                return Err(format!("traffic-dial-percentage {dial} out of range 0..100"));
            }
        }
        if let Some(interval) = group.health_check_interval_seconds {
            if !(10..=30).contains(&interval) {
                return Err(format!("health-check-interval {interval} out of range 10..30"));
            }
        }
        if let Some(threshold) = group.threshold_count {
            if !(1..=10).contains(&threshold) {
                return Err(format!("threshold-count {threshold} out of range 1..10"));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_listener() -> GaListener {
        GaListener {
            protocol: GaProtocol::Tcp,
            port_ranges: vec![GaPortRange { from_port: 80, to_port: 80 }],
            endpoint_groups: vec![GaEndpointGroup {
                region: "us-east-1".into(),
                endpoints: vec![GaEndpoint { endpoint_id: "i-1".into(), weight: Some(100) }],
                traffic_dial_percentage: Some(100),
                health_check_interval_seconds: Some(10),
                threshold_count: Some(3),
            }],
        }
    }

    #[test]
    fn accepts_well_formed_listener() {
        assert!(validate_listener(&valid_listener()).is_ok());
    }

    #[test]
    fn rejects_inverted_port_range() {
        let mut listener = valid_listener();
        listener.port_ranges[0] = GaPortRange { from_port: 100, to_port: 50 };
        assert!(validate_listener(&listener).is_err());
    }

    #[test]
    fn rejects_empty_endpoint_group() {
        let mut listener = valid_listener();
        listener.endpoint_groups[0].endpoints.clear();
        assert!(validate_listener(&listener).is_err());
    }

    #[test]
    fn rejects_weight_above_255() {
        let mut listener = valid_listener();
        listener.endpoint_groups[0].endpoints[0].weight = Some(256);
        assert!(validate_listener(&listener).is_err());
    }
}
