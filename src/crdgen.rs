//! Emits the OpenAPI manifests for this controller's CRDs as YAML, for
//! `kubectl apply -f` during cluster installation.

use kube::CustomResourceExt;

fn main() {
    let mut out = String::new();
    for crd in [
        serde_yaml::to_string(&alb_ingress_reconciler::crds::IngressClassParams::crd())
            .expect("serialize IngressClassParams crd"),
        serde_yaml::to_string(&alb_ingress_reconciler::crds::TargetGroupBinding::crd())
            .expect("serialize TargetGroupBinding crd"),
        serde_yaml::to_string(&alb_ingress_reconciler::crds::TargetGroupConfiguration::crd())
            .expect("serialize TargetGroupConfiguration crd"),
        serde_yaml::to_string(&alb_ingress_reconciler::crds::GlobalAccelerator::crd())
            .expect("serialize GlobalAccelerator crd"),
    ] {
        out.push_str("---\n");
        out.push_str(&crd);
    }
    print!("{out}");
}
