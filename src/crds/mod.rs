//! CRDs this core consumes (spec §6). Each is a `kube::CustomResource` with a
//! matching `schemars::JsonSchema`, the shape the pack's
//! `ibotty-kube-redirect-operator` teacher-pack example uses for its `Redirect`
//! CRD.

pub mod global_accelerator;
pub mod ingress_class_params;
pub mod target_group_binding;
pub mod target_group_configuration;

pub use global_accelerator::GlobalAccelerator;
pub use ingress_class_params::IngressClassParams;
pub use target_group_binding::TargetGroupBinding;
pub use target_group_configuration::TargetGroupConfiguration;
