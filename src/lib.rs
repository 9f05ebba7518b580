//! Reconciliation core for an AWS Application Load Balancer ingress controller
//! (spec.md §2): takes admitted Ingress resources plus their configuration
//! CRDs and materializes ALBs, listeners, rules, target groups and target
//! registrations, converging on drift every reconcile.
//!
//! The binary (`src/main.rs`) wires these modules into a `kube::runtime::Controller`;
//! everything in here is pure or only touches the warm [`cluster::ClusterIndex`]
//! cache and the typed [`aws::AwsGateway`] seam, so it's exercised directly in
//! tests without a live cluster or AWS account.

pub mod args;
pub mod aws;
pub mod builder;
pub mod cluster;
pub mod config;
pub mod consts;
pub mod crds;
pub mod ctx;
pub mod err;
pub mod group;
pub mod loader;
pub mod metrics;
pub mod model;
pub mod naming;
pub mod reconcile;
pub mod registrar;
pub mod status;
pub mod utils;
