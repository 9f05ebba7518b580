//! Rule action variants (spec §3 Rule, §9 "dynamic dispatch across action kinds").
//!
//! The action-kind set is closed and known at compile time, so this is a tagged
//! enum implementing a shared behavior trait rather than `Box<dyn Trait>`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::arn::TargetGroupArn;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedTargetGroup {
    pub target_group_arn: Option<TargetGroupArn>,
    /// Dedup key into the DesiredTree's target-group table, used before the ARN exists.
    pub target_group_key: String,
    pub weight: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardAction {
    pub target_groups: Vec<WeightedTargetGroup>,
    pub target_group_stickiness_seconds: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedirectStatusCode {
    Http301,
    Http302,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RedirectAction {
    pub host: Option<String>,
    pub path: Option<String>,
    pub port: Option<String>,
    pub protocol: Option<String>,
    pub query: Option<String>,
    pub status_code: Option<RedirectStatusCode>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedResponseAction {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub message_body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateOidcAction {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub user_info_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    pub session_cookie_name: Option<String>,
    pub session_timeout_seconds: Option<u64>,
    pub on_unauthenticated_request: OnUnauthenticatedRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateCognitoAction {
    pub user_pool_arn: String,
    pub user_pool_client_id: String,
    pub user_pool_domain: String,
    pub scope: Option<String>,
    pub session_cookie_name: Option<String>,
    pub session_timeout_seconds: Option<u64>,
    pub on_unauthenticated_request: OnUnauthenticatedRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnUnauthenticatedRequest {
    Authenticate,
    Deny,
    Allow,
}

/// One step in a Rule's ordered action list. Exactly one terminal action
/// (Forward, Redirect, FixedResponse) may appear per rule (spec §3 Rule invariant);
/// auth actions are non-terminal and precede it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleAction {
    Forward(ForwardAction),
    Redirect(RedirectAction),
    FixedResponse(FixedResponseAction),
    AuthenticateOidc(AuthenticateOidcAction),
    AuthenticateCognito(AuthenticateCognitoAction),
}

impl RuleAction {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RuleAction::Forward(_) | RuleAction::Redirect(_) | RuleAction::FixedResponse(_)
        )
    }

    /// Validates this single action in isolation (spec §9 `validate()`).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            RuleAction::Forward(f) => {
                if f.target_groups.is_empty() {
                    return Err("forward action names zero target groups".to_string());
                }
                if f.target_groups.iter().any(|tg| tg.weight == 0) {
                    return Err("forward action target group weight must be positive".to_string());
                }
                Ok(())
            }
            RuleAction::FixedResponse(fr) => {
                if !(200..600).contains(&(fr.status_code as u32)) {
                    return Err(format!("invalid fixed-response status {}", fr.status_code));
                }
                Ok(())
            }
            RuleAction::Redirect(_)
            | RuleAction::AuthenticateOidc(_)
            | RuleAction::AuthenticateCognito(_) => Ok(()),
        }
    }

    /// Renders a stable AWS-request-shaped representation for diffing against
    /// current state (spec §9 `renderAWS()`). We use an ordered `BTreeMap` so two
    /// semantically-equal actions always serialize identically.
    pub fn render_aws(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        match self {
            RuleAction::Forward(f) => {
                m.insert("type".into(), "forward".into());
                for (i, tg) in f.target_groups.iter().enumerate() {
                    m.insert(format!("tg.{i}.key"), tg.target_group_key.clone());
                    m.insert(format!("tg.{i}.weight"), tg.weight.to_string());
                }
            }
            RuleAction::Redirect(r) => {
                m.insert("type".into(), "redirect".into());
                if let Some(h) = &r.host {
                    m.insert("host".into(), h.clone());
                }
                if let Some(p) = &r.path {
                    m.insert("path".into(), p.clone());
                }
            }
            RuleAction::FixedResponse(fr) => {
                m.insert("type".into(), "fixed-response".into());
                m.insert("status".into(), fr.status_code.to_string());
            }
            RuleAction::AuthenticateOidc(o) => {
                m.insert("type".into(), "authenticate-oidc".into());
                m.insert("issuer".into(), o.issuer.clone());
            }
            RuleAction::AuthenticateCognito(c) => {
                m.insert("type".into(), "authenticate-cognito".into());
                m.insert("user_pool_arn".into(), c.user_pool_arn.clone());
            }
        }
        m
    }

    /// Semantic equality ignoring ARNs that have not yet materialized (spec §9 `equal()`).
    pub fn equal(&self, other: &RuleAction) -> bool {
        self.render_aws() == other.render_aws()
    }
}
