//! Newtype ARN wrappers (spec §9: "never by pointer cycles" — resources reference
//! each other by ARN-indexed lookup, and these newtypes stop an LB ARN from ever
//! being compared against a TargetGroup ARN by accident.

macro_rules! arn_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
        pub struct $name(pub String);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

arn_newtype!(LoadBalancerArn);
arn_newtype!(ListenerArn);
arn_newtype!(RuleArn);
arn_newtype!(TargetGroupArn);
