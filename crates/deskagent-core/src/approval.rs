use serde::{Deserialize, Serialize};

/// User decision on a supervised tool call.
///
/// Rejection and timeout are distinct outcomes; the executor folds a timeout
/// into a rejection with the comment "Approval timeout" when it synthesizes
/// the tool result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ApprovalOutcome {
    ApprovedOnce,
    ApprovedAlways,
    Rejected { comment: String },
    Timeout,
}

impl ApprovalOutcome {
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            ApprovalOutcome::ApprovedOnce | ApprovalOutcome::ApprovedAlways
        )
    }

    /// The comment used when synthesizing the rejection tool result.
    pub fn rejection_comment(&self) -> Option<&str> {
        match self {
            ApprovalOutcome::Rejected { comment } => Some(comment.as_str()),
            ApprovalOutcome::Timeout => Some("Approval timeout"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_a_rejection_with_fixed_comment() {
        assert_eq!(
            ApprovalOutcome::Timeout.rejection_comment(),
            Some("Approval timeout")
        );
        assert!(!ApprovalOutcome::Timeout.is_approved());
    }

    #[test]
    fn serialized_tags_are_kebab_case() {
        let json = serde_json::to_string(&ApprovalOutcome::ApprovedAlways).unwrap();
        assert!(json.contains("approved-always"));

        let rejected: ApprovalOutcome =
            serde_json::from_str(r#"{"type":"rejected","comment":"no thanks"}"#).unwrap();
        assert_eq!(rejected.rejection_comment(), Some("no thanks"));
    }
}
