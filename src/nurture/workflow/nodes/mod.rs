// SPDX-License-Identifier: MIT

//! Built-in node handlers for the nurturing workflow

mod booking;
mod outreach;
mod qualify;
mod response;

use std::sync::Arc;

pub use booking::PrepareBookingNode;
pub use outreach::{DraftOutreachNode, FollowUpNode, HumanReviewNode, SendOutreachNode};
pub use qualify::QualifyNode;
pub use response::{ClassifyResponseNode, HandleObjectionNode, WaitForResponseNode};

use super::registry::NodeRegistry;

pub const QUALIFY: &str = "qualify";
pub const DRAFT_OUTREACH: &str = "draft_outreach";
pub const HUMAN_REVIEW: &str = "human_review";
pub const SEND_OUTREACH: &str = "send_outreach";
pub const WAIT_FOR_RESPONSE: &str = "wait_for_response";
pub const CLASSIFY_RESPONSE: &str = "classify_response";
pub const HANDLE_OBJECTION: &str = "handle_objection";
pub const FOLLOW_UP: &str = "follow_up";
pub const PREPARE_BOOKING: &str = "prepare_booking";

/// Every new run starts here
pub const ENTRY_NODE: &str = QUALIFY;

/// Registry holding all nine built-in handlers
pub async fn default_registry() -> NodeRegistry {
    let registry = NodeRegistry::new();
    registry.register(Arc::new(QualifyNode)).await;
    registry.register(Arc::new(DraftOutreachNode)).await;
    registry.register(Arc::new(HumanReviewNode)).await;
    registry.register(Arc::new(SendOutreachNode)).await;
    registry.register(Arc::new(WaitForResponseNode)).await;
    registry.register(Arc::new(ClassifyResponseNode)).await;
    registry.register(Arc::new(HandleObjectionNode)).await;
    registry.register(Arc::new(FollowUpNode)).await;
    registry.register(Arc::new(PrepareBookingNode)).await;
    registry
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_registry_has_every_node() {
        let registry = default_registry().await;
        for name in [
            QUALIFY,
            DRAFT_OUTREACH,
            HUMAN_REVIEW,
            SEND_OUTREACH,
            WAIT_FOR_RESPONSE,
            CLASSIFY_RESPONSE,
            HANDLE_OBJECTION,
            FOLLOW_UP,
            PREPARE_BOOKING,
        ] {
            let handler = registry.resolve(name).await.unwrap();
            assert_eq!(handler.name(), name);
        }
        assert_eq!(registry.names().await.len(), 9);
    }
}
