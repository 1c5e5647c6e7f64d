use chrono::{Duration, Utc};
use proptest::prelude::*;
use saga_core::models::{ActionPriority, ActionRequest, SubmitOptions};

pub fn priority_strategy() -> impl Strategy<Value = ActionPriority> {
    prop_oneof![
        Just(ActionPriority::Low),
        Just(ActionPriority::Medium),
        Just(ActionPriority::High),
        Just(ActionPriority::Critical),
    ]
}

/// Requests with random priority, optionally scheduled or expiring within +-60s of now
pub fn request_strategy() -> impl Strategy<Value = ActionRequest> {
    (
        priority_strategy(),
        prop::option::of(-60i64..60),
        prop::option::of(-60i64..60),
    )
        .prop_map(|(priority, scheduled_offset, expiry_offset)| {
            let now = Utc::now();
            let mut options = SubmitOptions::default().with_priority(priority);
            if let Some(offset) = scheduled_offset {
                options = options.scheduled_at(now + Duration::seconds(offset));
            }
            if let Some(offset) = expiry_offset {
                options = options.expires_at(now + Duration::seconds(offset));
            }
            ActionRequest::new("prop-user", "purchase", serde_json::json!({}), options)
        })
}
