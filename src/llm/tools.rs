//! Tool definitions for the guard assistant.
//!
//! The assistant never executes tools; a single tool call is the structured
//! output channel, so the provider validates the shape for us.

use super::types::Tool;

pub const SUBMIT_RECOMMENDATIONS: &str = "submit_recommendations";

/// Most recommendations a guard is shown at once.
pub const MAX_RECOMMENDATIONS: usize = 3;

#[must_use]
pub fn guard_assistant_tools() -> Vec<Tool> {
    vec![Tool {
        name: SUBMIT_RECOMMENDATIONS.into(),
        description: "Submit concise, actionable recommendations or alerts for the parking guard.".into(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "recommendations": {
                    "type": "array",
                    "items": { "type": "string", "description": "One short recommendation or alert" },
                    "maxItems": MAX_RECOMMENDATIONS,
                    "description": "Up to 3 recommendations, most urgent first"
                }
            },
            "required": ["recommendations"]
        }),
    }]
}
