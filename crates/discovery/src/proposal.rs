//! Asking the LLM to pick a capability for a request.

use crate::record::SolutionDescriptor;
use serde_json::Value;
use steward_core::capability::CapabilityDescriptor;
use steward_core::message::Message;

const SYSTEM_PROMPT: &str = "You route a user's request to exactly one external capability. \
Reply with a single JSON object and nothing else: \
{\"service\": \"...\", \"operation\": \"...\", \"arguments\": {...}}. \
Arguments must follow the operation's schema. \
If no capability fits, reply {\"none\": \"<short reason>\"}.";

#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Call(SolutionDescriptor),
    /// The model found nothing suitable
    Decline(String),
}

pub fn build_messages(request: &str, capabilities: &[CapabilityDescriptor]) -> Vec<Message> {
    let catalogue: Vec<Value> = capabilities
        .iter()
        .map(|c| {
            serde_json::json!({
                "service": c.service,
                "operation": c.name,
                "description": c.description,
                "schema": c.schema,
            })
        })
        .collect();
    let catalogue = serde_json::to_string_pretty(&catalogue).unwrap_or_else(|_| "[]".into());

    vec![
        Message::system(SYSTEM_PROMPT),
        Message::user(format!("Capabilities:\n{catalogue}\n\nRequest: {request}")),
    ]
}

/// The outermost `{...}` span, ignoring code fences and chatter around it.
fn json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

pub fn parse_proposal(text: &str) -> Result<Proposal, String> {
    let span = json_span(text).ok_or_else(|| "reply contained no JSON object".to_string())?;
    let value: Value = serde_json::from_str(span).map_err(|e| format!("unparseable proposal: {e}"))?;

    let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty());

    match (field("service"), field("operation").or_else(|| field("name"))) {
        (Some(service), Some(operation)) => Ok(Proposal::Call(SolutionDescriptor {
            service: service.to_string(),
            operation: operation.to_string(),
            arguments: value
                .get("arguments")
                .cloned()
                .filter(Value::is_object)
                .unwrap_or_else(|| serde_json::json!({})),
        })),
        _ => match field("none").or_else(|| field("reason")) {
            Some(reason) => Ok(Proposal::Decline(reason.to_string())),
            None => Err("proposal named no service/operation".into()),
        },
    }
}
