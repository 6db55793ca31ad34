//! Decisions returned by an external decision advisor.
//!
//! An advisor either hands back a ready [`GameAction`] or free-form text that
//! should contain one JSON object shaped like
//! `{"action": "BID", "amount": 120, "reason": "..."}`. Anything that cannot
//! be turned into an action is an error the caller treats as "no move this
//! cycle".

use crate::actions::{GameAction, PayloadError};
use crate::board::Money;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// What an advisor answered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvisorReply {
    Action(GameAction),
    Text(String),
}

/// A parsed advisor move and the reasoning it came with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: GameAction,
    pub reason: Option<String>,
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("No JSON object in advisor reply")]
    NoJson,

    #[error("Advisor reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Advisor proposed unknown action {0}")]
    UnknownVerb(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),
}

/// Decision fields as advisors send them; the common payload fields may
/// also appear at the top level.
#[derive(Debug, Deserialize)]
struct RawDecision {
    action: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    amount: Option<Money>,
    #[serde(default)]
    property_id: Option<String>,
    #[serde(default)]
    target_id: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

impl AdvisorReply {
    pub fn into_decision(self) -> Result<Decision, DecisionError> {
        match self {
            AdvisorReply::Action(action) => Ok(Decision {
                action,
                reason: None,
            }),
            AdvisorReply::Text(text) => parse_decision(&text),
        }
    }
}

/// Slice of `text` from the first `{` to the last `}`, after dropping code
/// fences and a leading `json` language tag
pub fn extract_json(text: &str) -> Option<&str> {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix("```") {
        body = rest.trim_start();
    }
    if let Some(rest) = body.strip_prefix("json") {
        body = rest;
    }
    let body = body.trim_end().trim_end_matches("```");

    let start = body.find('{')?;
    let end = body.rfind('}')?;
    (start < end).then(|| &body[start..=end])
}

pub fn parse_decision(text: &str) -> Result<Decision, DecisionError> {
    let json = extract_json(text).ok_or(DecisionError::NoJson)?;
    let raw: RawDecision = serde_json::from_str(json)?;

    let mut payload = match raw.payload {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Some(amount) = raw.amount {
        payload.entry("amount").or_insert(Value::from(amount));
    }
    if let Some(property_id) = raw.property_id {
        payload.entry("property_id").or_insert(Value::from(property_id));
    }
    if let Some(target_id) = raw.target_id {
        payload.entry("target_id").or_insert(Value::from(target_id));
    }

    let verb = raw.action.trim().to_ascii_uppercase();
    let action = GameAction::from_parts(&verb, &Value::Object(payload))?
        .ok_or(DecisionError::UnknownVerb(verb))?;

    Ok(Decision {
        action,
        reason: raw.reason.filter(|r| !r.trim().is_empty()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::PropertyTarget;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_json_strips_fences() {
        let text = "```json\n{\"action\": \"ROLL_DICE\"}\n```";
        assert_eq!(extract_json(text), Some("{\"action\": \"ROLL_DICE\"}"));
    }

    #[test]
    fn test_extract_json_from_prose() {
        let text = "Sure! Here you go: {\"action\": \"END_TURN\", \"payload\": {}} Good luck.";
        assert_eq!(
            extract_json(text),
            Some("{\"action\": \"END_TURN\", \"payload\": {}}")
        );
        assert_eq!(extract_json("no braces here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn test_parse_top_level_fields() {
        let decision = parse_decision(r#"{"action": "BID", "amount": 120, "reason": "cheap"}"#).unwrap();
        assert_eq!(decision.action, GameAction::bid(120));
        assert_eq!(decision.reason.as_deref(), Some("cheap"));
    }

    #[test]
    fn test_parse_payload_wins_over_top_level() {
        let decision = parse_decision(
            r#"{"action": "buy_building", "property_id": "x", "payload": {"property_id": "1.1.1"}}"#,
        )
        .unwrap();
        assert_eq!(
            decision.action,
            GameAction::BuyBuilding(PropertyTarget {
                property_id: "1.1.1".into()
            })
        );
        assert_eq!(decision.reason, None);
    }

    #[test]
    fn test_parse_failures() {
        assert!(matches!(parse_decision("I think I'll wait"), Err(DecisionError::NoJson)));
        assert!(matches!(
            parse_decision("{not json}"),
            Err(DecisionError::InvalidJson(_))
        ));
        assert!(matches!(
            parse_decision(r#"{"action": "TELEPORT"}"#),
            Err(DecisionError::UnknownVerb(verb)) if verb == "TELEPORT"
        ));
        assert!(matches!(
            parse_decision(r#"{"action": "BID"}"#),
            Err(DecisionError::Payload(_))
        ));
    }

    #[test]
    fn test_reply_with_action_passes_through() {
        let reply = AdvisorReply::Action(GameAction::EndTurn);
        assert_eq!(reply.into_decision().unwrap().action, GameAction::EndTurn);
    }
}
