use serde_json::{Map, Value};

use super::ExtractError;
use crate::llm::CompletionService;
use crate::models::TBD;

pub const SYSTEM_INSTRUCTION: &str = "You will receive a gig message. The date has already been extracted.

Your job is to return only valid JSON with the following fields:
- \"venue\"
- \"city\"
- \"time\" (like \"8:00 PM\", or \"TBD\" if unknown)

Never guess or invent values. If the venue or city is not in the message, leave it out.
Respond with a single JSON object only, no explanation.
Example:
{
  \"venue\": \"The Pour House\",
  \"city\": \"Raleigh\",
  \"time\": \"9:00 PM\"
}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFields {
    pub venue: String,
    pub city: String,
    pub time: String,
}

/// Asks the completion service for venue, city and time and returns its raw
/// reply; [`parse_fields`] reads it.
pub async fn request_fields(
    completion: &dyn CompletionService,
    stripped_message: &str,
) -> Result<String, ExtractError> {
    Ok(completion
        .complete(SYSTEM_INSTRUCTION, stripped_message)
        .await?)
}

/// Reads a reply that must be exactly one JSON object. Nothing is salvaged
/// from text that does not parse.
pub fn parse_fields(raw: &str) -> Result<ExtractedFields, ExtractError> {
    let object = match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Object(map)) => map,
        _ => {
            return Err(ExtractError::MalformedAiResponse {
                raw: raw.to_string(),
            })
        }
    };

    let venue = required_text(&object, "venue", false);
    let city = required_text(&object, "city", false);
    let time = required_text(&object, "time", true);

    match (venue, city, time) {
        (Some(venue), Some(city), Some(time)) => Ok(ExtractedFields { venue, city, time }),
        (venue, city, time) => {
            let missing = [("venue", venue), ("city", city), ("time", time)]
                .into_iter()
                .filter(|(_, value)| value.is_none())
                .map(|(name, _)| name)
                .collect();
            Err(ExtractError::IncompleteExtraction { missing })
        }
    }
}

fn required_text(object: &Map<String, Value>, key: &str, tbd_allowed: bool) -> Option<String> {
    let text = object.get(key)?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    if text.eq_ignore_ascii_case(TBD) {
        return tbd_allowed.then(|| TBD.to_string());
    }
    Some(text.to_string())
}
