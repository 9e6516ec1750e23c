/*!
 * Batch prompt encoding.
 *
 * A batch travels to the model as a JSON object keyed by item id and must
 * come back as an object with the same keys.
 */

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::errors::ProviderError;
use crate::task::models::ItemId;
use crate::text_utils::clean_translation;

/// Fill the language placeholders of a system prompt template
pub fn render_system_prompt(template: &str, source_language: &str, target_language: &str) -> String {
    template
        .replace("{source_language}", source_language)
        .replace("{target_language}", target_language)
}

/// Encode a batch as the user message
pub fn build_batch_prompt(items: &BTreeMap<ItemId, String>) -> String {
    let object: Map<String, Value> = items
        .iter()
        .map(|(id, text)| (id.to_string(), Value::String(text.clone())))
        .collect();
    Value::Object(object).to_string()
}

/// Decode a model reply into translations for the requested ids
///
/// Unknown ids, non-string values and values that are empty after cleaning
/// are dropped, so the result may be partial.
pub fn parse_batch_response(
    response: &str,
    requested: &BTreeMap<ItemId, String>,
) -> Result<HashMap<ItemId, String>, ProviderError> {
    let start = response.find('{');
    let end = response.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => {
            return Err(ProviderError::ParseError(
                "response does not contain a JSON object".to_string(),
            ))
        }
    };

    let object: Map<String, Value> = serde_json::from_str(body)
        .map_err(|e| ProviderError::ParseError(format!("invalid batch JSON: {}", e)))?;

    let mut translations = HashMap::with_capacity(object.len());
    for (key, value) in object {
        let Ok(id) = key.trim().parse::<ItemId>() else {
            continue;
        };
        if !requested.contains_key(&id) {
            continue;
        }
        if let Value::String(text) = value {
            let cleaned = clean_translation(&text);
            if !cleaned.is_empty() {
                translations.insert(id, cleaned);
            }
        }
    }

    Ok(translations)
}
