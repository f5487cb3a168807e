//! Script generation: prompts for each part and strict parsing of the
//! text backend's scene JSON.

use rf_core::{PartSpec, SceneSpec};
use serde::Deserialize;

/// Scene list as returned by the text backend.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptResponse {
    scenes: Vec<ScriptScene>,
}

#[derive(Debug, Deserialize)]
struct ScriptScene {
    text: String,
    image_prompt: String,
}

/// Prompt asking the text backend for part `part` of `parts`.
pub fn script_prompt(topic: &str, category: &str, part: u32, parts: u32) -> String {
    let position = match part {
        1 => "Open the story and introduce the subject.",
        p if p == parts => "Bring the story to a satisfying close.",
        _ => "Continue the story from the previous part.",
    };
    format!(
        "Write part {part} of {parts} of a narrated slideshow video about \"{topic}\" \
         (category: {category}). {position}\n\
         Respond with JSON only, no commentary, in exactly this shape:\n\
         {{\"scenes\": [{{\"text\": \"narration for the scene\", \
         \"image_prompt\": \"visual description of the scene\"}}]}}\n\
         Use 3 to 6 scenes. Each text is one or two spoken sentences."
    )
}

/// Drop surrounding whitespace and at most one Markdown code fence.
fn strip_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // skip the info string ("json") on the opening fence line
    match body.find('\n') {
        Some(nl) => body[nl + 1..].trim(),
        None => body.trim(),
    }
}

/// Parse the text backend's reply into scenes numbered from `first_index`.
///
/// # Errors
///
/// [`rf_core::Error::Backend`] if the reply is not exactly
/// `{"scenes": [{"text", "image_prompt"}]}` or has no scenes.
pub fn parse_script(raw: &str, first_index: usize) -> rf_core::Result<Vec<SceneSpec>> {
    let response: ScriptResponse = serde_json::from_str(strip_fence(raw))
        .map_err(|e| rf_core::Error::backend("text", format!("malformed script JSON: {e}")))?;
    if response.scenes.is_empty() {
        return Err(rf_core::Error::backend("text", "script has no scenes"));
    }
    Ok(response
        .scenes
        .into_iter()
        .enumerate()
        .map(|(i, s)| SceneSpec::new(first_index + i, s.text, s.image_prompt))
        .collect())
}

/// Build the part from a raw reply, continuing the global scene numbering.
pub fn parse_part(raw: &str, part_number: u32, first_index: usize) -> rf_core::Result<PartSpec> {
    Ok(PartSpec::new(part_number, parse_script(raw, first_index)?))
}
