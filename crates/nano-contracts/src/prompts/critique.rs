const CRITIQUE_SCHEMA: &str = r#"{
  "keep_notes": [string, ...],
  "summary_keep": [string, ...],
  "summary_change": [string, ...],
  "edits": [
    {
      "id": string,
      "target": {
        "type": "object"|"region"|"global",
        "label": string,
        "bbox": { "x": number, "y": number, "w": number, "h": number } | null,
        "points": [ { "x": number, "y": number }, ... ] | null
      },
      "priority": "CRITICAL"|"MAJOR"|"MINOR",
      "instruction": string,
      "rationale": string,
      "done_when": string
    }
  ]
}"#;

const ESCALATION_HEADER: &str =
    "[CRITICAL — persisted] Fix unresolved items with imperative directives.";

/// Instruction sent with the latest image when asking for a critique. The
/// model is asked for next actions only, never for a recap of earlier rounds.
pub fn critique_instruction() -> String {
    let mut out = String::new();
    out.push_str(
        "You are an expert image QA reviewer. Given the latest generated image (not the original), \
         the original prompt, and any input reference images, return ONLY a single valid JSON object \
         describing exactly what to KEEP and what to CHANGE next. No prose outside JSON.\n\n",
    );
    out.push_str("Use this exact schema:\n\n");
    out.push_str(CRITIQUE_SCHEMA);
    out.push_str("\n\nRules:\n");
    out.push_str("- JSON must be strictly valid and parseable; no markdown code fences.\n");
    out.push_str("- No text outside the JSON object.\n");
    out.push_str("- Coordinates normalized 0-1 relative to image width/height.\n");
    out.push_str("- Max 8 edits; prioritize CRITICAL then MAJOR then MINOR.\n");
    out
}

/// Merges a previous critique with the current one under an escalation
/// header so items that survived a round get fixed first.
pub fn escalate_unresolved(previous: &str, current: &str) -> String {
    let merged = format!("{previous}\n\n{current}");
    let merged = merged.trim();
    if merged.is_empty() {
        return String::new();
    }
    format!("{ESCALATION_HEADER}\n\n{merged}")
}
