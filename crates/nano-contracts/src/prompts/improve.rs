pub const TRANSPARENT_BACKGROUND_HINT: &str = "Please render the subject with a solid white background around the subject; avoid interior transparency.";

/// Joins the main prompt and the non-empty fragments with blank lines.
pub fn build_effective_prompt<S: AsRef<str>>(main: &str, fragments: &[S]) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(1 + fragments.len());
    if !main.trim().is_empty() {
        parts.push(main);
    }
    parts.extend(
        fragments
            .iter()
            .map(|fragment| fragment.as_ref().trim())
            .filter(|fragment| !fragment.is_empty()),
    );
    parts.join("\n\n")
}

/// Builds the user turn for an improvement round: the critique first, then
/// the instruction to apply it against the original prompt.
pub fn improvement_prompt(original_prompt: &str, critique: &str) -> String {
    let original = original_prompt.trim();
    let critique = critique.trim();
    let mut out = String::from("Critique of the latest image:\n\n");
    out.push_str(if critique.is_empty() {
        "(no critique provided)"
    } else {
        critique
    });
    out.push_str(
        "\n\nNow apply the critique above to improve the image. The image was generated with the \
         following original prompt:\n\n",
    );
    out.push_str(if original.is_empty() {
        "(no original prompt provided)"
    } else {
        original
    });
    out.push_str(
        "\n\nPrioritize items tagged [CRITICAL — persisted] first, then [MAJOR], then [MINOR]. \
         Use decisive, localized fixes and avoid regressions on items marked done. Then implement \
         the 'Targeted actions to apply now' if present.",
    );
    out
}

pub fn with_transparent_hint(prompt: &str) -> String {
    if prompt.trim().is_empty() {
        return TRANSPARENT_BACKGROUND_HINT.to_string();
    }
    format!("{prompt}\n\n{TRANSPARENT_BACKGROUND_HINT}")
}
