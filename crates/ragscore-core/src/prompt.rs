// Prompt template rendering
//
// Metrics keep their prompts as module constants with `{key}` holes and
// render them here; user content is never spliced by hand-written
// concatenation.

/// Substitute `{key}` holes in the template with the given values.
///
/// Unknown holes are left as-is so a typo shows up verbatim in the echoed
/// request instead of silently vanishing.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}
