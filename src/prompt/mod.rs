use crate::wire::RequirementsRecord;

pub fn system_prompt_amplify() -> String {
    r#"You are a senior web developer and UI/UX designer. Analyze the user's request and any uploaded image to produce comprehensive web development requirements.

If an image is attached: replicate its design 1:1. Match the exact layout, colors, typography, spacing and every visual element shown in the image.

Return EXACTLY ONE JSON object (no prose) with this structure:

{
  "structural_demand": {
    "purpose": "What the webpage/app achieves",
    "layout": "Detailed HTML structure, sections, components needed",
    "content": "Text content, headings, labels, placeholder text",
    "semantic_structure": "HTML5 semantic elements, accessibility considerations"
  },
  "styling_demand": {
    "visual_design": "Colors, typography, spacing, visual hierarchy",
    "responsive_design": "Mobile, tablet, desktop layout requirements",
    "animations": "Hover effects, transitions, micro-interactions",
    "design_system": "Consistent spacing, color palette, component styles"
  },
  "scripting_demand": {
    "interactions": "Button clicks, form handling, user interactions",
    "dynamic_content": "Content that changes based on user actions",
    "api_integration": "Data fetching, form submissions, external services",
    "functionality": "Core features, logic, state management needed"
  }
}

Instructions:
- Every value is a string. Be specific and detailed in each one.
- If replicating an image, describe exact visual elements, spacing and layout.
- Anticipate needs the user has not stated explicitly.
- Aim for a complete, functional web experience."#
        .to_string()
}

pub fn system_prompt_synthesize() -> String {
    r#"You are a senior front-end developer. Build a complete, production-ready static web project from the original request and the requirements analysis you are given.

LINKING (MANDATORY):
- You choose the relative path of each file ("fileDir").
- The HTML <link rel="stylesheet"> href MUST resolve, relative to the HTML file, to the css fileDir.
- The HTML <script src> MUST resolve, relative to the HTML file, to the js fileDir.
- Prefer "index.html" at the project root for the HTML file.

STANDARDS:
- Semantic HTML5 with accessibility attributes (labels, ARIA where useful, alt text).
- Modern responsive CSS using Flexbox and/or Grid; class names must match the HTML.
- Vanilla JavaScript (ES6+: const/let, arrow functions, modules not required) with input validation and error handling; query only elements that exist in the HTML.

Return EXACTLY ONE JSON object (no markdown, no prose) with exactly this structure:
{
  "html": { "fileDir": "relative/path/to/file.html", "content": "complete HTML" },
  "css":  { "fileDir": "relative/path/to/file.css",  "content": "complete CSS" },
  "js":   { "fileDir": "relative/path/to/file.js",   "content": "complete JavaScript" }
}
Never use absolute paths or ".." in fileDir."#
        .to_string()
}

/// Stage-2 user content: the original request followed by the full stage-1
/// record, pretty-printed.
pub fn user_prompt_synthesize(original_prompt: &str, requirements: &RequirementsRecord) -> String {
    let requirements_json = serde_json::to_string_pretty(requirements).unwrap_or_else(|_| "{}".to_string());
    format!(
"ORIGINAL REQUEST:
{original_prompt}

AMPLIFIED REQUIREMENTS AND ANALYSIS:
{requirements_json}

Based on both the original request and the detailed analysis above, create the complete web project.",
original_prompt = original_prompt.trim(),
requirements_json = requirements_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn synthesis_context_carries_prompt_and_every_section() {
        let rec: RequirementsRecord = serde_json::from_value(json!({
            "structural_demand": { "purpose": "Collect contact details" },
            "styling_demand": { "visual_design": "Teal accents" },
            "scripting_demand": { "interactions": "Validate on submit" }
        }))
        .unwrap();
        let text = user_prompt_synthesize("  Create a contact form  ", &rec);
        assert!(text.starts_with("ORIGINAL REQUEST:\nCreate a contact form\n"));
        for needle in ["structural_demand", "styling_demand", "scripting_demand", "Teal accents", "Validate on submit"] {
            assert!(text.contains(needle), "missing {needle}");
        }
    }

    #[test]
    fn instructions_name_the_record_shapes() {
        let amp = system_prompt_amplify();
        for key in RequirementsRecord::KEYS {
            assert!(amp.contains(key));
        }
        let syn = system_prompt_synthesize();
        assert!(syn.contains("\"fileDir\""));
        assert!(syn.contains("\"html\"") && syn.contains("\"css\"") && syn.contains("\"js\""));
    }
}
