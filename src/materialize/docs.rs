use crate::wire::RequirementsRecord;

pub const DOC_FILE: &str = "PROJECT_REQUIREMENTS.md";

/// Human-readable summary of the requirements record, one section per demand.
pub fn render_requirements(rec: &RequirementsRecord) -> String {
    let mut doc = String::from("# Project Requirements and Analysis\n");
    for (title, fields) in rec.sections() {
        doc.push_str(&format!("\n## {title}\n"));
        for (key, value) in fields {
            doc.push_str(&format!("- {}: {}\n", title_case(key), value));
        }
    }
    doc.push_str("\n---\n*Generated automatically from user requirements*\n");
    doc
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
