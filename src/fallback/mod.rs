use crate::wire::{FileBundle, FileEntry};

/// How much of the unusable reply is shown on the fallback page.
pub const EXCERPT_CHARS: usize = 200;

pub const HTML_PATH: &str = "index.html";
pub const CSS_PATH: &str = "styles/style.css";
pub const JS_PATH: &str = "scripts/script.js";

const FALLBACK_CSS: &str = r#"/* Generated CSS */
.container {
    max-width: 1200px;
    margin: 0 auto;
    padding: 20px;
    font-family: Arial, sans-serif;
}

h1 {
    color: #333;
    text-align: center;
}

p {
    line-height: 1.6;
    color: #666;
}
"#;

const FALLBACK_JS: &str = r#"// Generated JavaScript
document.addEventListener('DOMContentLoaded', function () {
    console.log('Project loaded successfully');

    const container = document.querySelector('.container');
    if (container) {
        container.addEventListener('click', function () {
            console.log('Container clicked');
        });
    }
});
"#;

/// Minimal self-consistent project used when synthesis gives us nothing
/// usable. Embeds the first [`EXCERPT_CHARS`] characters of the original
/// reply (HTML-escaped) so an operator can see what went wrong.
pub fn fallback(original_response_text: &str) -> FileBundle {
    let excerpt: String = original_response_text.chars().take(EXCERPT_CHARS).collect();
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Generated Project</title>
    <link rel="stylesheet" href="{css}">
</head>
<body>
    <div class="container">
        <h1>Generated Project</h1>
        <p>Content generated from: {excerpt}...</p>
    </div>
    <script src="{js}"></script>
</body>
</html>
"#,
        css = CSS_PATH,
        js = JS_PATH,
        excerpt = escape_html(&excerpt),
    );

    FileBundle {
        html: FileEntry { file_dir: HTML_PATH.into(), content: html },
        css: FileEntry { file_dir: CSS_PATH.into(), content: FALLBACK_CSS.into() },
        js: FileEntry { file_dir: JS_PATH.into(), content: FALLBACK_JS.into() },
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
