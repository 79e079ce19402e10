//! HTML for the submission page.

/// Escape text for use inside HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
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

/// Render the page: language picker, code box, and the last output if any.
pub fn index_page(languages: &[&str], selected: &str, code: &str, output: Option<&str>) -> String {
    let options: String = languages
        .iter()
        .map(|lang| {
            let lang = escape_html(lang);
            let attr = if lang == escape_html(selected) {
                " selected"
            } else {
                ""
            };
            format!(r#"<option value="{lang}"{attr}>{lang}</option>"#)
        })
        .collect();

    let output_block = output.map_or_else(String::new, |out| {
        format!(
            "<h2>Output</h2>\n<pre id=\"output\">{}</pre>\n",
            escape_html(out)
        )
    });

    format!(
        r#"<!DOCTYPE html>
<html><head>
<meta charset="utf-8">
<title>Snippet Sandbox</title>
</head><body>
<h1>Snippet Sandbox</h1>
<form method="post" action="/">
<select name="language">{options}</select>
<br>
<textarea name="code" rows="16" cols="80">{code}</textarea>
<br>
<button type="submit">Run</button>
</form>
{output_block}<hr>
<address>{name}/{version}</address>
</body></html>
"#,
        code = escape_html(code),
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    )
}
