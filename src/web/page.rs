//! Server-rendered HTML for the form and result pages

use crate::config::{Background, SizePreset};
use crate::studio::GeneratedPhoto;
use base64::Engine;
use std::fmt::Write;

/// Shown next to every error
pub const RETRY_HINT: &str = "If this is the first run, the segmentation model is still being \
     downloaded and may take a few dozen seconds. Please refresh the page and try again.";

const STYLE: &str = r#"
    html, body {
        font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, Helvetica, Arial, sans-serif;
        background-color: #F5F5F7;
        color: #1D1D1F;
        margin: 0;
    }
    main { max-width: 860px; margin: 0 auto; padding: 2rem 1.5rem; }
    h1 { font-weight: 700; letter-spacing: -0.5px; margin-bottom: 0.2rem; }
    .subtitle { color: #6E6E73; margin-top: 0; }
    form, .card {
        background: #FFFFFF;
        border-radius: 18px;
        box-shadow: 0 4px 20px rgba(0,0,0,0.05);
        padding: 1.5rem;
        margin-top: 1.5rem;
    }
    fieldset { border: none; padding: 0; margin: 0 0 1.2rem 0; }
    legend { font-weight: 600; margin-bottom: 0.5rem; }
    select { font-size: 1rem; padding: 0.4rem; border-radius: 8px; }
    .swatch { display: inline-block; width: 0.9rem; height: 0.9rem; border-radius: 50%;
              vertical-align: middle; border: 1px solid #D2D2D7; margin-right: 0.3rem; }
    .upload { border: 1px dashed #D2D2D7; border-radius: 12px; padding: 1rem; }
    button, a.download {
        display: block; width: 100%; box-sizing: border-box; text-align: center;
        background-color: #007AFF; color: white; border: none; border-radius: 12px;
        padding: 0.7rem 1.2rem; font-weight: 600; font-size: 1rem; text-decoration: none;
        box-shadow: 0 2px 4px rgba(0,122,255,0.2); cursor: pointer; margin-top: 1rem;
    }
    button:hover, a.download:hover { background-color: #0051A8; }
    .columns { display: flex; gap: 1.5rem; align-items: flex-start; }
    .columns > figure { margin: 0; flex: 1; }
    .columns > figure.result { flex: 2; }
    img { max-width: 100%; border-radius: 12px; box-shadow: 0 4px 12px rgba(0,0,0,0.1); }
    .checker { background: repeating-conic-gradient(#E5E5E5 0% 25%, #FFFFFF 0% 50%) 50% / 16px 16px; }
    .success { background-color: #E8F2E8; border-radius: 10px; padding: 0.8rem 1rem; }
    .error { background-color: #FDECEA; border-radius: 10px; padding: 0.8rem 1rem; }
    .hint { background-color: #FFF8E1; border-radius: 10px; padding: 0.8rem 1rem; margin-top: 0.6rem; }
"#;

/// Escape text for HTML element and attribute content
#[must_use]
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// `data:` URI for inline previews and the download link
#[must_use]
pub fn data_uri(mime_type: &str, bytes: &[u8]) -> String {
    format!(
        "data:{mime_type};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

fn layout(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>iPhoto ID - ID Photo Studio</title>
<style>{STYLE}</style>
</head>
<body>
<main>
<h1>📸 iPhoto ID</h1>
<p class="subtitle">Simple, private, professional ID photos</p>
{body}
</main>
</body>
</html>"#
    )
}

fn form(selected_preset: SizePreset, selected_background: Background) -> String {
    let mut presets = String::new();
    for preset in SizePreset::ALL {
        let (width, height) = preset.dimensions();
        let selected = if preset == selected_preset { " selected" } else { "" };
        let _ = writeln!(
            presets,
            r#"<option value="{}"{selected}>{} ({width}×{height})</option>"#,
            preset.key(),
            escape_html(preset.label()),
        );
    }

    let mut backgrounds = String::new();
    for background in Background::ALL {
        let checked = if background == selected_background { " checked" } else { "" };
        let swatch = match background.color() {
            Some(_) => format!(r#"class="swatch" style="background:{}""#, background.css_color()),
            None => r#"class="swatch checker""#.to_string(),
        };
        let _ = writeln!(
            backgrounds,
            r#"<label><input type="radio" name="background" value="{}"{checked}> <span {swatch}></span>{}</label><br>"#,
            background.key(),
            escape_html(background.label()),
        );
    }

    format!(
        r#"<form action="/generate" method="post" enctype="multipart/form-data">
<fieldset>
<legend>1. Size</legend>
<select name="preset">
{presets}</select>
</fieldset>
<fieldset>
<legend>2. Background</legend>
{backgrounds}</fieldset>
<fieldset>
<legend>3. Photo</legend>
<div class="upload"><input type="file" name="photo" accept="image/jpeg,image/png" required></div>
</fieldset>
<button type="submit">✨ Generate ID photo</button>
</form>"#
    )
}

/// The upload form, optionally with an error and the retry hint above it
#[must_use]
pub fn render_form(preset: SizePreset, background: Background, error: Option<&str>) -> String {
    let mut body = String::new();
    if let Some(error) = error {
        let _ = write!(
            body,
            r#"<div class="card"><div class="error">Something went wrong: {}</div><div class="hint">💡 {}</div></div>"#,
            escape_html(error),
            RETRY_HINT
        );
    }
    body.push_str(&form(preset, background));
    layout(&body)
}

/// Original and generated photo side by side with a download link
#[must_use]
pub fn render_result(original: &[u8], original_mime: &str, photo: &GeneratedPhoto) -> String {
    let (width, height) = photo.dimensions;
    let result_uri = data_uri(photo.mime_type(), &photo.bytes);
    let checker = if photo.format.supports_transparency() {
        " checker"
    } else {
        ""
    };

    let body = format!(
        r#"<div class="card">
<div class="success">✅ Done! Generated in {total_ms} ms</div>
<div class="columns">
<figure><img src="{original_uri}" alt="Original photo"><figcaption>Original photo</figcaption></figure>
<figure class="result"><img class="{checker}" src="{result_uri}" alt="ID photo"><figcaption>{label} · {width}×{height} · {background}</figcaption></figure>
</div>
<a class="download" href="{result_uri}" download="{file_name}">⬇️ Save {file_name}</a>
</div>
{form}"#,
        total_ms = photo.timings.total_ms,
        original_uri = data_uri(original_mime, original),
        label = escape_html(photo.preset.label()),
        background = escape_html(photo.background.label()),
        file_name = escape_html(&photo.file_name()),
        form = form(photo.preset, photo.background),
    );
    layout(&body)
}
