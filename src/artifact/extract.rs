//! Free-form text to deliverable files.
//!
//! Strategies run in a fixed order and each match contributes. Extraction is
//! pure and deterministic: the same input always yields the same files with
//! the same names, which is what makes rerun deduplication work at the
//! naming layer.

use std::collections::HashSet;

/// One file pulled out of raw LLM output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedFile {
    pub name: String,
    pub content: String,
}

/// Derive the deliverable base name from a task title.
/// Lowercase alphanumerics with `_` separators, bounded length, `code` when
/// nothing usable remains.
pub fn slug(title: &str) -> String {
    let mut out = String::new();
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        return "code".to_string();
    }
    trimmed.chars().take(40).collect::<String>()
        .trim_matches('_')
        .to_string()
}

/// Apply every strategy in order and name the results.
///
/// Name collisions within one extraction accumulate suffixes:
/// `base.ext`, `base_1.ext`, `base_1_2.ext`, ...
pub fn extract(title: &str, raw: &str) -> Vec<ExtractedFile> {
    let base = slug(title);
    let mut used: HashSet<String> = HashSet::new();
    let mut files: Vec<ExtractedFile> = Vec::new();

    // Strategy 1: fenced code blocks, one file per block.
    let (fenced, remainder) = split_fenced_blocks(raw);
    for block in &fenced {
        if block.content.trim().is_empty() {
            continue;
        }
        let ext = extension_for_tag(&block.tag);
        files.push(ExtractedFile {
            name: unique_name(&mut used, &base, ext),
            content: block.content.trim().to_string(),
        });
    }

    let has_ext = |files: &[ExtractedFile], ext: &str| {
        files.iter().any(|f| f.name.ends_with(&format!(".{}", ext)))
    };

    // Strategy 2: unfenced inline HTML document.
    if !has_ext(&files, "html") {
        if let Some(html) = find_inline_html(&remainder) {
            files.push(ExtractedFile {
                name: unique_name(&mut used, &base, "html"),
                content: html,
            });
        }
    }

    // Strategy 3: CSS rule bodies.
    if !has_ext(&files, "css") {
        if let Some(css) = find_inline_css(&remainder) {
            files.push(ExtractedFile {
                name: unique_name(&mut used, &base, "css"),
                content: css,
            });
        }
    }

    // Strategy 4: JavaScript statement paragraphs.
    if !has_ext(&files, "js") {
        if let Some(js) = find_inline_js(&remainder) {
            files.push(ExtractedFile {
                name: unique_name(&mut used, &base, "js"),
                content: js,
            });
        }
    }

    // Strategy 5: "permission to write" prose with the body in a following
    // paragraph. Only fires when nothing else matched; the model described
    // code instead of emitting it.
    if files.is_empty() {
        if let Some((ext, body)) = find_permission_body(raw) {
            files.push(ExtractedFile {
                name: unique_name(&mut used, &base, ext),
                content: body,
            });
        }
    }

    files
}

struct FencedBlock {
    tag: String,
    content: String,
}

/// Split out ```tag ... ``` regions. Returns the blocks and the text with
/// those regions removed, so later strategies do not re-capture them.
fn split_fenced_blocks(raw: &str) -> (Vec<FencedBlock>, String) {
    let mut blocks = Vec::new();
    let mut remainder = String::with_capacity(raw.len());
    let mut current: Option<FencedBlock> = None;

    for line in raw.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("```") {
            match current.take() {
                Some(block) => blocks.push(block),
                None => {
                    current = Some(FencedBlock {
                        tag: rest.trim().to_lowercase(),
                        content: String::new(),
                    });
                }
            }
            continue;
        }

        match current.as_mut() {
            Some(block) => {
                block.content.push_str(line);
                block.content.push('\n');
            }
            None => {
                remainder.push_str(line);
                remainder.push('\n');
            }
        }
    }

    // An unterminated fence still counts as a block.
    if let Some(block) = current.take() {
        blocks.push(block);
    }

    (blocks, remainder)
}

fn extension_for_tag(tag: &str) -> &str {
    match tag {
        "html" | "htm" => "html",
        "css" => "css",
        "javascript" | "js" => "js",
        "python" | "py" => "py",
        "json" => "json",
        "rust" | "rs" => "rs",
        "ts" | "typescript" => "ts",
        "sh" | "bash" | "shell" => "sh",
        "toml" => "toml",
        "yaml" | "yml" => "yaml",
        "sql" => "sql",
        "md" | "markdown" => "md",
        _ => "txt",
    }
}

fn find_inline_html(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let start = lower.find("<!doctype").or_else(|| lower.find("<html"))?;
    let end_tag = "</html>";
    let end = lower[start..].find(end_tag)? + start + end_tag.len();
    let html = text[start..end].trim().to_string();
    if html.len() > 50 {
        Some(html)
    } else {
        None
    }
}

/// Line-oriented CSS scan: capture consecutive `selector { ... }` rules.
fn find_inline_css(text: &str) -> Option<String> {
    let mut captured = String::new();
    let mut depth = 0usize;
    let mut in_rule = false;

    for line in text.lines() {
        let trimmed = line.trim();
        if !in_rule {
            if is_css_selector_line(trimmed) {
                in_rule = true;
                let opens = trimmed.matches('{').count();
                depth = opens.saturating_sub(trimmed.matches('}').count());
                captured.push_str(trimmed);
                captured.push('\n');
                if depth == 0 {
                    in_rule = false;
                }
            }
        } else {
            captured.push_str(trimmed);
            captured.push('\n');
            depth += trimmed.matches('{').count();
            depth = depth.saturating_sub(trimmed.matches('}').count());
            if depth == 0 {
                in_rule = false;
            }
        }
    }

    let captured = captured.trim().to_string();
    if captured.len() > 30 && captured.contains('{') && captured.contains('}') {
        Some(captured)
    } else {
        None
    }
}

/// A selector line looks like `.card {`, `#app {`, `body {` or `* {` with no
/// parentheses (which would indicate prose or JS).
fn is_css_selector_line(line: &str) -> bool {
    if !line.ends_with('{') || line.contains('(') {
        return false;
    }
    let selector = line[..line.len() - 1].trim();
    if selector.is_empty() || selector.len() > 80 {
        return false;
    }
    selector.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(c, '.' | '#' | ' ' | ',' | ':' | '-' | '_' | '*' | '>' | '[' | ']' | '=' | '"')
    })
}

const JS_STARTERS: &[&str] = &[
    "function ",
    "const ",
    "let ",
    "var ",
    "class ",
    "document.",
    "window.",
    "export ",
    "import ",
];

/// Capture paragraphs that open like JavaScript statements.
fn find_inline_js(text: &str) -> Option<String> {
    let mut captured = String::new();

    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        let first_line = trimmed.lines().next().unwrap_or("");
        let starts_like_js = JS_STARTERS.iter().any(|s| first_line.starts_with(s))
            || (first_line.contains("=>") && first_line.contains('='));
        if starts_like_js {
            captured.push_str(trimmed);
            captured.push_str("\n\n");
        }
    }

    let captured = captured.trim().to_string();
    if captured.len() > 30 {
        Some(captured)
    } else {
        None
    }
}

const PERMISSION_PHRASES: &[&str] = &[
    "permission to write",
    "need permissions",
    "once permissions are granted",
    "would you like me to save",
    "ready to be saved",
];

/// The model asked for permission instead of writing the file; salvage the
/// body it proposed from the paragraph after the request.
fn find_permission_body(raw: &str) -> Option<(&'static str, String)> {
    let lower = raw.to_lowercase();
    let phrase_at = PERMISSION_PHRASES
        .iter()
        .filter_map(|p| lower.find(p).map(|i| i + p.len()))
        .min()?;

    // Skip the rest of the paragraph containing the request itself; the
    // proposed body is the block after it.
    let after = &raw[phrase_at..];
    let body = after
        .split("\n\n")
        .skip(1)
        .map(str::trim)
        .find(|p| p.len() > 20)?
        .to_string();

    let context = &lower[phrase_at.saturating_sub(200)..(phrase_at + 200).min(lower.len())];
    let ext = if context.contains("html") {
        "html"
    } else if context.contains("css") {
        "css"
    } else if context.contains("javascript") || context.contains(" js ") {
        "js"
    } else {
        "txt"
    };

    Some((ext, body))
}

fn unique_name(used: &mut HashSet<String>, base: &str, ext: &str) -> String {
    let mut stem = base.to_string();
    let mut counter = 1;
    let mut name = format!("{}.{}", stem, ext);
    while used.contains(&name) {
        stem = format!("{}_{}", stem, counter);
        counter += 1;
        name = format!("{}.{}", stem, ext);
    }
    used.insert(name.clone());
    name
}
