//! ASCII guardrails for subprocess boundaries.
//!
//! The host terminal encoding cannot be assumed, so every string crossing a
//! subprocess boundary is forced down to 7-bit ASCII in both directions.
//! Known Unicode symbols map through a fixed replacement table; anything
//! else above 0x7F becomes `?`. Sanitization is idempotent.

/// A single non-ASCII character found by [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// 1-based line number.
    pub line: usize,
    /// 1-based column (in characters) within the line.
    pub column: usize,
    pub character: char,
    /// `U+XXXX` form for logging.
    pub code_point: String,
    /// Replacement from the table, when one exists.
    pub suggestion: Option<&'static str>,
}

/// Fixed replacement table for characters the LLM tools commonly emit.
/// Multi-codepoint emoji (variation selectors) are listed before their bare
/// forms so the longer sequence wins.
const REPLACEMENTS: &[(&str, &str)] = &[
    // Arrows and comparison symbols
    ("\u{2192}", "->"),
    ("\u{2190}", "<-"),
    ("\u{21D2}", "=>"),
    ("\u{2264}", "<="),
    ("\u{2265}", ">="),
    ("\u{2260}", "!="),
    ("\u{2261}", "=="),
    ("\u{2234}", "// therefore"),
    ("\u{2235}", "// because"),
    // Status symbols
    ("\u{2705}", "[PASS]"),
    ("\u{274C}", "[FAIL]"),
    ("\u{26A0}\u{FE0F}", "[WARN]"),
    ("\u{26A0}", "[WARN]"),
    ("\u{1F504}", "[PROGRESS]"),
    ("\u{1F4CB}", "[INFO]"),
    ("\u{23F3}", "[PENDING]"),
    ("\u{1F3AF}", "[TARGET]"),
    ("\u{1F6A8}", "[ALERT]"),
    ("\u{1F4A1}", "[IDEA]"),
    ("\u{1F4CA}", "[DATA]"),
    ("\u{1F50D}", "[SEARCH]"),
    ("\u{2B50}", "[STAR]"),
    ("\u{1F389}", "[SUCCESS]"),
    ("\u{1F4A5}", "[ERROR]"),
    ("\u{2713}", "OK"),
    ("\u{2717}", "X"),
    ("\u{2139}", "i"),
    // UI symbols
    ("\u{1F4C4}", "[DOC]"),
    ("\u{1F680}", "[START]"),
    ("\u{1F527}", "[CONFIG]"),
    ("\u{23F9}\u{FE0F}", "[STOP]"),
    ("\u{23F9}", "[STOP]"),
    ("\u{1F9EA}", "[TEST]"),
    ("\u{1F4C1}", "[FOLDER]"),
    ("\u{1F310}", "[WEB]"),
    ("\u{1F4F1}", "[MOBILE]"),
];

fn lookup(c: char) -> Option<&'static str> {
    let mut buf = [0u8; 4];
    let s: &str = c.encode_utf8(&mut buf);
    REPLACEMENTS
        .iter()
        .find(|(from, _)| *from == s)
        .map(|(_, to)| *to)
}

/// Map text down to 7-bit ASCII.
///
/// Known symbols go through the replacement table (including two-codepoint
/// emoji sequences); any remaining character above 0x7F becomes `?`.
pub fn sanitize(text: &str) -> String {
    if text.is_ascii() {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii() {
            out.push(c);
            continue;
        }

        // Emoji followed by a variation selector map as one unit.
        if let Some(&next) = chars.peek() {
            if next == '\u{FE0F}' {
                let mut pair = String::with_capacity(8);
                pair.push(c);
                pair.push(next);
                if let Some((_, to)) = REPLACEMENTS.iter().find(|(from, _)| *from == pair) {
                    out.push_str(to);
                    chars.next();
                    continue;
                }
            }
        }

        match lookup(c) {
            Some(replacement) => out.push_str(replacement),
            None => out.push('?'),
        }
    }

    out
}

/// Scan text for non-ASCII characters without modifying it.
pub fn validate(text: &str) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (line_idx, line) in text.split('\n').enumerate() {
        for (col_idx, c) in line.chars().enumerate() {
            if !c.is_ascii() {
                violations.push(Violation {
                    line: line_idx + 1,
                    column: col_idx + 1,
                    character: c,
                    code_point: format!("U+{:04X}", c as u32),
                    suggestion: lookup(c),
                });
            }
        }
    }
    violations
}

pub fn is_clean(text: &str) -> bool {
    text.is_ascii()
}

/// Instructions appended to every outbound prompt so the model emits ASCII
/// in the first place instead of relying on the inbound scrub.
pub fn ascii_prompt_preamble() -> &'static str {
    "\n\nOUTPUT ENCODING REQUIREMENT:\n\
     - Emit ONLY ASCII characters (codes 0-127).\n\
     - No Unicode arrows; write ->, <-, =>, <=, >=, != instead.\n\
     - No check/cross marks or status emojis; write [PASS], [FAIL], [WARN],\n\
       [PROGRESS], [INFO], [PENDING] instead.\n\
     - Non-ASCII output will be lossily rewritten before it is stored.\n"
}
