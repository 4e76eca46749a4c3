//! Normalizes raw model output into the lightweight markup the document accepts.
//!
//! Runs once at commit time:
//! 1. decode HTML entities
//! 2. drop backslash escapes in front of markup punctuation
//! 3. if any HTML tag is present, rewrite it with the tag table below
//! 4. collapse runs of blank lines to a single blank line
//!
//! Fenced and inline code is set aside during step 3, so `Vec<String>` in a
//! code span is never mistaken for a tag.
//!
//! The HTML rewrite is textual and covers only the tags generation prompts
//! allow. Nested or malformed HTML outside that vocabulary is lossy: unknown
//! tags are dropped and their text kept.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Output of [`normalize`], ready for document insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedContent(String);

impl NormalizedContent {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Display for NormalizedContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

const ENTITIES: [(&str, &str); 5] = [
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&amp;", "&"),
];

/// Over-escaped output (`&amp;lt;`) needs more than one pass.
const MAX_ENTITY_PASSES: usize = 4;

const MAX_NORMALIZE_PASSES: usize = 8;

fn cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex must compile"))
}

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"</?[a-zA-Z][a-zA-Z0-9]*(?:\s[^<>]*)?/?>")
}

fn escaped_punct_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\\+([*_\[\]()`])")
}

fn doubled_backslash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\\{2,}")
}

fn code_span_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?s)```.*?```|`[^`\n]+`")
}

fn blank_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"\n(?:[ \t]*\n){2,}")
}

pub fn decode_entities(text: &str) -> String {
    let mut current = text.to_string();
    for _ in 0..MAX_ENTITY_PASSES {
        if !current.contains('&') {
            break;
        }
        let mut next = current.clone();
        for (entity, literal) in ENTITIES {
            next = next.replace(entity, literal);
        }
        if next == current {
            break;
        }
        current = next;
    }
    current
}

pub fn unescape_markup(text: &str) -> String {
    let text = escaped_punct_re().replace_all(text, "$1");
    doubled_backslash_re().replace_all(&text, r"\").into_owned()
}

pub fn contains_html(text: &str) -> bool {
    html_tag_re().is_match(text)
}

pub fn collapse_blank_lines(text: &str) -> String {
    blank_run_re().replace_all(text, "\n\n").into_owned()
}

type Rewrite = fn(&Captures) -> String;

/// One allow-listed tag and how it maps onto lightweight markup.
struct TagRule {
    pattern: &'static str,
    rewrite: Rewrite,
}

/// Order matters: block containers before their contents, and code before
/// inline emphasis so code spans are not re-emphasized.
const TAG_RULES: &[TagRule] = &[
    TagRule {
        pattern: r#"(?is)<pre[^>]*>\s*<code(?:\s+class="(?:language-)?([\w+-]+)")?[^>]*>(.*?)</code>\s*</pre>"#,
        rewrite: |c| format!("\n```{}\n{}\n```\n", cap(c, 1), cap(c, 2).trim_end_matches('\n')),
    },
    TagRule {
        pattern: r"(?is)<pre[^>]*>(.*?)</pre>",
        rewrite: |c| format!("\n```\n{}\n```\n", cap(c, 1).trim_end_matches('\n')),
    },
    TagRule {
        pattern: r"(?is)<code[^>]*>(.*?)</code>",
        rewrite: |c| format!("`{}`", cap(c, 1)),
    },
    TagRule {
        pattern: r"(?is)<h([1-6])[^>]*>(.*?)</h[1-6]>",
        rewrite: |c| {
            let level: usize = cap(c, 1).parse().unwrap_or(1);
            format!("\n{} {}\n\n", "#".repeat(level), cap(c, 2).trim())
        },
    },
    TagRule {
        pattern: r"(?is)<(?:strong|b)(?:\s[^>]*)?>(.*?)</(?:strong|b)>",
        rewrite: |c| format!("**{}**", cap(c, 1)),
    },
    TagRule {
        pattern: r"(?is)<(?:em|i)(?:\s[^>]*)?>(.*?)</(?:em|i)>",
        rewrite: |c| format!("*{}*", cap(c, 1)),
    },
    TagRule {
        pattern: r#"(?is)<a\s[^>]*?href="([^"]*)"[^>]*>(.*?)</a>"#,
        rewrite: |c| format!("[{}]({})", cap(c, 2), cap(c, 1)),
    },
    TagRule {
        pattern: r"(?i)<img(\s[^>]*)?/?>",
        rewrite: |c| {
            let attrs = cap(c, 1);
            format!("![{}]({})", attribute(attrs, "alt"), attribute(attrs, "src"))
        },
    },
    TagRule {
        pattern: r"(?is)<blockquote[^>]*>(.*?)</blockquote>",
        rewrite: |c| {
            let quoted: Vec<String> = cap(c, 1)
                .trim()
                .lines()
                .map(|line| format!("> {}", line.trim()).trim_end().to_string())
                .collect();
            format!("\n{}\n\n", quoted.join("\n"))
        },
    },
    TagRule {
        pattern: r"(?is)<ol[^>]*>(.*?)</ol>",
        rewrite: |c| {
            let items: Vec<String> = list_item_re()
                .captures_iter(cap(c, 1))
                .enumerate()
                .map(|(idx, item)| format!("{}. {}", idx + 1, cap(&item, 1).trim()))
                .collect();
            format!("\n{}\n\n", items.join("\n"))
        },
    },
    TagRule {
        pattern: r"(?is)<li[^>]*>(.*?)</li>",
        rewrite: |c| format!("- {}\n", cap(c, 1).trim()),
    },
    TagRule {
        pattern: r"(?i)</?ul[^>]*>",
        rewrite: |_| "\n".to_string(),
    },
    TagRule {
        pattern: r"(?i)<br\s*/?>",
        rewrite: |_| "\n".to_string(),
    },
    TagRule {
        pattern: r"(?i)<hr[^>]*>",
        rewrite: |_| "\n---\n".to_string(),
    },
    TagRule {
        pattern: r"(?is)<p[^>]*>(.*?)</p>",
        rewrite: |c| format!("{}\n\n", cap(c, 1).trim()),
    },
];

fn cap<'a>(captures: &'a Captures, idx: usize) -> &'a str {
    captures.get(idx).map(|m| m.as_str()).unwrap_or("")
}

fn list_item_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    cached(&RE, r"(?is)<li[^>]*>(.*?)</li>")
}

fn attribute<'a>(attrs: &'a str, name: &str) -> &'a str {
    let pattern = format!(r#"(?i)\b{}\s*=\s*"([^"]*)""#, name);
    match Regex::new(&pattern) {
        Ok(re) => re
            .captures(attrs)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
            .unwrap_or(""),
        Err(_) => "",
    }
}

fn compiled_rules() -> &'static [(Regex, Rewrite)] {
    static RULES: OnceLock<Vec<(Regex, Rewrite)>> = OnceLock::new();
    RULES.get_or_init(|| {
        TAG_RULES
            .iter()
            .map(|rule| {
                (
                    Regex::new(rule.pattern).expect("tag rule must compile"),
                    rule.rewrite,
                )
            })
            .collect()
    })
}

fn placeholder(idx: usize) -> String {
    format!("\u{E000}{}\u{E001}", idx)
}

/// Swap code spans for private-use placeholders, appending them to `spans`.
fn shelve_code(text: &str, spans: &mut Vec<String>) -> String {
    code_span_re()
        .replace_all(text, |c: &Captures| {
            spans.push(c[0].to_string());
            placeholder(spans.len() - 1)
        })
        .into_owned()
}

fn restore_code(text: &str, spans: &[String]) -> String {
    // Newest first: a later span may hold an earlier placeholder.
    spans
        .iter()
        .enumerate()
        .rev()
        .fold(text.to_string(), |acc, (idx, span)| acc.replace(&placeholder(idx), span))
}

fn rewrite_tags(html: &str, spans: &mut Vec<String>) -> String {
    let mut text = html.to_string();
    for (re, rewrite) in compiled_rules() {
        text = re.replace_all(&text, |c: &Captures| rewrite(c)).into_owned();
    }
    // Code produced by the rules above keeps its angle brackets.
    let mut text = shelve_code(&text, spans);
    // Stripping can join fragments like `<<b>i>` into a new tag.
    while contains_html(&text) {
        text = html_tag_re().replace_all(&text, "").into_owned();
    }
    text.trim().to_string()
}

/// Rewrite allow-listed HTML into lightweight markup and drop any other tag.
pub fn html_to_markup(html: &str) -> String {
    let mut spans = Vec::new();
    let shelved = shelve_code(html, &mut spans);
    let text = rewrite_tags(&shelved, &mut spans);
    restore_code(&text, &spans)
}

fn normalize_pass(raw: &str) -> String {
    let text = decode_entities(raw);
    let text = unescape_markup(&text);
    let mut spans = Vec::new();
    let text = shelve_code(&text, &mut spans);
    let text = if contains_html(&text) {
        rewrite_tags(&text, &mut spans)
    } else {
        text
    };
    collapse_blank_lines(&restore_code(&text, &spans))
}

/// Produce insertion-ready content from a raw output buffer.
///
/// Passes repeat until the text is stable, since dropping a tag can expose a
/// new entity or escape (`&l<b>t;`).
pub fn normalize(raw: &str) -> NormalizedContent {
    let mut text = normalize_pass(raw);
    for _ in 1..MAX_NORMALIZE_PASSES {
        let next = normalize_pass(&text);
        if next == text {
            break;
        }
        text = next;
    }
    NormalizedContent(text)
}
