use regex::Regex;

/// Inline tags that survive sanitization. Attributes are never kept.
const ALLOWED_TAGS: &[&str] = &["b", "strong", "i", "em", "br"];

/// Cleans user-supplied text before it is stored: markup outside a small
/// allow-list is stripped (script and style bodies included), the remaining
/// text is HTML-escaped, and bare URLs become links.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    dangerous_block: Regex,
    tag: Regex,
    allowed_tag: Regex,
    url: Regex,
}

impl Sanitizer {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            dangerous_block: Regex::new(r"(?is)<(script|style)\b[^>]*>.*?</(script|style)\s*>")?,
            tag: Regex::new(r"(?s)</?[a-zA-Z][^<>]*>|<!--.*?-->")?,
            allowed_tag: Regex::new(r"^<(/?)([a-zA-Z]+)\b[^>]*>$")?,
            url: Regex::new(r"(?i)\b(?:https?://|www\.)[^\s<>]+")?,
        })
    }

    pub fn clean(&self, input: &str) -> String {
        let without_blocks = self.dangerous_block.replace_all(input, "");

        let mut out = String::with_capacity(without_blocks.len());
        let mut last = 0;
        for tag in self.tag.find_iter(&without_blocks) {
            self.push_text(&mut out, &without_blocks[last..tag.start()]);
            if let Some(kept) = self.normalize_tag(tag.as_str()) {
                out.push_str(&kept);
            }
            last = tag.end();
        }
        self.push_text(&mut out, &without_blocks[last..]);

        out.trim().to_string()
    }

    fn normalize_tag(&self, tag: &str) -> Option<String> {
        let caps = self.allowed_tag.captures(tag)?;
        let closing = !caps[1].is_empty();
        let name = caps[2].to_ascii_lowercase();
        if !ALLOWED_TAGS.contains(&name.as_str()) {
            return None;
        }
        if name == "br" {
            return (!closing).then(|| "<br>".to_string());
        }
        Some(if closing {
            format!("</{}>", name)
        } else {
            format!("<{}>", name)
        })
    }

    /// Escapes a run of plain text and links any bare URLs in it.
    fn push_text(&self, out: &mut String, text: &str) {
        let mut last = 0;
        for found in self.url.find_iter(text) {
            let url = trim_url(found.as_str());
            let end = found.start() + url.len();
            out.push_str(&escape(&text[last..found.start()]));

            let href = if url.to_ascii_lowercase().starts_with("www.") {
                format!("https://{}", url)
            } else {
                url.to_string()
            };
            out.push_str(&format!(
                "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                escape(&href),
                escape(url)
            ));
            last = end;
        }
        out.push_str(&escape(&text[last..]));
    }
}

/// Sentence punctuation directly after a URL belongs to the sentence.
fn trim_url(url: &str) -> &str {
    url.trim_end_matches(['.', ',', '!', '?', ';', ':', ')', '\'', '"'])
}

pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Reduces stored message markup back to plain text for previews: tags are
/// dropped and entities decoded.
pub fn plain_text(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}
