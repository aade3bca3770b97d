//! Lightweight HTML extraction used by the scraping capability and the
//! native strategies. This is not a conforming HTML parser; it only needs to
//! pull titles, anchors and readable text out of municipal pages.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("title pattern"));
static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a>").expect("anchor pattern"));
static HREF_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#).expect("href pattern")
});
static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern"));
// The regex crate has no backreferences, so each non-content element gets its own arm.
static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<nav\b.*?</nav>|<header\b.*?</header>|<footer\b.*?</footer>",
    )
    .expect("noise pattern")
});
static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>").expect("script pattern")
});
static BLOCK_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:p|div|li|tr|td|th|h[1-6]|br|section|article|main|table|ul|ol|dl|dt|dd)\b[^>]*>")
        .expect("block pattern")
});
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]+>").expect("tag pattern"));
static NUMERIC_ENTITY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|[0-9]+);").expect("entity pattern"));
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\r\u{a0}]+").expect("space pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    pub text: String,
}

pub fn page_title(html: &str) -> Option<String> {
    TITLE_RE
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| clean_text(m.as_str()))
        .filter(|t| !t.is_empty())
}

/// Every anchor with both an href and visible text, resolved against `base`
/// when one is given.
pub fn extract_links(html: &str, base: Option<&Url>) -> Vec<Link> {
    let html = COMMENT_RE.replace_all(html, "");
    let html = SCRIPT_RE.replace_all(&html, "");
    let mut links = Vec::new();
    for anchor in ANCHOR_RE.captures_iter(&html) {
        let attrs = anchor.get(1).map(|m| m.as_str()).unwrap_or("");
        let Some(href) = HREF_RE.captures(attrs).and_then(|c| {
            c.get(1)
                .or_else(|| c.get(2))
                .or_else(|| c.get(3))
                .map(|m| decode_entities(m.as_str().trim()))
        }) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') || href.to_lowercase().starts_with("javascript:") {
            continue;
        }
        let text = clean_text(anchor.get(2).map(|m| m.as_str()).unwrap_or(""));
        if text.is_empty() {
            continue;
        }
        let url = match base {
            Some(base) => base
                .join(&href)
                .map(|u| u.to_string())
                .unwrap_or(href),
            None => href,
        };
        links.push(Link { url, text });
    }
    links
}

/// Readable text blocks with navigation, scripts and styling removed.
/// Blocks shorter than `min_chars` are dropped as menu or label noise.
pub fn text_blocks(html: &str, min_chars: usize) -> Vec<String> {
    let html = COMMENT_RE.replace_all(html, "");
    let html = NOISE_RE.replace_all(&html, "\n");
    let html = BLOCK_BREAK_RE.replace_all(&html, "\n");
    let text = TAG_RE.replace_all(&html, " ");
    let text = decode_entities(&text);

    text.split('\n')
        .map(|line| SPACE_RE.replace_all(line, " ").trim().to_string())
        .filter(|line| line.chars().count() >= min_chars)
        .collect()
}

/// Strip markup from a fragment and collapse whitespace.
pub fn clean_text(fragment: &str) -> String {
    let stripped = TAG_RE.replace_all(fragment, " ");
    let decoded = decode_entities(&stripped);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn decode_entities(text: &str) -> String {
    let named = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'");
    let numeric = NUMERIC_ENTITY_RE.replace_all(&named, |caps: &regex::Captures| {
        let raw = &caps[1];
        let code = if let Some(hex) = raw.strip_prefix('x') {
            u32::from_str_radix(hex, 16).ok()
        } else {
            raw.parse::<u32>().ok()
        };
        code.and_then(char::from_u32)
            .map(|c| c.to_string())
            .unwrap_or_default()
    });
    // &amp; last so "&amp;lt;" stays a literal "&lt;"
    numeric.replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r##"<html><head><title> Town of Example &amp; Vicinity </title>
        <script>var x = "<a href='/nope'>no</a>";</script></head>
        <body><nav><a href="/home">Home</a></nav>
        <!-- <a href="/hidden">hidden</a> -->
        <div class="content"><p>The Conservation Commission meets on the second Tuesday of every month at Town Hall.</p>
        <ul><li><a href="docs/agenda-2024-07-09.pdf">Agenda <b>July 9, 2024</b></a></li>
        <li><a href='https://other.example.org/minutes'>Minutes</a></li>
        <li><a href="#top">Back to top</a></li>
        <li><a href="/empty"></a></li></ul></div>
        <footer>Copyright notice that is long enough to pass the threshold easily.</footer>
        </body></html>"##;

    #[test]
    fn title_is_cleaned() {
        assert_eq!(page_title(PAGE).as_deref(), Some("Town of Example & Vicinity"));
        assert_eq!(page_title("<html></html>"), None);
    }

    #[test]
    fn links_are_resolved_and_filtered() {
        let base = Url::parse("https://www.example.gov/boards/conservation/").unwrap();
        let links = extract_links(PAGE, Some(&base));
        let urls: Vec<&str> = links.iter().map(|l| l.url.as_str()).collect();

        assert!(urls.contains(&"https://www.example.gov/home"));
        assert!(urls.contains(&"https://www.example.gov/boards/conservation/docs/agenda-2024-07-09.pdf"));
        assert!(urls.contains(&"https://other.example.org/minutes"));
        assert!(!urls
            .iter()
            .any(|u| u.contains("hidden") || u.contains("empty") || u.contains("top") || u.contains("nope")));

        let agenda = links.iter().find(|l| l.url.ends_with(".pdf")).unwrap();
        assert_eq!(agenda.text, "Agenda July 9, 2024");
    }

    #[test]
    fn body_text_skips_navigation_and_scripts() {
        let blocks = text_blocks(PAGE, 40);
        assert_eq!(
            blocks,
            vec!["The Conservation Commission meets on the second Tuesday of every month at Town Hall."]
        );
    }

    #[test]
    fn entities_decode_once() {
        assert_eq!(decode_entities("a &amp;lt; b &#65;&#x42;"), "a &lt; b AB");
    }
}
