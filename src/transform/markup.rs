use crate::error::TransformError;
use crate::output::{Asset, AssetData};
use crate::transform::Transform;

/// Collapses HTML whitespace and strips comments.
///
/// Conditional comments (`<!--[if ...]>`) are kept, and so is everything
/// inside `<pre>`, `<textarea>`, `<script>` and `<style>`, where whitespace
/// is significant.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinifyHtml;

impl Transform for MinifyHtml {
    fn name(&self) -> &'static str {
        "minify"
    }

    fn apply(&self, mut assets: Vec<Asset>) -> Result<Vec<Asset>, TransformError> {
        for asset in &mut assets {
            if let Some(html) = asset.as_text() {
                asset.data = AssetData::Utf8(minify_html(html));
            }
        }

        Ok(assets)
    }
}

const PRESERVE: &[(&str, &str)] = &[
    ("<pre", "</pre>"),
    ("<textarea", "</textarea>"),
    ("<script", "</script>"),
    ("<style", "</style>"),
];

fn strip_comments(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;

    while let Some(start) = rest.find("<!--") {
        out.push_str(&rest[..start]);
        let comment = &rest[start..];

        let Some(end) = comment.find("-->") else {
            // unterminated, leave it to the browser
            out.push_str(comment);
            return out;
        };

        if comment.starts_with("<!--[if") {
            out.push_str(&comment[..end + 3]);
        }
        rest = &comment[end + 3..];
    }

    out.push_str(rest);
    out
}

fn collapse(text: &str, out: &mut String) {
    for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(line);
    }
}

/// Index and closing tag of the next whitespace-sensitive element.
fn next_preserved(text: &str) -> Option<(usize, &'static str)> {
    PRESERVE
        .iter()
        .filter_map(|(open, close)| find_tag(text, open).map(|at| (at, *close)))
        .min_by_key(|(at, _)| *at)
}

/// First `open` whose tag name ends right after it, so `<pre` does not match
/// `<preview-card>`.
fn find_tag(text: &str, open: &str) -> Option<usize> {
    text.match_indices(open).map(|(at, _)| at).find(|&at| {
        text[at + open.len()..]
            .chars()
            .next()
            .is_none_or(|c| c == '>' || c == '/' || c.is_ascii_whitespace())
    })
}

fn minify_html(html: &str) -> String {
    let html = strip_comments(html);
    let mut out = String::with_capacity(html.len());
    let mut rest = html.as_str();

    while let Some((start, close)) = next_preserved(rest) {
        collapse(&rest[..start], &mut out);

        let block = &rest[start..];
        let end = block.find(close).map_or(block.len(), |at| at + close.len());

        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&block[..end]);
        rest = &block[end..];
    }

    collapse(rest, &mut out);
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_lines_and_drops_comments() {
        let html = "<html>\n  <body>\n\n    <!-- nav -->\n    <p>hi</p>\n  </body>\n</html>\n";
        assert_eq!(minify_html(html), "<html>\n<body>\n<p>hi</p>\n</body>\n</html>\n");
    }

    #[test]
    fn keeps_conditional_comments() {
        let html = "<head>\n<!--[if IE]><script src=\"a.js\"></script><![endif]-->\n</head>";
        assert!(minify_html(html).contains("<!--[if IE]>"));
    }

    #[test]
    fn preformatted_text_is_untouched() {
        let html = "<div>\n  <pre>\n  a\n\n    b\n</pre>\n  </div>\n";
        assert_eq!(minify_html(html), "<div>\n<pre>\n  a\n\n    b\n</pre>\n</div>\n");
    }

    #[test]
    fn inline_scripts_and_styles_are_untouched() {
        let html = "<body>\n  <script>\nconst s = `line1\n    indented`;\n</script>\n  <style>\n  a { color: red; }\n</style>\n</body>\n";
        assert_eq!(
            minify_html(html),
            "<body>\n<script>\nconst s = `line1\n    indented`;\n</script>\n<style>\n  a { color: red; }\n</style>\n</body>\n"
        );
    }

    #[test]
    fn tag_prefixes_are_not_preserved_blocks() {
        let html = "<preview-card>\n  <div>\n     <p>b</p>\n  </div>\n</preview-card>\n";
        assert_eq!(
            minify_html(html),
            "<preview-card>\n<div>\n<p>b</p>\n</div>\n</preview-card>\n"
        );

        let html = "<scripted-widget>\n  <p>a</p>\n</scripted-widget>\n<script src=\"a.js\"></script>\n";
        assert_eq!(
            minify_html(html),
            "<scripted-widget>\n<p>a</p>\n</scripted-widget>\n<script src=\"a.js\"></script>\n"
        );
    }

    #[test]
    fn minify_skips_binary_assets() {
        let out = MinifyHtml
            .apply(vec![Asset::binary("a.html", vec![0xff])])
            .unwrap();
        assert_eq!(out[0].data, AssetData::Binary(vec![0xff]));
    }
}
