//! Stage 11: minification of markup, embedded CSS, and embedded JS.

use crate::css::Stylesheet;
use crate::dom::{Fragment, SerializeOptions};

/// Re-serialize every `<style>` compactly, squeeze every `<script>` onto one
/// line, and render the fragment with collapsed whitespace and no comments.
///
/// CSS the parser has to skip is logged and dropped; minification itself
/// never fails.
pub fn minify(fragment: &mut Fragment) -> String {
    for id in fragment.elements_named("style") {
        let (sheet, warnings) = Stylesheet::parse_with_warnings(&fragment.text_content(id));
        for warning in warnings {
            tracing::warn!("CSS minifier: {warning}");
        }
        fragment.set_text(id, sheet.to_css());
    }

    for id in fragment.elements_named("script") {
        let compact = compact_script(&fragment.text_content(id));
        fragment.set_text(id, compact);
    }

    fragment.render(&SerializeOptions {
        collapse_whitespace: true,
        skip_comments: true,
    })
}

/// Trim every line and join them. Injected scripts terminate each statement
/// explicitly, so no line relies on automatic semicolon insertion.
fn compact_script(script: &str) -> String {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markup_css_and_script_are_compacted() {
        let mut fragment = Fragment::parse(concat!(
            "<div>\n  <p>one   two</p>\n  <!-- note -->",
            "<style>\n .a {\n  margin: 0 ;\n }\n</style>",
            "<script>\n(function(){\n    var x=1;\n})();\n</script></div>",
        ));
        assert_eq!(
            minify(&mut fragment),
            "<div> <p>one two</p> <style>.a{margin:0}</style><script>(function(){var x=1;})();</script></div>"
        );
    }

    #[test]
    fn broken_css_is_dropped_not_fatal() {
        let mut fragment = Fragment::parse("<style>.a{margin:0} .b{color:red</style>");
        assert_eq!(minify(&mut fragment), "<style>.a{margin:0}</style>");
    }
}
