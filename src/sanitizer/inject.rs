//! Stage 10: compose the snippet stylesheet and isolate it from the host page.

use crate::css::Stylesheet;
use crate::dom::{DomNode, ElementData, Fragment};
use crate::error::Result;

/// Class of the wrapper `<div>` around every rehosted description.
pub const WRAPPER_CLASS: &str = "rehost-description";

/// Custom element that moves its children into an open shadow root.
pub const SHADOW_HOST_ELEMENT: &str = "rehost-shadow";

/// Font and reset rules every snippet starts from. `:host` is the shadow host
/// in [`IsolationMode::ShadowDom`] and the wrapper in
/// [`IsolationMode::HeadScript`].
const BASE_CSS: &str = concat!(
    ":host{all:initial;display:block;font-family:Arial,Helvetica,sans-serif;",
    "font-size:14px;line-height:1.5;color:#222;box-sizing:border-box}",
    "h1,h2,h3,h4{margin:0 0 .5em;line-height:1.25}",
    "p{margin:0 0 1em}",
    "ul,ol{margin:0 0 1em;padding-left:1.5em}",
    "img,video{display:block;max-width:100%;height:auto}",
    "table{width:100%;border-collapse:collapse}",
    "a{color:inherit}",
);

const SHADOW_SCRIPT: &str = r#"
(function(){
    if(window.customElements.get('rehost-shadow')){return;}
    window.customElements.define('rehost-shadow',class extends HTMLElement{
        connectedCallback(){
            if(this.shadowRoot){return;}
            var root=this.attachShadow({mode:'open'});
            while(this.firstChild){root.appendChild(this.firstChild);}
        }
    });
})();
"#;

/// How the injected stylesheet is kept apart from the host page.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationMode {
    /// `<style>` and content live inside a custom element whose children are
    /// moved into a shadow root, so neither side's rules cross the boundary.
    #[default]
    ShadowDom,
    /// Every rule is scoped under the wrapper class and a script appends the
    /// stylesheet to `document.head` at runtime.
    HeadScript,
}

/// Collect the leftover `<style>` blocks, drop them from the content, and
/// return the content wrapped for `mode` with the composed stylesheet
/// (base, then `override_css`, then leftovers).
pub fn inject_styles(fragment: &Fragment, override_css: &str, mode: IsolationMode) -> Result<Fragment> {
    let mut content = fragment.clone();
    let mut leftover = String::new();
    for id in content.elements_named("style") {
        leftover.push_str(&content.text_content(id));
        content.remove(id);
    }

    let mut out = Fragment::empty().with_base_url(fragment.base_url().cloned());
    let root = out.root_id();
    let mut wrapper = ElementData::new("div");
    wrapper.set_attr("class", WRAPPER_CLASS);
    let Some(wrapper) = out.append(root, DomNode::Element(wrapper)) else {
        return Ok(out);
    };

    match mode {
        IsolationMode::ShadowDom => {
            let css = format!("{BASE_CSS}{override_css}{leftover}");
            if let Some(host) = out.append(wrapper, DomNode::Element(ElementData::new(SHADOW_HOST_ELEMENT))) {
                append_text_element(&mut out, host, "style", css);
                out.append_fragment(host, &content);
            }
            append_text_element(&mut out, wrapper, "script", SHADOW_SCRIPT.to_string());
        }
        IsolationMode::HeadScript => {
            let scope = format!(".{WRAPPER_CLASS}");
            let css = Stylesheet::parse(&format!("{BASE_CSS}{override_css}{leftover}"))
                .scoped(&scope)
                .to_css();
            out.append_fragment(wrapper, &content);
            append_text_element(&mut out, wrapper, "script", head_script(&css)?);
        }
    }

    Ok(out)
}

fn append_text_element(fragment: &mut Fragment, parent: ego_tree::NodeId, name: &str, text: String) {
    if let Some(id) = fragment.append(parent, DomNode::Element(ElementData::new(name))) {
        fragment.append(id, DomNode::Text(text));
    }
}

/// Script that appends `css` to the host document head. The stylesheet is a
/// JSON string literal with `</` escaped so it cannot close the script.
fn head_script(css: &str) -> Result<String> {
    let literal = serde_json::to_string(css)?.replace("</", "<\\/");
    Ok(format!(
        "\n(function(){{\n    var style=document.createElement('style');\n    style.textContent={literal};\n    document.head.appendChild(style);\n}})();\n"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_mode_wraps_style_and_content_in_host_element() {
        let fragment = Fragment::parse("<p class=\"a\">x</p><style>.a{margin:0}</style>");
        let out = inject_styles(&fragment, ".fix{display:flex}", IsolationMode::ShadowDom).unwrap();
        let html = out.to_html();

        assert!(html.starts_with("<div class=\"rehost-description\"><rehost-shadow><style>:host{all:initial;"));
        assert!(html.contains(".fix{display:flex}.a{margin:0}</style><p class=\"a\">x</p></rehost-shadow><script>"));
        assert!(html.contains("attachShadow({mode:'open'})"));
        assert_eq!(out.elements_named("style").len(), 1);
    }

    #[test]
    fn head_script_mode_scopes_rules_and_escapes_literal() {
        let fragment = Fragment::parse("<p class=\"a\">x</p><style>.a{margin:0}</style>");
        let out = inject_styles(&fragment, ".x::after{content:\"</b>\"}", IsolationMode::HeadScript).unwrap();
        let html = out.to_html();

        assert!(out.elements_named("style").is_empty());
        assert!(html.starts_with("<div class=\"rehost-description\"><p class=\"a\">x</p><script>"));
        assert!(html.contains(".rehost-description{all:initial;"));
        assert!(html.contains(".rehost-description .a{margin:0}"));
        assert!(html.contains(r#".rehost-description .x::after{content:\"<\/b>\"}"#));
        assert!(html.contains("document.head.appendChild(style)"));
        assert!(!html.contains("</b>"));
    }

    #[test]
    fn head_script_is_valid_json_literal() {
        let script = head_script("p{content:\"x\"}").unwrap();
        assert!(script.contains(r#"style.textContent="p{content:\"x\"}";"#));
    }
}
