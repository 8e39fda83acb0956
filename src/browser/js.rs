//! Page-side scripts used by the DOM probes.
//!
//! Every script is an IIFE whose arguments are injected as JSON literals and
//! whose result is `JSON.stringify`-ed, so the Rust side only ever decodes a
//! string.

use crate::browser::driver::Point;
use crate::element::Locator;
use crate::error::Result;

/// Attribute stamped on elements handed back to Rust.
pub const REF_ATTRIBUTE: &str = "data-mp-ref";

pub const MAX_SNAPSHOT_NODES: usize = 400;
pub const MAX_SNAPSHOT_DEPTH: usize = 8;
pub const MAX_ANCHORS: usize = 5;

/// Selector addressing an element previously stamped by a probe.
pub fn ref_selector(ref_id: u64) -> String {
    format!("[{}=\"{}\"]", REF_ATTRIBUTE, ref_id)
}

/// A JS string literal (double-quoted, fully escaped).
pub fn js_string(value: &str) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

const PRELUDE: &str = r#"
    const normalize = (value) => (value || '').replace(/\s+/g, ' ').trim();
    const stamp = (el) => {
        let ref = el.getAttribute('__REF_ATTR__');
        if (!ref) {
            window.__mpRefSeq = (window.__mpRefSeq || 0) + 1;
            ref = String(window.__mpRefSeq);
            el.setAttribute('__REF_ATTR__', ref);
        }
        return Number(ref);
    };
    const boxOf = (el) => {
        const r = el.getBoundingClientRect();
        return { x: r.x, y: r.y, width: r.width, height: r.height };
    };
    const styleOf = (el) => {
        const s = window.getComputedStyle(el);
        return { display: s ? s.display : '', visibility: s ? s.visibility : '' };
    };
    const textOf = (el) => normalize(el.innerText !== undefined ? el.innerText : el.textContent).slice(0, 160);
"#;

fn prelude() -> String {
    PRELUDE.replace("__REF_ATTR__", REF_ATTRIBUTE)
}

pub fn query_candidates(locator: &Locator, limit: usize) -> Result<String> {
    let locator_json = serde_json::to_string(locator)?;
    Ok(format!(
        r#"
        (function(locator, limit) {{
            {prelude}
            let nodes = [];
            try {{
                if (locator.kind === 'css') {{
                    nodes = Array.from(document.querySelectorAll(locator.value));
                }} else if (locator.kind === 'text') {{
                    const wanted = normalize(locator.value.text);
                    nodes = Array.from(document.querySelectorAll(locator.value.scope)).filter((el) => {{
                        const text = textOf(el);
                        return locator.value.exact ? text === wanted : text.includes(wanted);
                    }});
                    nodes = nodes.filter((el) => !nodes.some((other) => other !== el && el.contains(other)));
                }} else if (locator.kind === 'attribute') {{
                    nodes = Array.from(document.querySelectorAll(locator.value.scope)).filter((el) => {{
                        const attr = el.getAttribute(locator.value.name);
                        return attr !== null && attr.includes(locator.value.contains);
                    }});
                }}
            }} catch (_) {{
                nodes = [];
            }}
            return JSON.stringify(nodes.slice(0, limit).map((el) => {{
                const style = styleOf(el);
                return {{
                    ref_id: stamp(el),
                    tag: (el.tagName || '').toLowerCase(),
                    text: textOf(el),
                    rect: boxOf(el),
                    display: style.display,
                    visibility: style.visibility
                }};
            }}));
        }})({locator_json}, {limit})
        "#,
        prelude = prelude(),
        locator_json = locator_json,
        limit = limit,
    ))
}

pub fn proximity_snapshot(anchor: &str, ancestor_depth: usize) -> Result<String> {
    Ok(format!(
        r#"
        (function(anchorText, ancestorDepth, maxNodes, maxDepth, maxAnchors) {{
            {prelude}
            const wanted = normalize(anchorText);
            const all = Array.from(document.body ? document.body.querySelectorAll('*') : []);
            let anchors = all.filter((el) => {{
                const text = textOf(el);
                return text === wanted || (text.includes(wanted) && text.length <= wanted.length + 4);
            }});
            anchors = anchors.filter((el) => !anchors.some((other) => other !== el && el.contains(other)));

            const roots = [];
            for (const anchorEl of anchors.slice(0, maxAnchors)) {{
                let root = anchorEl;
                for (let i = 0; i < ancestorDepth && root.parentElement && root.parentElement !== document.body; i += 1) {{
                    root = root.parentElement;
                }}
                let budget = maxNodes;
                const serialize = (el, depth) => {{
                    budget -= 1;
                    const style = styleOf(el);
                    const node = {{
                        ref_id: stamp(el),
                        tag: (el.tagName || '').toLowerCase(),
                        text: textOf(el),
                        rect: boxOf(el),
                        display: style.display,
                        visibility: style.visibility,
                        anchor: el === anchorEl,
                        children: []
                    }};
                    if (depth < maxDepth) {{
                        for (const child of Array.from(el.children)) {{
                            if (budget <= 0) break;
                            node.children.push(serialize(child, depth + 1));
                        }}
                    }}
                    return node;
                }};
                roots.push(serialize(root, 0));
            }}
            return JSON.stringify(roots);
        }})({anchor}, {depth}, {max_nodes}, {max_depth}, {max_anchors})
        "#,
        prelude = prelude(),
        anchor = js_string(anchor)?,
        depth = ancestor_depth,
        max_nodes = MAX_SNAPSHOT_NODES,
        max_depth = MAX_SNAPSHOT_DEPTH,
        max_anchors = MAX_ANCHORS,
    ))
}

pub fn scroll_into_view(selector: &str) -> Result<String> {
    Ok(format!(
        r#"
        (function(sel) {{
            const el = document.querySelector(sel);
            if (!el) return JSON.stringify(null);
            el.scrollIntoView({{ block: 'center', inline: 'center' }});
            const r = el.getBoundingClientRect();
            return JSON.stringify({{ x: r.x, y: r.y, width: r.width, height: r.height }});
        }})({})
        "#,
        js_string(selector)?
    ))
}

pub fn hit_test(selector: &str, point: Point) -> Result<String> {
    Ok(format!(
        r#"
        (function(sel, x, y) {{
            const el = document.querySelector(sel);
            if (!el) return JSON.stringify('missing');
            const hit = document.elementFromPoint(x, y);
            if (hit && (hit === el || el.contains(hit) || hit.contains(el))) return JSON.stringify('hit');
            if (!hit) return JSON.stringify('covered:nothing');
            const tag = (hit.tagName || '').toLowerCase();
            const cls = typeof hit.className === 'string' ? hit.className.split(' ')[0] : '';
            return JSON.stringify('covered:' + tag + (cls ? '.' + cls : ''));
        }})({}, {}, {})
        "#,
        js_string(selector)?,
        point.x,
        point.y
    ))
}

pub fn dispatch_paste(selector: &str, html: &str, text: &str) -> Result<String> {
    Ok(format!(
        r#"
        (function(sel, html, text) {{
            const el = document.querySelector(sel);
            if (!el) return JSON.stringify('missing');
            el.focus();
            const data = new DataTransfer();
            data.setData('text/html', html);
            data.setData('text/plain', text);
            const event = new ClipboardEvent('paste', {{
                clipboardData: data,
                bubbles: true,
                cancelable: true
            }});
            const notCancelled = el.dispatchEvent(event);
            return JSON.stringify(notCancelled ? 'unhandled' : 'handled');
        }})({}, {}, {})
        "#,
        js_string(selector)?,
        js_string(html)?,
        js_string(text)?
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_string_escapes_quotes_and_newlines() {
        let literal = js_string("it's \"quoted\"\nline").unwrap();
        assert_eq!(literal, r#""it's \"quoted\"\nline""#);
    }

    #[test]
    fn query_script_embeds_locator_json() {
        let script = query_candidates(&Locator::css("#title"), 5).unwrap();
        assert!(script.contains(r##"{"kind":"css","value":"#title"}"##));
        assert!(script.contains(REF_ATTRIBUTE));
        assert!(!script.contains("__REF_ATTR__"));
    }

    #[test]
    fn ref_selector_targets_stamp() {
        assert_eq!(ref_selector(7), r#"[data-mp-ref="7"]"#);
    }
}
