//! JavaScript injected into the page to locate and inspect elements.
//!
//! Every script is a self-contained expression that evaluates to a string,
//! so results come back through `Runtime.evaluate` without object handles.
//! Element lookup mirrors the locator kinds: css, role, text, testId, xpath.
//! Frame-scoped locators search the iframe's `contentDocument`, which only
//! works for same-origin frames.

use crate::page::{FrameRef, Locator, LocatorKind};

/// Attribute used to hand a located element over to a CSS lookup.
pub const TARGET_ATTR: &str = "data-rpa-target";

pub const READY_STATE_JS: &str = "document.readyState";

pub const MARK_STALE_JS: &str = "window.__rpaStale = true; 'ok'";

/// `"<stale>|<readyState>"` for the current document.
pub const NAV_STATE_JS: &str =
    "(window.__rpaStale ? 'stale' : 'fresh') + '|' + document.readyState";

pub const PAGE_SIZE_JS: &str = r#"
(() => {
  const d = document.documentElement;
  const b = document.body || d;
  return Math.max(d.scrollWidth, b.scrollWidth) + ',' + Math.max(d.scrollHeight, b.scrollHeight);
})()
"#;

/// Shared helpers. `find(root)` is appended per locator.
const PRELUDE: &str = r#"
  const norm = (s) => (s || '').replace(/\s+/g, ' ').trim();
  const SKIP = new Set(['SCRIPT','STYLE','NOSCRIPT','HEAD','TEMPLATE']);
  const isVisible = (el) => {
    if (!el || !el.isConnected) return false;
    const view = el.ownerDocument.defaultView;
    const s = view.getComputedStyle(el);
    if (s.display === 'none' || s.visibility === 'hidden' || s.opacity === '0') return false;
    const r = el.getBoundingClientRect();
    return r.width > 0 && r.height > 0;
  };
  const implicitRole = (el) => {
    const tag = el.tagName.toLowerCase();
    const type = (el.getAttribute('type') || '').toLowerCase();
    switch (tag) {
      case 'a': return el.hasAttribute('href') ? 'link' : null;
      case 'button': return 'button';
      case 'input':
        if (['button','submit','reset','image'].includes(type)) return 'button';
        if (type === 'checkbox') return 'checkbox';
        if (type === 'radio') return 'radio';
        if (type === 'search') return 'searchbox';
        if (type === 'hidden') return null;
        return 'textbox';
      case 'textarea': return 'textbox';
      case 'select': return 'combobox';
      case 'img': return 'img';
      case 'h1': case 'h2': case 'h3': case 'h4': case 'h5': case 'h6': return 'heading';
      case 'li': return 'listitem';
      case 'nav': return 'navigation';
      case 'dialog': return 'dialog';
      default: return null;
    }
  };
  const accName = (el) => {
    const doc = el.ownerDocument;
    const labelled = (el.getAttribute('aria-labelledby') || '')
      .split(/\s+/).map(id => id && doc.getElementById(id)).filter(Boolean)
      .map(n => n.textContent).join(' ');
    const forLabel = el.id ? doc.querySelector('label[for="' + CSS.escape(el.id) + '"]') : null;
    return norm(
      el.getAttribute('aria-label') || labelled || (forLabel && forLabel.textContent) ||
      el.getAttribute('alt') || el.getAttribute('title') ||
      ((el.tagName === 'INPUT' && ['button','submit','reset'].includes(el.type)) ? el.value : '') ||
      el.getAttribute('placeholder') || el.textContent
    );
  };
  const byText = (root, text, exact) => {
    const want = exact ? norm(text) : norm(text).toLowerCase();
    const test = (el) => {
      if (SKIP.has(el.tagName)) return false;
      const got = norm(el.textContent);
      return exact ? got === want : got.toLowerCase().includes(want);
    };
    const all = Array.from((root.body || root).querySelectorAll('*')).filter(test);
    return all.find(el => !Array.from(el.children).some(test)) || null;
  };
  const byRole = (root, role, name) => {
    const want = name == null ? null : norm(name).toLowerCase();
    for (const el of (root.body || root).querySelectorAll('*')) {
      const r = el.getAttribute('role') || implicitRole(el);
      if (r !== role) continue;
      if (want === null || accName(el).toLowerCase().includes(want)) return el;
    }
    return null;
  };
"#;

fn js_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn root_expr(frame: Option<&FrameRef>) -> String {
    match frame {
        Some(f) => format!(
            "(() => {{ const f = document.querySelector({}); return f && f.contentDocument; }})()",
            js_str(&f.selector)
        ),
        None => "document".to_string(),
    }
}

fn find_expr(kind: &LocatorKind) -> String {
    match kind {
        LocatorKind::Css(sel) => format!("root.querySelector({})", js_str(sel)),
        LocatorKind::TestId(id) => format!(
            "root.querySelector('[data-testid=' + JSON.stringify({}) + ']')",
            js_str(id)
        ),
        LocatorKind::XPath(xp) => format!(
            "root.evaluate({}, root, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null).singleNodeValue",
            js_str(xp)
        ),
        LocatorKind::Text { text, exact } => format!("byText(root, {}, {})", js_str(text), exact),
        LocatorKind::Role(q) => format!(
            "byRole(root, {}, {})",
            js_str(&q.role),
            q.name.as_deref().map(js_str).unwrap_or_else(|| "null".into())
        ),
    }
}

/// Wrap `body` (which sees `root` and `el`) into an expression returning a string.
fn with_element(locator: &Locator, body: &str) -> String {
    format!(
        r#"(() => {{
{prelude}
  const root = {root};
  if (!root) return 'no-frame';
  let el = null;
  try {{ el = {find}; }} catch (e) {{ return 'error:' + e.message; }}
  {body}
}})()"#,
        prelude = PRELUDE,
        root = root_expr(locator.frame.as_ref()),
        find = find_expr(&locator.kind),
        body = body,
    )
}

/// `visible`, `hidden`, `missing`, `no-frame` or `error:<message>`.
pub fn probe_js(locator: &Locator) -> String {
    with_element(
        locator,
        "if (!el) return 'missing'; return isVisible(el) ? 'visible' : 'hidden';",
    )
}

/// Tag the element with [`TARGET_ATTR`] so the driver can grab it by CSS.
pub fn mark_js(locator: &Locator, token: &str) -> String {
    with_element(
        locator,
        &format!(
            "if (!el) return 'missing'; el.setAttribute('{}', {}); return 'ok';",
            TARGET_ATTR,
            js_str(token)
        ),
    )
}

pub fn target_selector(token: &str) -> String {
    format!("[{}=\"{}\"]", TARGET_ATTR, token)
}

pub fn clear_marked_js(token: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return 'missing'; \
         if ('value' in el) el.value = ''; else el.textContent = ''; return 'ok'; }})()",
        js_str(&target_selector(token))
    )
}

pub fn text_js(locator: &Locator) -> String {
    with_element(
        locator,
        "if (!el) return ''; return el.innerText || el.textContent || '';",
    )
}

pub fn link_js(locator: &Locator) -> String {
    with_element(
        locator,
        "if (!el) return ''; return el.href || el.src || el.getAttribute('href') || '';",
    )
}

/// In-document click for elements the driver can't reach (inside frames).
pub fn click_js(locator: &Locator) -> String {
    with_element(
        locator,
        "if (!el) return 'missing'; el.scrollIntoView({block: 'center'}); el.click(); return 'ok';",
    )
}

pub fn fill_js(locator: &Locator, text: &str) -> String {
    with_element(
        locator,
        &format!(
            "if (!el) return 'missing'; el.focus(); \
             if ('value' in el) el.value = {t}; else el.textContent = {t}; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return 'ok';",
            t = js_str(text)
        ),
    )
}

/// Pick an option by value, then by visible label. Returns `ok`, `missing`,
/// `not-select` or `no-option`.
pub fn select_js(locator: &Locator, value: &str) -> String {
    with_element(
        locator,
        &format!(
            "if (!el) return 'missing'; if (el.tagName !== 'SELECT') return 'not-select'; \
             const want = {v}; \
             const opt = Array.from(el.options).find(o => o.value === want) || \
               Array.from(el.options).find(o => norm(o.label || o.textContent) === norm(want)); \
             if (!opt) return 'no-option'; \
             el.value = opt.value; \
             el.dispatchEvent(new Event('input', {{bubbles: true}})); \
             el.dispatchEvent(new Event('change', {{bubbles: true}})); return 'ok';",
            v = js_str(value)
        ),
    )
}

/// Click a checkbox or radio until it reports `checked`. Returns `ok`,
/// `missing` or `not-checkable`.
pub fn check_js(locator: &Locator, checked: bool) -> String {
    with_element(
        locator,
        &format!(
            "if (!el) return 'missing'; if (!('checked' in el)) return 'not-checkable'; \
             if (el.checked !== {c}) el.click(); \
             if (el.checked !== {c}) {{ el.checked = {c}; \
               el.dispatchEvent(new Event('change', {{bubbles: true}})); }} \
             return 'ok';",
            c = checked
        ),
    )
}

/// `ok`, `missing` or `no-document` for an iframe selector.
pub fn frame_probe_js(selector: &str) -> String {
    format!(
        "(() => {{ const f = document.querySelector({}); if (!f) return 'missing'; \
         try {{ return f.contentDocument ? 'ok' : 'no-document'; }} catch (e) {{ return 'no-document'; }} }})()",
        js_str(selector)
    )
}
