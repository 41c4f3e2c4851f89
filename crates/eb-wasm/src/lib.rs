//! WebAssembly bindings for the ExactBlocker page script
//!
//! The content script asks the native side for rules once per page load and
//! hands the response to [`start`]:
//!
//! ```js
//! browser.runtime.sendNativeMessage(get_rules_request())
//!     .then((response) => start(response))
//!     .catch(() => start(null));
//! ```
//!
//! Rules for the current hostname are applied three ways: one injected
//! stylesheet, inline `display: none !important` on elements already in the
//! page, and a debounced rescan whenever nodes are added.

use std::cell::{Cell, RefCell};

use eb_core::matcher::{applicable_rules, build_hide_css, domain_matches};
use eb_core::rescan::{RescanSlot, DEFAULT_RESCAN_DELAY_MS};
use eb_core::types::ElementRule;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{console, Document, HtmlElement, MutationObserver, MutationObserverInit};

const STYLE_ELEMENT_ID: &str = "exactblocker-dynamic-styles";
const HANDLED_ATTRIBUTE: &str = "data-exactblocker-hidden";

struct PageState {
    selectors: Vec<String>,
    slot: RescanSlot<i32>,
    delay_ms: i32,
    on_timer: Closure<dyn FnMut()>,
    _on_mutation: Closure<dyn FnMut(js_sys::Array, MutationObserver)>,
    _observer: MutationObserver,
}

thread_local! {
    static STARTED: Cell<bool> = const { Cell::new(false) };
    static PAGE_STATE: RefCell<Option<PageState>> = const { RefCell::new(None) };
}

/// Marks the page as handled. False if `start` already ran, with or without
/// applicable rules.
fn claim_page() -> bool {
    !STARTED.with(|started| started.replace(true))
}

/// The message sent over the native channel: `{ type: "getRules" }`.
#[wasm_bindgen]
pub fn get_rules_request() -> JsValue {
    let request = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&request, &"type".into(), &JsValue::from_str("getRules"));
    request.into()
}

/// Apply the rules in `response` to the current page.
///
/// `response` may be `null`, `undefined` or malformed; that means zero rules.
/// Returns the number of rules that apply to this page.
#[wasm_bindgen]
pub fn start(response: JsValue, hostname: Option<String>, delay_ms: Option<u32>) -> Result<u32, JsValue> {
    if !claim_page() {
        return Err(JsValue::from_str("Already started on this page"));
    }

    let window = web_sys::window().ok_or_else(|| JsValue::from_str("No window"))?;
    let document = window.document().ok_or_else(|| JsValue::from_str("No document"))?;
    let hostname = match hostname {
        Some(hostname) => hostname,
        None => window.location().hostname()?,
    };

    let rules = rules_from_response(&response);
    let selectors = selectors_for(&rules, &hostname);
    if selectors.is_empty() {
        return Ok(0);
    }

    console::log_1(&JsValue::from_str(&format!(
        "[ExactBlocker] Found {} rules for {}",
        selectors.len(),
        hostname
    )));

    inject_style(&document, &hide_css_for(&rules, &hostname))?;
    hide_matching(&document, &selectors);

    let on_timer = Closure::<dyn FnMut()>::new(run_rescan);
    let on_mutation =
        Closure::<dyn FnMut(js_sys::Array, MutationObserver)>::new(|_records: js_sys::Array, _observer: MutationObserver| {
            schedule_rescan();
        });

    let observer = MutationObserver::new(on_mutation.as_ref().unchecked_ref())?;
    let init = MutationObserverInit::new();
    init.set_child_list(true);
    init.set_subtree(true);
    let root = document
        .document_element()
        .ok_or_else(|| JsValue::from_str("No document element"))?;
    observer.observe_with_options(&root, &init)?;

    let applied = selectors.len() as u32;
    PAGE_STATE.with(|state| {
        *state.borrow_mut() = Some(PageState {
            selectors,
            slot: RescanSlot::new(),
            delay_ms: delay_ms.unwrap_or(DEFAULT_RESCAN_DELAY_MS) as i32,
            on_timer,
            _on_mutation: on_mutation,
            _observer: observer,
        });
    });

    Ok(applied)
}

/// Stylesheet text for the rules in `response` that apply to `hostname`.
#[wasm_bindgen]
pub fn hide_css(response: JsValue, hostname: &str) -> String {
    hide_css_for(&rules_from_response(&response), hostname)
}

#[wasm_bindgen]
pub fn domain_matches_js(rule_domain: &str, hostname: &str) -> bool {
    domain_matches(rule_domain, hostname)
}

pub fn hide_css_for(rules: &[ElementRule], hostname: &str) -> String {
    build_hide_css(&applicable_rules(rules, hostname))
}

pub fn selectors_for(rules: &[ElementRule], hostname: &str) -> Vec<String> {
    applicable_rules(rules, hostname)
        .into_iter()
        .map(|rule| rule.selector().to_string())
        .collect()
}

fn rules_from_response(response: &JsValue) -> Vec<ElementRule> {
    if response.is_null() || response.is_undefined() || !response.is_object() {
        return Vec::new();
    }

    let rules = match js_sys::Reflect::get(response, &"rules".into()) {
        Ok(value) if js_sys::Array::is_array(&value) => js_sys::Array::from(&value),
        _ => return Vec::new(),
    };

    rules
        .iter()
        .filter_map(|entry| {
            let domain = js_sys::Reflect::get(&entry, &"domain".into()).ok()?.as_string()?;
            let selector = js_sys::Reflect::get(&entry, &"selector".into()).ok()?.as_string()?;
            ElementRule::new(&domain, &selector).ok()
        })
        .collect()
}

fn inject_style(document: &Document, css: &str) -> Result<(), JsValue> {
    if document.get_element_by_id(STYLE_ELEMENT_ID).is_some() {
        return Ok(());
    }

    let style = document.create_element("style")?;
    style.set_id(STYLE_ELEMENT_ID);
    style.set_text_content(Some(css));

    let parent = document
        .query_selector("head")?
        .or_else(|| document.document_element())
        .ok_or_else(|| JsValue::from_str("No element to attach styles to"))?;
    parent.append_child(&style)?;
    Ok(())
}

/// Inline-hide every not yet handled element matching `selectors`.
fn hide_matching(document: &Document, selectors: &[String]) -> u32 {
    let mut hidden = 0u32;

    for selector in selectors {
        let nodes = match document.query_selector_all(selector) {
            Ok(nodes) => nodes,
            Err(_) => {
                console::warn_1(&JsValue::from_str(&format!(
                    "[ExactBlocker] Invalid selector: {}",
                    selector
                )));
                continue;
            }
        };

        for index in 0..nodes.length() {
            let Some(element) = nodes.item(index).and_then(|node| node.dyn_into::<HtmlElement>().ok()) else {
                continue;
            };
            if element.has_attribute(HANDLED_ATTRIBUTE) {
                continue;
            }
            if let Err(e) = element.style().set_property_with_priority("display", "none", "important") {
                console::warn_2(&JsValue::from_str("[ExactBlocker] Failed to hide element"), &e);
                continue;
            }
            if let Err(e) = element.set_attribute(HANDLED_ATTRIBUTE, "true") {
                console::warn_2(&JsValue::from_str("[ExactBlocker] Failed to mark element"), &e);
            }
            hidden += 1;
        }
    }

    hidden
}

/// Called for every mutation batch: replace the pending timer, if any.
fn schedule_rescan() {
    let Some(window) = web_sys::window() else {
        return;
    };

    PAGE_STATE.with(|state| {
        let mut state = state.borrow_mut();
        let Some(page) = state.as_mut() else {
            return;
        };

        let callback = page.on_timer.as_ref().unchecked_ref();
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(callback, page.delay_ms) {
            Ok(handle) => {
                if let Some(previous) = page.slot.replace(handle) {
                    window.clear_timeout_with_handle(previous);
                }
            }
            Err(e) => console::warn_2(&JsValue::from_str("[ExactBlocker] Failed to schedule rescan"), &e),
        }
    });
}

fn run_rescan() {
    let selectors = PAGE_STATE.with(|state| {
        let mut state = state.borrow_mut();
        state.as_mut().map(|page| {
            page.slot.take();
            page.selectors.clone()
        })
    });

    let Some(selectors) = selectors else {
        return;
    };
    let Some(document) = web_sys::window().and_then(|window| window.document()) else {
        return;
    };

    let hidden = hide_matching(&document, &selectors);
    if hidden > 0 {
        console::log_1(&JsValue::from_str(&format!(
            "[ExactBlocker] Hid {} new elements",
            hidden
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(domain: &str, selector: &str) -> ElementRule {
        ElementRule::new(domain, selector).unwrap()
    }

    #[test]
    fn selects_rules_for_current_host() {
        let rules = vec![
            rule("youtube.com", "#content"),
            rule("reddit.com", ".promoted"),
            rule("www.youtube.com", "#comments"),
        ];
        assert_eq!(selectors_for(&rules, "www.youtube.com"), vec!["#content", "#comments"]);
        assert!(selectors_for(&rules, "notyoutube.com").is_empty());
    }

    #[test]
    fn page_is_claimed_once() {
        assert!(claim_page());
        assert!(!claim_page());
        assert!(!claim_page());
    }

    #[test]
    fn builds_css_for_current_host() {
        let rules = vec![rule("youtube.com", "#content"), rule("reddit.com", ".promoted")];
        assert_eq!(
            hide_css_for(&rules, "m.youtube.com"),
            "#content { display: none !important; }"
        );
        assert_eq!(hide_css_for(&rules, "example.com"), "");
    }
}

#[cfg(all(test, target_arch = "wasm32"))]
mod wasm_tests {
    use wasm_bindgen_test::*;

    use super::*;

    fn response(rules: &[(&str, &str)]) -> JsValue {
        let array = js_sys::Array::new();
        for (domain, selector) in rules {
            let entry = js_sys::Object::new();
            let _ = js_sys::Reflect::set(&entry, &"domain".into(), &JsValue::from_str(domain));
            let _ = js_sys::Reflect::set(&entry, &"selector".into(), &JsValue::from_str(selector));
            array.push(&entry);
        }
        let object = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&object, &"rules".into(), &array);
        object.into()
    }

    #[wasm_bindgen_test]
    fn reads_rules_from_response() {
        let rules = rules_from_response(&response(&[("youtube.com", "#content"), ("", ".bad")]));
        assert_eq!(rules, vec![ElementRule::new("youtube.com", "#content").unwrap()]);
    }

    #[wasm_bindgen_test]
    fn missing_response_means_no_rules() {
        assert!(rules_from_response(&JsValue::NULL).is_empty());
        assert!(rules_from_response(&JsValue::UNDEFINED).is_empty());
        assert!(rules_from_response(&JsValue::from_str("oops")).is_empty());
        assert!(rules_from_response(&js_sys::Object::new().into()).is_empty());
    }

    #[wasm_bindgen_test]
    fn builds_request_message() {
        let request = get_rules_request();
        let kind = js_sys::Reflect::get(&request, &"type".into()).unwrap();
        assert_eq!(kind.as_string().as_deref(), Some("getRules"));
    }

    #[wasm_bindgen_test]
    fn hide_css_from_js_response() {
        let css = hide_css(response(&[("youtube.com", "#content")]), "www.youtube.com");
        assert_eq!(css, "#content { display: none !important; }");
    }
}
