//! HTML element selection for `on_html` callbacks.
//!
//! A page is parsed once per response and every registered selector is run
//! over it. Parsed documents are not `Send`, so callbacks run synchronously
//! and links queued with [`HtmlElement::follow`] are handed back to the
//! caller once the document is dropped.

use std::cell::RefCell;
use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use url::Url;
use wayfarer_core::{Error, Request, Response};

use crate::fetch::normalize;

/// Callback invoked for every element matching a selector.
pub type HtmlCallback = Arc<dyn Fn(&HtmlElement<'_>) + Send + Sync>;

/// Compile a CSS selector, reporting syntax errors as configuration errors.
pub fn parse_selector(css: &str) -> Result<Selector, Error> {
    Selector::parse(css).map_err(|e| Error::InvalidConfig(format!("invalid selector {css:?}: {e:?}")))
}

/// An element matched by a selector, with access to the response it came from.
pub struct HtmlElement<'a> {
    element: ElementRef<'a>,
    index: usize,
    response: &'a Response,
    follows: &'a RefCell<Vec<Request>>,
}

impl<'a> HtmlElement<'a> {
    /// Tag name, lowercase.
    pub fn name(&self) -> &'a str {
        self.element.value().name()
    }

    /// Concatenated text of the element and its descendants, trimmed.
    pub fn text(&self) -> String {
        self.element.text().collect::<String>().trim().to_string()
    }

    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    pub fn attrs(&self) -> Vec<(&'a str, &'a str)> {
        self.element.value().attrs().collect()
    }

    pub fn inner_html(&self) -> String {
        self.element.inner_html()
    }

    /// Position among the matches of the same selector.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Text of the first descendant matching `css`, empty when none does.
    pub fn child_text(&self, css: &str) -> String {
        let Ok(selector) = parse_selector(css) else {
            return String::new();
        };
        self.element
            .select(&selector)
            .next()
            .map(|child| child.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    }

    /// Attribute of the first descendant matching `css` that carries it.
    pub fn child_attr(&self, css: &str, name: &str) -> Option<String> {
        let selector = parse_selector(css).ok()?;
        self.element
            .select(&selector)
            .find_map(|child| child.value().attr(name))
            .map(str::to_string)
    }

    pub fn request(&self) -> &'a Request {
        &self.response.request
    }

    pub fn response(&self) -> &'a Response {
        self.response
    }

    /// Resolve `href` against the page URL into its canonical form.
    pub fn absolute_url(&self, href: &str) -> Option<Url> {
        self.request().absolute_url(href).and_then(|url| normalize(url).ok())
    }

    /// Queue `href` as a child request one level deeper than this page.
    ///
    /// Returns `false` when `href` does not resolve to an http(s) URL. Queued
    /// links still go through the collector's filters.
    pub fn follow(&self, href: &str) -> bool {
        let Some(url) = self.absolute_url(href) else {
            return false;
        };
        self.follows.borrow_mut().push(self.request().child(url));
        true
    }
}

/// Run each `(selector, callbacks)` pair over the response body.
///
/// Returns the requests queued through [`HtmlElement::follow`], in order.
pub fn scrape(response: &Response, handlers: &[(String, Vec<HtmlCallback>)]) -> Vec<Request> {
    if handlers.is_empty() {
        return Vec::new();
    }

    let follows = RefCell::new(Vec::new());
    let document = Html::parse_document(&response.text());
    for (css, callbacks) in handlers {
        let selector = match parse_selector(css) {
            Ok(selector) => selector,
            Err(e) => {
                tracing::warn!(selector = css.as_str(), error = %e, "skipping selector");
                continue;
            }
        };
        for (index, element) in document.select(&selector).enumerate() {
            let element = HtmlElement { element, index, response, follows: &follows };
            for callback in callbacks {
                callback(&element);
            }
        }
    }
    follows.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use wayfarer_core::Headers;

    fn page(url: &str, html: &str) -> Response {
        let request = Request::get(Url::parse(url).unwrap()).with_depth(2);
        let headers: Headers = [("content-type", "text/html; charset=utf-8")].into_iter().collect();
        Response::new(request, 200, headers, html.as_bytes().to_vec())
    }

    fn handler(f: impl Fn(&HtmlElement<'_>) + Send + Sync + 'static) -> HtmlCallback {
        Arc::new(f)
    }

    #[test]
    fn test_parse_selector_errors() {
        assert!(parse_selector("a[href]").is_ok());
        assert!(matches!(parse_selector("a[[href"), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_element_accessors() {
        let response = page(
            "https://example.com/docs/",
            r#"<html><body>
                <div class="card" id="one"><h2> First </h2><a href="intro">Intro</a></div>
                <div class="card" id="two"><h2>Second</h2></div>
            </body></html>"#,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handlers = vec![(
            "div.card".to_string(),
            vec![handler(move |e| {
                sink.lock().unwrap().push((
                    e.index(),
                    e.name().to_string(),
                    e.attr("id").map(str::to_string),
                    e.child_text("h2"),
                    e.child_attr("a", "href"),
                ));
            })],
        )];

        scrape(&response, &handlers);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[0],
            (0, "div".to_string(), Some("one".to_string()), "First".to_string(), Some("intro".to_string()))
        );
        assert_eq!(seen[1].0, 1);
        assert_eq!(seen[1].3, "Second");
        assert_eq!(seen[1].4, None);
    }

    #[test]
    fn test_follow_queues_children() {
        let response = page(
            "https://example.com/docs/",
            r##"<a href="a">A</a><a href="/b#x">B</a><a href="#top">Top</a><a href="mailto:x@example.com">Mail</a>"##,
        );
        let handlers = vec![(
            "a[href]".to_string(),
            vec![handler(|e| {
                if let Some(href) = e.attr("href") {
                    e.follow(href);
                }
            })],
        )];

        let follows = scrape(&response, &handlers);

        let urls: Vec<_> = follows.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, ["https://example.com/docs/a", "https://example.com/b"]);
        assert!(follows.iter().all(|r| r.depth == 3));
    }

    #[test]
    fn test_children_share_ctx() {
        let response = page("https://example.com/", r#"<a href="/next">next</a>"#);
        response.ctx().put("trail", "home");
        let handlers = vec![("a".to_string(), vec![handler(|e| {
            e.follow("/next");
        })])];

        let follows = scrape(&response, &handlers);
        assert_eq!(follows[0].ctx.get("trail").as_deref(), Some("home"));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let response = page("https://example.com/", "<p>x</p>");
        let order = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (order.clone(), order.clone());
        let handlers = vec![(
            "p".to_string(),
            vec![
                handler(move |_| first.lock().unwrap().push(1)),
                handler(move |_| second.lock().unwrap().push(2)),
            ],
        )];

        scrape(&response, &handlers);
        assert_eq!(*order.lock().unwrap(), [1, 2]);
    }

    #[test]
    fn test_no_handlers_skips_parse() {
        let response = page("https://example.com/", "<a href='x'>x</a>");
        assert!(scrape(&response, &[]).is_empty());
    }
}
