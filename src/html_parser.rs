//! Page rewriting.
//!
//! A page is parsed twice. The first pass collects asset references and
//! outbound links; the assets are then downloaded through the
//! [`AssetStore`] on a bounded number of concurrent workers; the second pass
//! swaps every reference that now has a local copy and serializes the document.
//! The DOM never lives across an `.await`.

use futures::stream::{self, StreamExt};
use html5ever::serialize::SerializeOpts;
use html5ever::tendril::TendrilSink;
use html5ever::{parse_document, Attribute, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom, SerializableHandle};
use regex::{Captures, Regex};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::asset_store::AssetStore;
use crate::category::ResourceCategory;
use crate::path_mapper::relative_reference;
use crate::scope::ScopeFilter;
use crate::url_canon::{resolve_reference, without_fragment, CanonicalUrl};

/// One processed frontier entry. Lives only while the page is being handled.
#[derive(Debug, Clone)]
pub struct Page {
    pub url: Url,
    pub local_path: String,
    pub raw: Vec<u8>,
    pub rewritten: Vec<u8>,
    /// In-scope anchor targets, fragment removed, first occurrence order.
    pub links: Vec<Url>,
    pub out_of_scope: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssetRequest {
    pub url: Url,
    pub category: ResourceCategory,
}

/// Result of the collecting pass.
#[derive(Debug, Default, Clone)]
pub struct ExtractedReferences {
    /// In-scope asset references, one per canonical URL, in document order.
    pub assets: Vec<AssetRequest>,
    pub links: Vec<Url>,
    pub out_of_scope: usize,
    /// Errors html5ever recovered from; the page is still processed.
    pub parse_errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RefKind {
    Asset(ResourceCategory),
    Srcset(ResourceCategory),
    Style,
    Anchor,
}

#[derive(Debug, Clone)]
pub struct HtmlParser {
    page_url: Url,
    scope: ScopeFilter,
    content_dir: String,
}

impl HtmlParser {
    /// `page_url` is the URL the page was served from (after redirects); every
    /// relative reference resolves against it.
    pub fn new(page_url: &Url, scope: &ScopeFilter, content_dir: &str) -> Self {
        Self {
            page_url: page_url.clone(),
            scope: scope.clone(),
            content_dir: content_dir.to_string(),
        }
    }

    /// Downloads the page's assets and returns the rewritten page.
    ///
    /// `known_target` maps a canonical URL to the local path of something
    /// already mirrored in this run; anchors pointing there are rewritten,
    /// other anchors keep their remote href.
    pub async fn rewrite_page<F>(
        &self,
        raw: Vec<u8>,
        local_path: &str,
        store: &AssetStore,
        workers: usize,
        known_target: F,
    ) -> Page
    where
        F: Fn(&CanonicalUrl) -> Option<String>,
    {
        let extracted = self.extract_references(&raw);
        if extracted.parse_errors > 0 {
            debug!(
                url = %self.page_url,
                errors = extracted.parse_errors,
                "recovered from malformed HTML"
            );
        }

        let resolved: HashMap<CanonicalUrl, String> = stream::iter(extracted.assets.iter())
            .map(|request| async move {
                let path = store.ensure_downloaded(&request.url, request.category).await;
                (CanonicalUrl::from_url(&request.url), path)
            })
            .buffer_unordered(workers.max(1))
            .filter_map(|(canonical, path)| async move { path.map(|p| (canonical, p)) })
            .collect()
            .await;

        let rewritten = self
            .rewrite(&raw, local_path, &resolved, &known_target)
            .unwrap_or_else(|| raw.clone());

        Page {
            url: self.page_url.clone(),
            local_path: local_path.to_string(),
            raw,
            rewritten,
            links: extracted.links,
            out_of_scope: extracted.out_of_scope,
        }
    }

    /// Collecting pass: asset references to download and anchors to follow.
    pub fn extract_references(&self, html: &[u8]) -> ExtractedReferences {
        let mut extracted = ExtractedReferences::default();
        let Some(dom) = parse(html) else {
            return extracted;
        };
        extracted.parse_errors = dom.errors.len();

        let mut seen_assets = HashSet::new();
        let mut seen_links = HashSet::new();

        for_each_reference(&dom, |node, kinds| {
            let NodeData::Element { ref attrs, .. } = node.data else {
                return;
            };
            let attrs = attrs.borrow();

            for &(index, kind) in kinds {
                let value = attrs[index].value.to_string();
                match kind {
                    RefKind::Asset(hint) => {
                        self.collect_asset(&value, hint, &mut extracted, &mut seen_assets)
                    }
                    RefKind::Srcset(hint) => {
                        for (candidate, _) in parse_srcset(&value) {
                            self.collect_asset(&candidate, hint, &mut extracted, &mut seen_assets);
                        }
                    }
                    RefKind::Style => {
                        for reference in css_url_references(&value) {
                            self.collect_asset(
                                &reference,
                                ResourceCategory::Image,
                                &mut extracted,
                                &mut seen_assets,
                            );
                        }
                    }
                    RefKind::Anchor => {
                        let Some(target) = resolve_reference(&self.page_url, &value) else {
                            continue;
                        };
                        let target = without_fragment(&target);
                        match self.scope.check(&target) {
                            Ok(canonical) => {
                                if seen_links.insert(canonical) {
                                    extracted.links.push(target);
                                }
                            }
                            Err(_) => extracted.out_of_scope += 1,
                        }
                    }
                }
            }
        });

        extracted
    }

    fn collect_asset(
        &self,
        raw: &str,
        hint: ResourceCategory,
        extracted: &mut ExtractedReferences,
        seen: &mut HashSet<CanonicalUrl>,
    ) {
        let Some(url) = resolve_reference(&self.page_url, raw) else {
            return;
        };
        let url = without_fragment(&url);
        let canonical = match self.scope.check(&url) {
            Ok(canonical) => canonical,
            Err(_) => {
                extracted.out_of_scope += 1;
                return;
            }
        };

        let category = ResourceCategory::classify(&canonical, &self.content_dir, Some(hint));
        if seen.insert(canonical) {
            extracted.assets.push(AssetRequest { url, category });
        }
    }

    /// Rewriting pass. `resolved` holds the local path of every asset that was
    /// stored; references to anything else are left untouched. Returns `None`
    /// when the document could not be parsed or serialized.
    pub fn rewrite<F>(
        &self,
        html: &[u8],
        page_local_path: &str,
        resolved: &HashMap<CanonicalUrl, String>,
        known_target: &F,
    ) -> Option<Vec<u8>>
    where
        F: Fn(&CanonicalUrl) -> Option<String>,
    {
        let dom = parse(html)?;

        let local_for = |raw: &str| -> Option<String> {
            let url = resolve_reference(&self.page_url, raw)?;
            let path = resolved.get(&CanonicalUrl::from_url(&url))?;
            Some(relative_reference(page_local_path, path))
        };

        for_each_reference(&dom, |node, kinds| {
            let NodeData::Element { ref attrs, .. } = node.data else {
                return;
            };
            let mut attrs = attrs.borrow_mut();

            for &(index, kind) in kinds {
                let value = attrs[index].value.to_string();
                let replacement = match kind {
                    RefKind::Asset(_) => local_for(&value),
                    RefKind::Srcset(_) => rewrite_srcset(&value, &local_for),
                    RefKind::Style => {
                        let replacements: HashMap<String, String> = css_url_references(&value)
                            .into_iter()
                            .filter_map(|raw| local_for(&raw).map(|local| (raw, local)))
                            .collect();
                        if replacements.is_empty() {
                            None
                        } else {
                            Some(rewrite_css_urls(&value, &replacements))
                        }
                    }
                    RefKind::Anchor => self.local_anchor(&value, page_local_path, known_target),
                };

                if let Some(replacement) = replacement {
                    attrs[index].value = replacement.into();
                }
            }
        });

        serialize(&dom)
    }

    fn local_anchor<F>(&self, raw: &str, page_local_path: &str, known_target: &F) -> Option<String>
    where
        F: Fn(&CanonicalUrl) -> Option<String>,
    {
        let url = resolve_reference(&self.page_url, raw)?;
        let canonical = self.scope.check(&url).ok()?;
        let target = known_target(&canonical)?;

        let mut href = relative_reference(page_local_path, &target);
        if let Some(fragment) = url.fragment() {
            href.push('#');
            href.push_str(fragment);
        }
        Some(href)
    }
}

fn parse(html: &[u8]) -> Option<RcDom> {
    parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .read_from(&mut &html[..])
        .ok()
}

fn serialize(dom: &RcDom) -> Option<Vec<u8>> {
    let document: SerializableHandle = dom.document.clone().into();
    let mut out = Vec::new();
    html5ever::serialize(&mut out, &document, SerializeOpts::default()).ok()?;
    Some(out)
}

/// Depth-first, document-order walk calling `visit` for every element that
/// carries at least one reference attribute.
fn for_each_reference<V>(dom: &RcDom, mut visit: V)
where
    V: FnMut(&Handle, &[(usize, RefKind)]),
{
    let mut stack = vec![dom.document.clone()];
    while let Some(node) = stack.pop() {
        if let NodeData::Element {
            ref name,
            ref attrs,
            ..
        } = node.data
        {
            let kinds = reference_kinds(&name.local, &attrs.borrow());
            if !kinds.is_empty() {
                visit(&node, &kinds);
            }
        }

        let children = node.children.borrow();
        stack.extend(children.iter().rev().cloned());
    }
}

fn attr_value<'a>(attrs: &'a [Attribute], name: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|attr| &*attr.name.local == name)
        .map(|attr| &*attr.value)
}

/// Which attributes of a `tag` element hold references, and of what kind.
fn reference_kinds(tag: &str, attrs: &[Attribute]) -> Vec<(usize, RefKind)> {
    let link_hint = || -> Option<ResourceCategory> {
        let rel = attr_value(attrs, "rel")?.to_ascii_lowercase();
        let tokens: Vec<&str> = rel.split_whitespace().collect();
        if tokens.contains(&"stylesheet") {
            return Some(ResourceCategory::Stylesheet);
        }
        if tokens
            .iter()
            .any(|t| matches!(*t, "icon" | "apple-touch-icon" | "apple-touch-icon-precomposed" | "mask-icon"))
        {
            return Some(ResourceCategory::Image);
        }
        if tokens.contains(&"preload") || tokens.contains(&"prefetch") {
            return match attr_value(attrs, "as")?.to_ascii_lowercase().as_str() {
                "style" => Some(ResourceCategory::Stylesheet),
                "script" => Some(ResourceCategory::Script),
                "font" => Some(ResourceCategory::Font),
                "image" => Some(ResourceCategory::Image),
                _ => None,
            };
        }
        None
    };

    let mut kinds = Vec::new();
    for (index, attr) in attrs.iter().enumerate() {
        let kind = match (tag, &*attr.name.local) {
            (_, "style") => Some(RefKind::Style),
            ("a", "href") => Some(RefKind::Anchor),
            ("link", "href") => link_hint().map(RefKind::Asset),
            ("script", "src") => Some(RefKind::Asset(ResourceCategory::Script)),
            ("img", "src" | "data-src") => Some(RefKind::Asset(ResourceCategory::Image)),
            ("img", "srcset" | "data-srcset") | ("source", "srcset") => {
                Some(RefKind::Srcset(ResourceCategory::Image))
            }
            ("video", "poster") => Some(RefKind::Asset(ResourceCategory::Image)),
            ("source" | "video" | "audio", "src") => {
                Some(RefKind::Asset(ResourceCategory::OtherBinary))
            }
            _ => None,
        };
        if let Some(kind) = kind {
            kinds.push((index, kind));
        }
    }
    kinds
}

/// Splits a `srcset` value into `(url, descriptor)` candidates. Commas inside
/// `data:` URIs do not split candidates.
pub fn parse_srcset(value: &str) -> Vec<(String, String)> {
    let mut candidates = Vec::new();
    let mut parts = value.split(',').peekable();

    while let Some(part) = parts.next() {
        let mut candidate = part.trim().to_string();
        if candidate.to_ascii_lowercase().starts_with("data:") && !candidate.contains(' ') {
            if let Some(rest) = parts.next() {
                candidate.push(',');
                candidate.push_str(rest.trim_end());
            }
        }
        if candidate.is_empty() {
            continue;
        }

        match candidate.split_once(char::is_whitespace) {
            Some((url, descriptor)) => {
                candidates.push((url.to_string(), descriptor.trim().to_string()))
            }
            None => candidates.push((candidate, String::new())),
        }
    }
    candidates
}

fn rewrite_srcset<F>(value: &str, local_for: &F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut changed = false;
    let rewritten: Vec<String> = parse_srcset(value)
        .into_iter()
        .map(|(url, descriptor)| {
            let url = match local_for(&url) {
                Some(local) => {
                    changed = true;
                    local
                }
                None => url,
            };
            if descriptor.is_empty() {
                url
            } else {
                format!("{} {}", url, descriptor)
            }
        })
        .collect();

    changed.then(|| rewritten.join(", "))
}

fn css_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"url\(\s*['"]?([^'"()\s]+)['"]?\s*\)"#).expect("CSS url() pattern is valid")
    })
}

/// Distinct `url(...)` targets in a stylesheet or `style` attribute, in order
/// of appearance, `data:` URIs excluded.
pub fn css_url_references(css: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    css_url_pattern()
        .captures_iter(css)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .filter(|url| !url.to_ascii_lowercase().starts_with("data:"))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

/// Replaces each `url(...)` whose target is a key of `replacements`.
pub fn rewrite_css_urls(css: &str, replacements: &HashMap<String, String>) -> String {
    css_url_pattern()
        .replace_all(css, |caps: &Captures| match replacements.get(&caps[1]) {
            Some(local) => format!("url(\"{}\")", local),
            None => caps[0].to_string(),
        })
        .into_owned()
}
