//! Request classification
//!
//! Pure functions: nothing here touches storage or the network.

use crate::net::{Destination, FetchRequest};
use axum::http::Method;
use serde::Serialize;

/// Which policy handles a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    /// Pronunciation clips: cache first
    Audio,
    /// Documents, scripts, styles, images: stale while revalidate
    AppShell,
    /// `/api/` calls: network first
    Api,
    /// Not intercepted
    Passthrough,
}

/// Strip `origin` from a same-origin absolute URL; `None` for other origins
pub fn same_origin_path<'a>(url: &'a str, origin: &str) -> Option<&'a str> {
    if !url.contains("://") {
        return Some(url);
    }
    let rest = url.strip_prefix(origin.trim_end_matches('/'))?;
    match rest.chars().next() {
        None => Some("/"),
        Some('/') | Some('?') | Some('#') => Some(rest),
        // `http://host:80` must not match `http://host:8080`
        Some(_) => None,
    }
}

/// Classify a request; only same-origin GETs are ever intercepted
pub fn classify(request: &FetchRequest, origin: &str) -> RequestClass {
    if request.method != Method::GET || same_origin_path(&request.url, origin).is_none() {
        return RequestClass::Passthrough;
    }

    let path = request.path();
    if path.contains("/audio/") {
        return RequestClass::Audio;
    }
    if matches!(
        request.destination,
        Destination::Document | Destination::Script | Destination::Style | Destination::Image
    ) {
        return RequestClass::AppShell;
    }
    if path.contains("/api/") {
        return RequestClass::Api;
    }
    RequestClass::Passthrough
}

/// Cache key for a request: origin-relative path plus query
pub fn cache_key(request: &FetchRequest, origin: &str) -> String {
    let relative = same_origin_path(&request.url, origin).unwrap_or(&request.url);
    let without_fragment = relative.split('#').next().unwrap_or(relative);
    if without_fragment.starts_with('/') {
        without_fragment.to_string()
    } else {
        format!("/{}", without_fragment)
    }
}

/// Infer the fetch destination of an incoming HTTP request
///
/// `Sec-Fetch-Dest` wins when present; otherwise HTML `Accept` means a
/// navigation, and the file extension decides the rest.
pub fn infer_destination(sec_fetch_dest: Option<&str>, accept: Option<&str>, path: &str) -> Destination {
    if let Some(dest) = sec_fetch_dest.filter(|d| !d.trim().is_empty()) {
        return Destination::from_fetch_dest(dest);
    }
    if accept.is_some_and(|a| a.contains("text/html")) {
        return Destination::Document;
    }

    let extension = path
        .rsplit('/')
        .next()
        .and_then(|file| file.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("html") | Some("htm") => Destination::Document,
        Some("js") | Some("mjs") => Destination::Script,
        Some("css") => Destination::Style,
        Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("svg") | Some("webp")
        | Some("ico") => Destination::Image,
        Some("mp3") | Some("wav") | Some("ogg") | Some("m4a") => Destination::Audio,
        _ => Destination::Empty,
    }
}
