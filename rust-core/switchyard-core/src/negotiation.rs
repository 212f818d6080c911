//! # Content Negotiation
//!
//! Picks the body parser from `Content-Type` and the renderer from `Accept`.
//!
//! Parsers match on the exact `type/subtype`; parameters such as `charset`
//! are ignored. A request without `Content-Type` gets the text parser.
//! Renderers are tried in route order: first those the client accepts, then,
//! if none of them can render the model, any renderer at all.

use crate::codec::{Model, Parser, Renderer, TextParser};
use crate::error::{Error, Result};
use crate::media::MediaType;
use crate::route::Route;
use hyper::body::Bytes;
use std::sync::Arc;

/// Whether an `Accept` header admits `media_type`
///
/// An absent header accepts everything. The most specific range covering the
/// type decides (exact, then `type/*`, then `*/*`); `q=0` is a refusal, so
/// `application/json;q=0, */*` refuses JSON.
#[must_use]
pub fn accept(accept_header: Option<&str>, media_type: &MediaType) -> bool {
    let Some(header) = accept_header else {
        return true;
    };
    if header.trim().is_empty() {
        return true;
    }

    let mut best: Option<(u8, f32)> = None;
    for range in header.split(',').filter_map(|r| MediaType::parse(r).ok()) {
        if !media_type.within(&range) {
            continue;
        }
        let rank = precision(&range);
        if best.map_or(true, |(top, _)| rank > top) {
            best = Some((rank, quality(&range)));
        }
    }
    best.is_some_and(|(_, q)| q > 0.0)
}

fn precision(range: &MediaType) -> u8 {
    match (range.type_name(), range.subtype_name()) {
        ("*", _) => 0,
        (_, "*") => 1,
        _ => 2,
    }
}

fn quality(range: &MediaType) -> f32 {
    range
        .param("q")
        .and_then(|q| q.trim().parse::<f32>().ok())
        .unwrap_or(1.0)
}

/// Parser for a route and a request `Content-Type`
///
/// # Errors
///
/// Returns `Error::UnsupportedMediaType` when no parser handles the type.
pub fn select_parser(route: &Route, content_type: Option<&str>) -> Result<Arc<dyn Parser>> {
    parser_for(route.parsers(), content_type)
}

/// Parser among `parsers` for a request `Content-Type`
///
/// # Errors
///
/// Returns `Error::UnsupportedMediaType` when no parser handles the type.
pub fn parser_for(parsers: &[Arc<dyn Parser>], content_type: Option<&str>) -> Result<Arc<dyn Parser>> {
    let Some(raw) = content_type else {
        return Ok(parsers
            .iter()
            .find(|p| p.media_type().same_essence(&MediaType::TEXT))
            .cloned()
            .unwrap_or_else(|| Arc::new(TextParser)));
    };

    let media = MediaType::parse(raw)?;
    parsers
        .iter()
        .find(|p| p.media_type().same_essence(&media))
        .cloned()
        .ok_or_else(|| Error::UnsupportedMediaType(raw.to_string()))
}

/// Rendered body and the media type that produced it
#[derive(Debug, Clone)]
pub struct Rendered {
    /// `Content-Type` of the body
    pub media_type: MediaType,
    /// Encoded body
    pub body: Bytes,
}

/// Render `model` with the route's renderers
///
/// # Errors
///
/// Returns `Error::MissingRenderer` when no renderer handles the model, or
/// the renderer's own error.
pub fn select_renderer(route: &Route, model: &Model, accept_header: Option<&str>) -> Result<Rendered> {
    render_with(route.renderers(), model, accept_header)
        .map_err(|e| match e {
            Error::MissingRenderer { .. } => Error::MissingRenderer {
                route: route.pattern().raw().to_string(),
            },
            other => other,
        })
}

/// Render `model` with the first suitable renderer in `renderers`
///
/// # Errors
///
/// Returns `Error::MissingRenderer` when no renderer handles the model, or
/// the renderer's own error.
pub fn render_with(
    renderers: &[Arc<dyn Renderer>],
    model: &Model,
    accept_header: Option<&str>,
) -> Result<Rendered> {
    let acceptable = renderers
        .iter()
        .filter(|r| accept(accept_header, &r.media_type()));
    if let Some(rendered) = first_rendered(acceptable, model)? {
        return Ok(rendered);
    }

    if accept_header.is_some() {
        if let Some(rendered) = first_rendered(renderers.iter(), model)? {
            return Ok(rendered);
        }
    }

    Err(Error::MissingRenderer {
        route: String::from("<none>"),
    })
}

fn first_rendered<'a>(
    renderers: impl Iterator<Item = &'a Arc<dyn Renderer>>,
    model: &Model,
) -> Result<Option<Rendered>> {
    for renderer in renderers {
        if let Some(body) = renderer.render(model)? {
            return Ok(Some(Rendered {
                media_type: renderer.media_type(),
                body,
            }));
        }
    }
    Ok(None)
}
