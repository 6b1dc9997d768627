// components/release_downloader/src/page/bandcamp.rs
use super::{DownloadPage, MarkupFormat, PageInfo};
use crate::error::DescriptorError;
use once_cell::sync::Lazy;
use regex::Regex;
use release_primitives::{
    LabelDescriptor, Offer, ReleaseDescriptor, ReleaseId, ReleaseKind, ReleaseRef,
};
use scraper::{ElementRef, Html, Selector};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static PAGE_TYPE: Lazy<Selector> = Lazy::new(|| selector(r#"head meta[property="og:type"]"#));
static TRALBUM: Lazy<Selector> = Lazy::new(|| selector("script[data-tralbum]"));
static HEAD_LD_JSON: Lazy<Selector> =
    Lazy::new(|| selector(r#"head > script[type="application/ld+json"]"#));
static COLLECT_INFO: Lazy<Selector> =
    Lazy::new(|| selector("script[data-tralbum-collect-info]"));
static BAND: Lazy<Selector> = Lazy::new(|| selector("script[data-band]"));
static MUSIC_GRID: Lazy<Selector> = Lazy::new(|| selector("ol#music-grid"));
static GRID_ITEM: Lazy<Selector> = Lazy::new(|| selector("li"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));
static PAGE_DATA: Lazy<Selector> = Lazy::new(|| selector("div#pagedata"));
static RCDATA: Lazy<Selector> = Lazy::new(|| selector("textarea"));
static STAT_RESULT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"var _statDL_result = (.+);").expect("static regex"));

const TRALBUM_BLOCK: &str = "data-tralbum block";
const LD_JSON_BLOCK: &str = "ld+json block";
const CLIENT_ITEMS_BLOCK: &str = "data-client-items block";
const PAGE_DATA_BLOCK: &str = "pagedata blob";

/// Markup of the platform as observed on album, track, artist and
/// download pages
#[derive(Debug, Default, Clone, Copy)]
pub struct BandcampMarkup;

impl MarkupFormat for BandcampMarkup {
    fn name(&self) -> &'static str {
        "bandcamp"
    }

    fn classify(&self, page_url: &Url, body: &str) -> Result<PageInfo, DescriptorError> {
        let document = Html::parse_document(body);
        let page_type = document
            .select(&PAGE_TYPE)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .ok_or(DescriptorError::MissingMarker("og:type marker"))?;

        match page_type {
            "album" | "song" => release(&document, page_url).map(PageInfo::Release),
            "band" => label(&document, page_url).map(PageInfo::Label),
            other => Err(DescriptorError::UnknownPageType(other.to_string())),
        }
    }

    fn download_page(&self, page_url: &Url, body: &str) -> Result<DownloadPage, DescriptorError> {
        let document = Html::parse_document(body);
        let blob = document
            .select(&PAGE_DATA)
            .next()
            .and_then(|div| div.value().attr("data-blob"))
            .ok_or(DescriptorError::MissingMarker(PAGE_DATA_BLOCK))?;

        let data: PageData = parse_json_attr(blob, PAGE_DATA_BLOCK)?;
        let item = data
            .digital_items
            .into_iter()
            .next()
            .ok_or(DescriptorError::MissingField {
                block: PAGE_DATA_BLOCK,
                field: "digital_items",
            })?;

        let release = match (
            item.kind.as_deref().and_then(ReleaseKind::from_platform_type),
            item.item_id.as_ref().and_then(as_u64),
        ) {
            (Some(kind), Some(id)) => Some(ReleaseId::new(kind, id)),
            _ => None,
        };

        let mut downloads = HashMap::new();
        for (key, entry) in item.downloads.unwrap_or_default() {
            let Some(link) = entry.url else { continue };
            let url = page_url
                .join(&link)
                .map_err(|_| DescriptorError::InvalidLink(link.clone()))?;
            downloads.insert(key, url);
        }

        Ok(DownloadPage { release, downloads })
    }

    fn stat_retry_url(&self, body: &str) -> Option<Url> {
        let captures = STAT_RESULT.captures(body)?;
        let stat: StatResult = serde_json::from_str(&captures[1]).ok()?;
        Url::parse(&stat.retry_url?).ok()
    }
}

// Transactional block

#[derive(Debug, Deserialize)]
struct Tralbum {
    #[serde(default)]
    current: Option<TralbumCurrent>,
    #[serde(rename = "hasAudio", default)]
    has_audio: Option<Value>,
    #[serde(rename = "freeDownloadPage", default)]
    free_download_page: Option<String>,
    #[serde(default)]
    is_purchased: Option<Value>,
    #[serde(default)]
    item_type: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TralbumCurrent {
    #[serde(default)]
    id: Option<Value>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    minimum_price: Option<f64>,
    #[serde(default)]
    require_email: Option<Value>,
}

// Descriptive block

#[derive(Debug, Deserialize)]
struct HeadData {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "creditText", default)]
    credit_text: Option<String>,
    #[serde(default)]
    keywords: Option<Value>,
    #[serde(rename = "albumRelease", default)]
    album_release: Vec<AlbumRelease>,
    #[serde(rename = "inAlbum", default)]
    in_album: Option<InAlbum>,
}

#[derive(Debug, Deserialize)]
struct InAlbum {
    #[serde(rename = "albumRelease", default)]
    album_release: Vec<AlbumRelease>,
}

#[derive(Debug, Deserialize)]
struct AlbumRelease {
    #[serde(rename = "@id", default)]
    id: Option<String>,
    #[serde(default)]
    offers: Option<Offers>,
}

#[derive(Debug, Deserialize)]
struct Offers {
    #[serde(default)]
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct CollectInfo {
    #[serde(default)]
    fan_id: Option<Value>,
}

// Collection blocks

#[derive(Debug, Deserialize)]
struct Band {
    #[serde(default)]
    local_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientItem {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    page_url: Option<String>,
    #[serde(default)]
    filtered: Option<Value>,
}

// Download page

#[derive(Debug, Deserialize)]
struct PageData {
    #[serde(default)]
    digital_items: Vec<DigitalItem>,
}

#[derive(Debug, Deserialize)]
struct DigitalItem {
    #[serde(default)]
    downloads: Option<HashMap<String, DownloadEntry>>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    item_id: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct DownloadEntry {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatResult {
    #[serde(default)]
    retry_url: Option<String>,
}

fn release(document: &Html, page_url: &Url) -> Result<ReleaseDescriptor, DescriptorError> {
    let tralbum_raw = document
        .select(&TRALBUM)
        .next()
        .and_then(|script| script.value().attr("data-tralbum"))
        .ok_or(DescriptorError::MissingMarker(TRALBUM_BLOCK))?;
    let head_raw = document
        .select(&HEAD_LD_JSON)
        .next()
        .map(|script| script.text().collect::<String>())
        .ok_or(DescriptorError::MissingMarker(LD_JSON_BLOCK))?;

    let tralbum: Tralbum = parse_json_attr(tralbum_raw, TRALBUM_BLOCK)?;
    let head: HeadData =
        serde_json::from_str(head_raw.trim()).map_err(|source| DescriptorError::MalformedBlock {
            block: LD_JSON_BLOCK,
            source,
        })?;

    let has_audio = tralbum
        .has_audio
        .as_ref()
        .map(truthy)
        .ok_or(DescriptorError::MissingField {
            block: TRALBUM_BLOCK,
            field: "hasAudio",
        })?;

    let canonical = [head.id.as_deref(), tralbum.url.as_deref()]
        .into_iter()
        .flatten()
        .find_map(|candidate| page_url.join(candidate).ok())
        .unwrap_or_else(|| page_url.clone());

    let current = tralbum.current.as_ref();
    let kind = current
        .and_then(|c| c.kind.as_deref())
        .or(tralbum.item_type.as_deref())
        .and_then(ReleaseKind::from_platform_type);
    let numeric = current
        .and_then(|c| c.id.as_ref())
        .or(tralbum.id.as_ref())
        .and_then(as_u64);
    let id = match (kind, numeric) {
        (Some(kind), Some(id)) => ReleaseId::new(kind, id),
        _ => {
            debug!(url = %canonical, "no structured release identity, using page url");
            ReleaseId::from_url(&canonical)
        }
    };

    let title = head
        .name
        .clone()
        .or_else(|| current.and_then(|c| c.title.clone()))
        .ok_or(DescriptorError::MissingField {
            block: LD_JSON_BLOCK,
            field: "name",
        })?;

    let price = current
        .and_then(|c| c.minimum_price)
        .or_else(|| offered_price(&head));
    let requires_email = current
        .and_then(|c| c.require_email.as_ref())
        .filter(|flag| !flag.is_null())
        .map(truthy)
        .unwrap_or(price == Some(0.0));

    let direct_link = match tralbum.free_download_page.as_deref() {
        Some(link) if !link.is_empty() => Some(
            canonical
                .join(link)
                .map_err(|_| DescriptorError::InvalidLink(link.to_string()))?,
        ),
        _ => None,
    };

    let collector_id = document
        .select(&COLLECT_INFO)
        .next()
        .and_then(|script| script.value().attr("data-tralbum-collect-info"))
        .and_then(|raw| parse_json_attr::<CollectInfo>(raw, "collect-info block").ok())
        .and_then(|info| info.fan_id.as_ref().and_then(as_u64));

    Ok(ReleaseDescriptor {
        id,
        title,
        about: head.description.clone().unwrap_or_default(),
        credits: head.credit_text.clone().unwrap_or_default(),
        tags: keywords(head.keywords.as_ref()),
        page_url: canonical,
        has_audio,
        offer: Offer {
            direct_link,
            price,
            requires_email,
            purchased: tralbum.is_purchased.as_ref().is_some_and(truthy),
            collector_id,
        },
    })
}

/// Price of the offer whose id equals the page id
fn offered_price(head: &HeadData) -> Option<f64> {
    let page_id = head.id.as_deref()?;
    let releases = match &head.in_album {
        Some(album) => &album.album_release,
        None => &head.album_release,
    };
    releases
        .iter()
        .find(|release| release.id.as_deref() == Some(page_id))
        .and_then(|release| release.offers.as_ref())
        .and_then(|offers| offers.price)
}

/// Tags differing only in case collapse into their lowercase form
fn keywords(value: Option<&Value>) -> BTreeSet<String> {
    let words: Vec<&str> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        Some(Value::String(s)) => s.split(',').collect(),
        _ => Vec::new(),
    };
    words
        .into_iter()
        .map(str::trim)
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn label(document: &Html, page_url: &Url) -> Result<LabelDescriptor, DescriptorError> {
    let band_raw = document
        .select(&BAND)
        .next()
        .and_then(|script| script.value().attr("data-band"))
        .ok_or(DescriptorError::MissingMarker("data-band block"))?;
    let band: Band = parse_json_attr(band_raw, "data-band block")?;
    let base = band
        .local_url
        .as_deref()
        .and_then(|local| page_url.join(local).ok())
        .unwrap_or_else(|| page_url.clone());

    let Some(grid) = document.select(&MUSIC_GRID).next() else {
        return Ok(LabelDescriptor::new(base, Vec::new()));
    };

    let mut refs = Vec::new();
    for item in grid.select(&GRID_ITEM) {
        if let Some(reference) = grid_item(item, &base)? {
            refs.push(reference);
        }
    }

    if let Some(raw) = grid.value().attr("data-client-items") {
        let items: Vec<ClientItem> = parse_json_attr(raw, CLIENT_ITEMS_BLOCK)?;
        for item in items {
            if item.filtered.as_ref().is_some_and(truthy) {
                continue;
            }
            let kind = item.kind.as_deref().and_then(ReleaseKind::from_platform_type);
            let id = item.id.as_ref().and_then(as_u64);
            let (Some(kind), Some(id), Some(link)) = (kind, id, item.page_url) else {
                debug!("skipping incomplete client item");
                continue;
            };
            refs.push(ReleaseRef {
                id: ReleaseId::new(kind, id),
                url: base
                    .join(&link)
                    .map_err(|_| DescriptorError::InvalidLink(link.clone()))?,
            });
        }
    }

    Ok(LabelDescriptor::new(base, refs))
}

fn grid_item(item: ElementRef<'_>, base: &Url) -> Result<Option<ReleaseRef>, DescriptorError> {
    let element = item.value();
    let hidden = element
        .attr("style")
        .map(|style| style.replace(' ', "").contains("display:none"))
        .unwrap_or(false);
    if hidden {
        return Ok(None);
    }

    let Some((kind, id)) = element.attr("data-item-id").and_then(|v| v.split_once('-')) else {
        return Ok(None);
    };
    let (Some(kind), Ok(id)) = (ReleaseKind::from_platform_type(kind), id.parse::<u64>()) else {
        return Ok(None);
    };
    let Some(href) = item.select(&LINK).next().and_then(|a| a.value().attr("href")) else {
        return Ok(None);
    };

    let url = base
        .join(href)
        .map_err(|_| DescriptorError::InvalidLink(href.to_string()))?;
    Ok(Some(ReleaseRef {
        id: ReleaseId::new(kind, id),
        url,
    }))
}

/// Decode a JSON attribute, tolerating a second level of HTML escaping
fn parse_json_attr<T: DeserializeOwned>(raw: &str, block: &'static str) -> Result<T, DescriptorError> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(source) if !raw.contains('&') => Err(DescriptorError::MalformedBlock { block, source }),
        Err(_) => serde_json::from_str(&unescape_entities(raw))
            .map_err(|source| DescriptorError::MalformedBlock { block, source }),
    }
}

/// Resolve character references the way the html parser does
///
/// A textarea holds raw text, so markup inside the JSON survives untouched.
fn unescape_entities(raw: &str) -> String {
    let fragment = Html::parse_fragment(&format!("<textarea>{raw}</textarea>"));
    fragment
        .select(&RCDATA)
        .next()
        .map(|textarea| textarea.text().collect())
        .unwrap_or_default()
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}
