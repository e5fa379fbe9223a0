use crate::config::{ResponseFormat, SearchConfig};
use crate::types::*;
use tracing::debug;

/// `{scheme}://farm{farm}.{host}/{server}/{id}_{secret}.jpg`
pub fn image_url(config: &SearchConfig, farm: &str, server: &str, id: &str, secret: &str) -> String {
    format!(
        "{}://farm{}.{}/{}/{}_{}.jpg",
        config.image_scheme, farm, config.image_host, server, id, secret
    )
}

/// Parse a search reply into results, keeping the server's order.
pub fn parse_photos(config: &SearchConfig, body: &[u8]) -> Result<Vec<ImageResult>, FetchError> {
    let text = std::str::from_utf8(body)
        .map_err(|e| FetchError::Malformed(format!("response is not UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(FetchError::Malformed("empty response body".to_string()));
    }
    let results = match config.response_format {
        ResponseFormat::Xml => parse_xml(config, text)?,
        ResponseFormat::Json => parse_json(config, text)?,
    };
    debug!("Parsed {} photo records", results.len());
    Ok(results)
}

fn parse_xml(config: &SearchConfig, text: &str) -> Result<Vec<ImageResult>, FetchError> {
    let rsp: XmlRsp = quick_xml::de::from_str(text)
        .map_err(|e| FetchError::Malformed(format!("invalid XML reply: {}", e)))?;
    if rsp.stat != "ok" {
        let (code, message) = rsp
            .err
            .map(|e| (e.code, e.msg))
            .unwrap_or((0, format!("stat={}", rsp.stat)));
        return Err(FetchError::Api { code, message });
    }
    let photos = rsp.photos.map(|p| p.photo).unwrap_or_default();
    Ok(photos
        .into_iter()
        .map(|p| ImageResult {
            image_url: image_url(config, &p.farm, &p.server, &p.id, &p.secret),
            title: p.title,
        })
        .collect())
}

fn parse_json(config: &SearchConfig, text: &str) -> Result<Vec<ImageResult>, FetchError> {
    let rsp: JsonRsp = serde_json::from_str(text)
        .map_err(|e| FetchError::Malformed(format!("invalid JSON reply: {}", e)))?;
    if rsp.stat != "ok" {
        return Err(FetchError::Api {
            code: rsp.code.unwrap_or(0),
            message: rsp.message.unwrap_or_else(|| format!("stat={}", rsp.stat)),
        });
    }
    let photos = rsp.photos.map(|p| p.photo).unwrap_or_default();
    Ok(photos
        .into_iter()
        .map(|p| ImageResult {
            image_url: image_url(config, &p.farm, &p.server, &p.id, &p.secret),
            title: p.title,
        })
        .collect())
}
