use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::header::{COOKIE, REFERER};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::fmt;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::feed::model::{ItemDetailResp, ItemListResp};
use crate::model::Video;

pub mod model;

const TIKTOK_BASE: &str = "https://www.tiktok.com/";
/// Web app id the TikTok site sends with every API call.
const WEB_AID: &str = "1988";

/// Source of liked videos.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Current liked list, in the order the service returns it.
    async fn fetch_liked(&self) -> Result<Vec<Video>>;

    /// Resolve the download link of `video` in place.
    async fn enrich(&self, video: &mut Video) -> Result<()>;
}

#[derive(Clone)]
pub struct TikTokClient {
    http: Client,
    base_url: Url,
    sec_uid: String,
    session_id: String,
    page_size: u32,
}

impl fmt::Debug for TikTokClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TikTokClient")
            .field("base_url", &self.base_url)
            .field("sec_uid", &self.sec_uid)
            .finish_non_exhaustive()
    }
}

impl TikTokClient {
    pub fn with_base_url(sec_uid: String, session_id: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("Mozilla/5.0 (X11; Linux x86_64) tiktok-fav-publisher/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url,
            sec_uid,
            session_id,
            page_size: 30,
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = match &cfg.tiktok.base_url {
            Some(url) => Url::parse(url).context("invalid tiktok.base_url")?,
            None => Url::parse(TIKTOK_BASE).expect("valid default TikTok URL"),
        };
        let client = Self::with_base_url(
            cfg.tiktok.sec_uid.clone(),
            cfg.tiktok.session_id.clone(),
            base_url,
        )?;
        Ok(client.page_size(cfg.tiktok.page_size))
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn build_liked_request(&self) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("api/favorite/item_list/")
            .context("invalid TikTok base URL")?;
        let count = self.page_size.to_string();
        self.http
            .get(endpoint)
            .query(&[
                ("aid", WEB_AID),
                ("secUid", self.sec_uid.as_str()),
                ("count", count.as_str()),
                ("cursor", "0"),
            ])
            .header(COOKIE, format!("sessionid={}", self.session_id))
            .header(REFERER, self.base_url.as_str())
            .build()
            .context("failed to build liked-list request")
    }

    pub fn build_detail_request(&self, item_id: &str) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join("api/item/detail/")
            .context("invalid TikTok base URL")?;
        self.http
            .get(endpoint)
            .query(&[("aid", WEB_AID), ("itemId", item_id)])
            .header(COOKIE, format!("sessionid={}", self.session_id))
            .header(REFERER, self.base_url.as_str())
            .build()
            .context("failed to build item-detail request")
    }

    async fn execute<T: DeserializeOwned>(&self, request: reqwest::Request) -> Result<T> {
        debug!(url = %request.url(), "tiktok request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach TikTok")?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by TikTok: {}", body);
            return Err(anyhow!("received 429 from TikTok: {}", body));
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("tiktok error {}: {}", status, body));
        }

        let body = res.text().await.context("failed to read TikTok response")?;
        serde_json::from_str(&body).context("invalid TikTok response JSON")
    }
}

fn check_status(code: i64, msg: Option<&str>) -> Result<()> {
    if code != 0 {
        return Err(anyhow!(
            "tiktok statusCode {}: {}",
            code,
            msg.unwrap_or("no message")
        ));
    }
    Ok(())
}

/// Converts a liked-list response into videos, preserving order.
pub fn parse_liked(resp: ItemListResp) -> Result<Vec<Video>> {
    check_status(resp.status_code, resp.status_msg.as_deref())?;
    Ok(resp.item_list.into_iter().map(Video::from).collect())
}

/// Copies the resolved download link from a detail response onto `video`.
pub fn apply_detail(video: &mut Video, resp: ItemDetailResp) -> Result<()> {
    check_status(resp.status_code, resp.status_msg.as_deref())?;
    let item = resp
        .item_info
        .ok_or_else(|| anyhow!("item {} missing from detail response", video.id))?
        .item_struct;
    if item.id != video.id {
        return Err(anyhow!(
            "detail response is for item {} instead of {}",
            item.id,
            video.id
        ));
    }
    let link = item.video.and_then(|meta| meta.best_link());
    // Photo posts are published from their image URLs; only videos need a link.
    if link.is_none() && !video.is_album() {
        return Err(anyhow!("no download link for item {}", video.id));
    }
    video.download_url = link;
    Ok(())
}

#[async_trait]
impl FeedClient for TikTokClient {
    #[instrument(skip_all)]
    async fn fetch_liked(&self) -> Result<Vec<Video>> {
        let request = self.build_liked_request()?;
        let resp: ItemListResp = self.execute(request).await?;
        let has_more = resp.has_more;
        let videos = parse_liked(resp)?;
        debug!(count = videos.len(), has_more, "fetched liked videos");
        Ok(videos)
    }

    #[instrument(skip_all, fields(id = %video.id))]
    async fn enrich(&self, video: &mut Video) -> Result<()> {
        let request = self.build_detail_request(&video.id)?;
        let resp: ItemDetailResp = self.execute(request).await?;
        apply_detail(video, resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> TikTokClient {
        TikTokClient::with_base_url(
            "MS4wLjABAAAA".into(),
            "secret-session".into(),
            Url::parse("http://127.0.0.1:9/").unwrap(),
        )
        .unwrap()
        .page_size(16)
    }

    fn liked_fixture() -> serde_json::Value {
        json!({
            "statusCode": 0,
            "hasMore": false,
            "itemList": [
                {
                    "id": "a1",
                    "desc": "first",
                    "author": { "uniqueId": "alice" },
                    "video": { "playAddr": "https://v/a1-play" }
                },
                {
                    "id": "b1",
                    "desc": "photos",
                    "author": { "uniqueId": "bob" },
                    "imagePost": { "images": [
                        { "imageURL": { "urlList": ["https://img/b1-0.jpg", "https://mirror/b1-0.jpg"] } },
                        { "imageURL": { "urlList": ["https://img/b1-1.jpg"] } },
                        { "imageURL": { "urlList": [] } }
                    ] }
                }
            ]
        })
    }

    #[test]
    fn liked_request_carries_account_and_session() {
        let req = client().build_liked_request().unwrap();
        let url = req.url().as_str();
        assert!(url.starts_with("http://127.0.0.1:9/api/favorite/item_list/?"));
        assert!(url.contains("secUid=MS4wLjABAAAA"));
        assert!(url.contains("count=16"));
        assert!(url.contains("cursor=0"));
        assert_eq!(
            req.headers().get(COOKIE).unwrap(),
            "sessionid=secret-session"
        );
    }

    #[test]
    fn detail_request_targets_item() {
        let req = client().build_detail_request("7301").unwrap();
        assert_eq!(req.url().path(), "/api/item/detail/");
        assert!(req.url().as_str().contains("itemId=7301"));
    }

    #[test]
    fn parse_liked_keeps_order_and_images() {
        let resp: ItemListResp = serde_json::from_value(liked_fixture()).unwrap();
        let videos = parse_liked(resp).unwrap();
        assert_eq!(videos.len(), 2);

        assert_eq!(videos[0].id, "a1");
        assert_eq!(videos[0].author, "alice");
        assert_eq!(videos[0].share_url, "https://www.tiktok.com/@alice/video/a1");
        assert!(videos[0].images.is_empty());
        assert!(videos[0].download_url.is_none());

        assert_eq!(videos[1].id, "b1");
        assert_eq!(
            videos[1].images,
            vec!["https://img/b1-0.jpg".to_string(), "https://img/b1-1.jpg".to_string()]
        );
    }

    #[test]
    fn parse_liked_rejects_error_status() {
        let resp: ItemListResp =
            serde_json::from_value(json!({ "statusCode": 10201, "statusMsg": "login required" }))
                .unwrap();
        let err = parse_liked(resp).unwrap_err();
        assert!(err.to_string().contains("login required"));
    }

    #[test]
    fn apply_detail_prefers_download_addr() {
        let resp: ItemListResp = serde_json::from_value(liked_fixture()).unwrap();
        let mut video = parse_liked(resp).unwrap().remove(0);

        let detail: ItemDetailResp = serde_json::from_value(json!({
            "statusCode": 0,
            "itemInfo": { "itemStruct": {
                "id": "a1",
                "author": { "uniqueId": "alice" },
                "video": { "playAddr": "https://v/a1-play", "downloadAddr": "https://v/a1-dl" }
            } }
        }))
        .unwrap();
        apply_detail(&mut video, detail).unwrap();
        assert_eq!(video.download_url.as_deref(), Some("https://v/a1-dl"));
    }

    #[test]
    fn apply_detail_falls_back_to_play_addr() {
        let mut video = Video::from(
            serde_json::from_value::<model::ItemStruct>(json!({
                "id": "a1", "author": { "uniqueId": "alice" }
            }))
            .unwrap(),
        );
        let detail: ItemDetailResp = serde_json::from_value(json!({
            "itemInfo": { "itemStruct": {
                "id": "a1",
                "author": { "uniqueId": "alice" },
                "video": { "playAddr": "https://v/a1-play", "downloadAddr": "" }
            } }
        }))
        .unwrap();
        apply_detail(&mut video, detail).unwrap();
        assert_eq!(video.download_url.as_deref(), Some("https://v/a1-play"));
    }

    #[test]
    fn apply_detail_without_link_fails() {
        let mut video = Video::from(
            serde_json::from_value::<model::ItemStruct>(json!({
                "id": "a1", "author": { "uniqueId": "alice" }
            }))
            .unwrap(),
        );
        let detail: ItemDetailResp = serde_json::from_value(json!({
            "itemInfo": { "itemStruct": { "id": "a1", "author": { "uniqueId": "alice" } } }
        }))
        .unwrap();
        assert!(apply_detail(&mut video, detail).is_err());
        assert!(video.download_url.is_none());

        let mismatched: ItemDetailResp = serde_json::from_value(json!({
            "itemInfo": { "itemStruct": {
                "id": "zz", "author": { "uniqueId": "alice" },
                "video": { "playAddr": "https://v/zz" }
            } }
        }))
        .unwrap();
        assert!(apply_detail(&mut video, mismatched).is_err());
    }

    #[test]
    fn photo_post_needs_no_download_link() {
        let resp: ItemListResp = serde_json::from_value(liked_fixture()).unwrap();
        let mut album = parse_liked(resp).unwrap().remove(1);
        let detail: ItemDetailResp = serde_json::from_value(json!({
            "itemInfo": { "itemStruct": { "id": "b1", "author": { "uniqueId": "bob" } } }
        }))
        .unwrap();
        apply_detail(&mut album, detail).unwrap();
        assert!(album.download_url.is_none());
    }
}
