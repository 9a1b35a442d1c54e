use serde::Deserialize;

use crate::model::Video;

const SHARE_BASE: &str = "https://www.tiktok.com";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemListResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: Option<String>,
    #[serde(default)]
    pub item_list: Vec<ItemStruct>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemDetailResp {
    #[serde(default)]
    pub status_code: i64,
    #[serde(default)]
    pub status_msg: Option<String>,
    pub item_info: Option<ItemInfo>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ItemInfo {
    pub item_struct: ItemStruct,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ItemStruct {
    pub id: String,
    #[serde(default)]
    pub desc: String,
    pub author: Author,
    #[serde(default)]
    pub video: Option<VideoMeta>,
    #[serde(default)]
    pub image_post: Option<ImagePost>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub unique_id: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct VideoMeta {
    #[serde(default)]
    pub play_addr: Option<String>,
    #[serde(default)]
    pub download_addr: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ImagePost {
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Deserialize, Debug)]
pub struct Image {
    #[serde(rename = "imageURL")]
    pub image_url: UrlList,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct UrlList {
    #[serde(default)]
    pub url_list: Vec<String>,
}

impl VideoMeta {
    /// Watermark-free `downloadAddr` when present, `playAddr` otherwise.
    pub fn best_link(&self) -> Option<String> {
        [&self.download_addr, &self.play_addr]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
    }
}

impl From<ItemStruct> for Video {
    fn from(item: ItemStruct) -> Self {
        let images = item
            .image_post
            .map(|post| {
                post.images
                    .into_iter()
                    .filter_map(|img| img.image_url.url_list.into_iter().next())
                    .collect()
            })
            .unwrap_or_default();

        Video {
            share_url: format!("{SHARE_BASE}/@{}/video/{}", item.author.unique_id, item.id),
            id: item.id,
            title: item.desc,
            author: item.author.unique_id,
            // Filled by enrichment; the list endpoint's links expire quickly.
            download_url: None,
            images,
        }
    }
}
