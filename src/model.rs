use serde::{Deserialize, Serialize};

/// Label of the inline button that links back to the original post.
pub const LINK_BUTTON_TEXT: &str = "Original";

/// A liked post as returned by the feed.
///
/// Everything except `download_url` is fixed at fetch time; the download link
/// is filled in by [`crate::feed::FeedClient::enrich`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Video {
    pub id: String,
    pub title: String,
    pub author: String,
    pub share_url: String,
    pub download_url: Option<String>,
    /// Image URLs of a photo post, in display order. Empty for regular videos.
    pub images: Vec<String>,
}

/// One entry of a photo album.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Photo {
    pub url: String,
    pub caption: Option<String>,
}

/// Inline URL button attached to every published message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkButton {
    pub text: String,
    pub url: String,
}

impl Video {
    pub fn is_album(&self) -> bool {
        !self.images.is_empty()
    }

    /// Caption identifying the author and the title, e.g. `@alice: hello`.
    pub fn caption(&self) -> String {
        format!("@{}: {}", self.author, self.title)
    }

    pub fn link_button(&self) -> LinkButton {
        LinkButton {
            text: LINK_BUTTON_TEXT.to_string(),
            url: self.share_url.clone(),
        }
    }

    /// Photos of the album in order; only the first one carries the caption.
    pub fn album(&self) -> Vec<Photo> {
        self.images
            .iter()
            .enumerate()
            .map(|(i, url)| Photo {
                url: url.clone(),
                caption: (i == 0).then(|| self.caption()),
            })
            .collect()
    }
}
