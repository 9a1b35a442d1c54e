//! Publishing side: sends videos and photo albums to the destination chat.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use std::ops::Range;
use teloxide::dispatching::ShutdownToken;
use teloxide::prelude::*;
use teloxide::types::{
    ChatId, InlineKeyboardButton, InlineKeyboardMarkup, InputFile, InputMedia, InputMediaPhoto,
};
use teloxide::utils::command::BotCommands;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::model::{LinkButton, Photo};

/// Telegram accepts between 2 and 10 items per media group.
const MEDIA_GROUP_LIMIT: usize = 10;

#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Start the client's background transport. Called once before any send.
    async fn start(&self) -> Result<()>;

    /// Stop the background transport. Safe to call when not started.
    async fn stop(&self);

    async fn send_album(&self, chat_id: i64, photos: &[Photo], button: &LinkButton) -> Result<()>;

    async fn send_video(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        button: &LinkButton,
    ) -> Result<()>;
}

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "These commands are supported:")]
enum Command {
    #[command(description = "show the id of this chat.")]
    ChatId,
    #[command(description = "display this text.")]
    Help,
}

async fn answer(bot: Bot, msg: Message, cmd: Command) -> ResponseResult<()> {
    match cmd {
        Command::ChatId => {
            bot.send_message(msg.chat.id, format!("Chat id: {}", msg.chat.id.0))
                .await?
        }
        Command::Help => {
            bot.send_message(msg.chat.id, Command::descriptions().to_string())
                .await?
        }
    };
    Ok(())
}

struct Transport {
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// [`DeliveryClient`] backed by the Telegram Bot API.
pub struct TelegramDelivery {
    bot: Bot,
    transport: Mutex<Option<Transport>>,
}

impl TelegramDelivery {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            transport: Mutex::new(None),
        }
    }
}

fn parse_url(url: &str) -> Result<Url> {
    Url::parse(url).with_context(|| format!("invalid media URL {url:?}"))
}

fn keyboard(button: &LinkButton) -> Result<InlineKeyboardMarkup> {
    let url = parse_url(&button.url)?;
    Ok(InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::url(button.text.clone(), url),
    ]]))
}

/// Splits `len` photos into evenly sized media groups of at most
/// [`MEDIA_GROUP_LIMIT`]. For `len >= 2` every group holds at least two.
fn album_chunks(len: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let groups = len.div_ceil(MEDIA_GROUP_LIMIT);
    let base = len / groups;
    let extra = len % groups;
    let mut start = 0;
    (0..groups)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

fn media_photo(photo: &Photo) -> Result<InputMedia> {
    let mut media = InputMediaPhoto::new(InputFile::url(parse_url(&photo.url)?));
    if let Some(caption) = &photo.caption {
        media = media.caption(caption.clone());
    }
    Ok(InputMedia::Photo(media))
}

fn media_groups(photos: &[Photo]) -> Result<Vec<Vec<InputMedia>>> {
    album_chunks(photos.len())
        .into_iter()
        .map(|range| photos[range].iter().map(media_photo).collect())
        .collect()
}

#[async_trait]
impl DeliveryClient for TelegramDelivery {
    async fn start(&self) -> Result<()> {
        let mut slot = self.transport.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let me = self
            .bot
            .get_me()
            .await
            .context("telegram getMe failed; check telegram.bot_token")?;

        let handler = Update::filter_message()
            .filter_command::<Command>()
            .endpoint(answer);
        let mut dispatcher = Dispatcher::builder(self.bot.clone(), handler)
            .default_handler(|_| async {})
            .build();
        let shutdown = dispatcher.shutdown_token();
        let task = tokio::spawn(async move { dispatcher.dispatch().await });

        info!(bot = %me.username(), "telegram transport started");
        *slot = Some(Transport { shutdown, task });
        Ok(())
    }

    async fn stop(&self) {
        let Some(transport) = self.transport.lock().await.take() else {
            return;
        };
        match transport.shutdown.shutdown() {
            Ok(done) => done.await,
            // Dispatcher never became active; nothing to drain.
            Err(_) => transport.task.abort(),
        }
        let _ = transport.task.await;
        info!("telegram transport stopped");
    }

    #[instrument(skip_all, fields(chat_id = chat_id, photos = photos.len()))]
    async fn send_album(&self, chat_id: i64, photos: &[Photo], button: &LinkButton) -> Result<()> {
        let chat = ChatId(chat_id);
        let markup = keyboard(button)?;

        if let [photo] = photos {
            let mut req = self
                .bot
                .send_photo(chat, InputFile::url(parse_url(&photo.url)?))
                .reply_markup(markup);
            if let Some(caption) = &photo.caption {
                req = req.caption(caption.clone());
            }
            req.await.context("sendPhoto failed")?;
            return Ok(());
        }

        if photos.is_empty() {
            return Err(anyhow!("album has no photos"));
        }

        // Build every group first so a bad URL fails before anything is posted.
        let groups = media_groups(photos)?;
        for media in groups {
            self.bot
                .send_media_group(chat, media)
                .await
                .context("sendMediaGroup failed")?;
        }

        // Media groups cannot carry a keyboard, so the link follows on its own.
        let text = button.text.clone();
        if let Err(err) = self.bot.send_message(chat, text).reply_markup(markup).await {
            warn!(?err, url = %button.url, "album sent but link button message failed");
        }
        Ok(())
    }

    #[instrument(skip_all, fields(chat_id = chat_id))]
    async fn send_video(
        &self,
        chat_id: i64,
        url: &str,
        caption: &str,
        button: &LinkButton,
    ) -> Result<()> {
        let markup = keyboard(button)?;
        self.bot
            .send_video(ChatId(chat_id), InputFile::url(parse_url(url)?))
            .caption(caption)
            .reply_markup(markup)
            .await
            .context("sendVideo failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn photos(n: usize) -> Vec<Photo> {
        (0..n)
            .map(|i| Photo {
                url: format!("https://img.example/{i}.jpg"),
                caption: (i == 0).then(|| "@alice: trip".to_string()),
            })
            .collect()
    }

    /// Local Bot API stand-in that answers every call with an empty result
    /// and counts the requests it sees.
    async fn fake_bot_api() -> (Bot, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                seen.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 64 * 1024];
                let _ = socket.read(&mut buf).await;
                let body = r#"{"ok":true,"result":[]}"#;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });
        let api = Url::parse(&format!("http://{addr}/")).unwrap();
        (Bot::new("123:test").set_api_url(api), requests)
    }

    #[test]
    fn chunks_respect_group_limits() {
        assert!(album_chunks(0).is_empty());
        assert_eq!(album_chunks(2), vec![0..2]);
        assert_eq!(album_chunks(10), vec![0..10]);
        assert_eq!(album_chunks(11), vec![0..6, 6..11]);
        assert_eq!(album_chunks(21), vec![0..7, 7..14, 14..21]);

        for len in 2..=120 {
            let chunks = album_chunks(len);
            assert_eq!(chunks.first().map(|r| r.start), Some(0));
            assert_eq!(chunks.last().map(|r| r.end), Some(len));
            assert!(chunks.iter().all(|r| (2..=MEDIA_GROUP_LIMIT).contains(&r.len())));
        }
    }

    #[test]
    fn keyboard_has_single_url_button() {
        let markup = keyboard(&LinkButton {
            text: "Original".into(),
            url: "https://www.tiktok.com/@alice/video/1".into(),
        })
        .unwrap();
        assert_eq!(markup.inline_keyboard.len(), 1);
        assert_eq!(markup.inline_keyboard[0].len(), 1);
        assert_eq!(markup.inline_keyboard[0][0].text, "Original");
    }

    #[test]
    fn invalid_urls_are_errors() {
        let button = LinkButton {
            text: "Original".into(),
            url: "not a url".into(),
        };
        assert!(keyboard(&button).is_err());
        assert!(media_photo(&Photo {
            url: "::".into(),
            caption: None
        })
        .is_err());
    }

    #[test]
    fn captioned_photo_keeps_caption() {
        let media = media_photo(&Photo {
            url: "https://img/1.jpg".into(),
            caption: Some("@alice: hi".into()),
        })
        .unwrap();
        match media {
            InputMedia::Photo(p) => assert_eq!(p.caption.as_deref(), Some("@alice: hi")),
            _ => panic!("expected photo"),
        }
    }

    #[test]
    fn bad_url_in_any_group_fails_whole_album() {
        let mut album = photos(11);
        assert_eq!(media_groups(&album).unwrap().len(), 2);

        album[9].url = "not a url".into();
        assert!(media_groups(&album).is_err());
    }

    #[tokio::test]
    async fn bad_url_in_second_group_sends_nothing() {
        let (bot, requests) = fake_bot_api().await;
        let delivery = TelegramDelivery::new(bot);
        let mut album = photos(11);
        album[9].url = "not a url".into();
        let button = LinkButton {
            text: "Original".into(),
            url: "https://www.tiktok.com/@alice/video/1".into(),
        };

        for _ in 0..3 {
            assert!(delivery.send_album(42, &album, &button).await.is_err());
        }
        assert_eq!(requests.load(Ordering::SeqCst), 0);
    }
}
