//! Channel posts and the publish sink port.

use async_trait::async_trait;

use crate::{
    formatting::{escape_html, truncate_to_fit, utf16_len},
    Result,
};

pub const SOURCE_LABEL: &str = "🔗 Source";

/// A post ready to be sent to the destination channel.
///
/// Length is measured the way Telegram counts text after HTML parsing: UTF-16
/// code units of the visible text. Markup and escapes do not count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Post {
    pub title: String,
    pub body: String,
    pub link: String,
    pub image_url: Option<String>,
}

impl Post {
    /// Build a post whose visible length does not exceed `max_len`.
    ///
    /// Over-long posts lose the tail of the body (then the title, if the frame
    /// alone is too long) and end with `...`, landing on `max_len` unless that
    /// would split a surrogate pair.
    pub fn new(
        title: &str,
        body: &str,
        link: &str,
        image_url: Option<String>,
        max_len: usize,
    ) -> Self {
        let mut post = Self {
            title: title.to_string(),
            body: body.to_string(),
            link: link.to_string(),
            image_url,
        };
        post.fit(max_len);
        post
    }

    /// Visible characters outside title and body.
    fn frame_len() -> usize {
        // "\n\n" after the title, "\n\n" before the link label.
        4 + utf16_len(SOURCE_LABEL)
    }

    pub fn visible_len(&self) -> usize {
        utf16_len(&self.title) + utf16_len(&self.body) + Self::frame_len()
    }

    fn fit(&mut self, max_len: usize) {
        if self.visible_len() <= max_len {
            return;
        }
        let fixed = utf16_len(&self.title) + Self::frame_len();
        if fixed < max_len {
            self.body = truncate_to_fit(&self.body, max_len - fixed);
            return;
        }
        // Frame alone overflows: drop the body and shorten the title.
        self.body.clear();
        let budget = max_len.saturating_sub(Self::frame_len());
        self.title = truncate_to_fit(&self.title, budget);
    }

    /// Telegram HTML rendering.
    pub fn html(&self) -> String {
        format!(
            "<b>{}</b>\n\n{}\n\n<a href=\"{}\">{}</a>",
            escape_html(&self.title),
            escape_html(&self.body),
            escape_html(&self.link),
            SOURCE_LABEL
        )
    }
}

/// Port for the destination channel.
///
/// Sends the post as a photo with caption when it carries an image URL,
/// otherwise as a text message.
#[async_trait]
pub trait PublishSink: Send + Sync {
    async fn publish(&self, post: &Post) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_post_is_untouched() {
        let p = Post::new("Title", "Body", "https://x/a", None, 2000);
        assert_eq!(p.body, "Body");
        assert_eq!(
            p.html(),
            "<b>Title</b>\n\nBody\n\n<a href=\"https://x/a\">🔗 Source</a>"
        );
    }

    #[test]
    fn long_post_is_truncated_to_exact_ceiling() {
        let body = "word ".repeat(1000);
        let p = Post::new("Breaking", &body, "https://x/a", None, 300);
        assert_eq!(p.visible_len(), 300);
        assert!(p.body.ends_with("..."));
        assert_eq!(p.title, "Breaking");
    }

    #[test]
    fn post_at_ceiling_is_not_truncated() {
        let frame = 1 + 4 + utf16_len(SOURCE_LABEL);
        let body = "b".repeat(100 - frame);
        let p = Post::new("T", &body, "https://x", None, 100);
        assert_eq!(p.visible_len(), 100);
        assert!(!p.body.ends_with("..."));
    }

    #[test]
    fn huge_title_is_truncated_when_frame_overflows() {
        let title = "t".repeat(500);
        let p = Post::new(&title, "body", "https://x", None, 50);
        assert!(p.body.is_empty());
        assert!(p.title.ends_with("..."));
        assert_eq!(p.visible_len(), 50);
    }

    #[test]
    fn html_escapes_text_but_counts_raw_characters() {
        let p = Post::new("A & B", "<script>", "https://x/?a=1&b=2", None, 2000);
        let html = p.html();
        assert!(html.contains("<b>A &amp; B</b>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains("href=\"https://x/?a=1&amp;b=2\""));
        assert_eq!(p.visible_len(), 5 + 8 + 4 + utf16_len(SOURCE_LABEL));
    }

    #[test]
    fn emoji_caption_fits_telegram_ceiling() {
        let body = "x".repeat(2000);
        let p = Post::new(
            "Title 🚀",
            &body,
            "https://x/a",
            Some("https://img.example/a.jpg".to_string()),
            1024,
        );
        let visible = format!("{}\n\n{}\n\n{}", p.title, p.body, SOURCE_LABEL);
        assert_eq!(visible.encode_utf16().count(), 1024);
        assert_eq!(p.visible_len(), 1024);
        assert!(p.body.ends_with("..."));
    }
}
