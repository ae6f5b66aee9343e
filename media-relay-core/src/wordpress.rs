#![doc = "WordPress REST API client: uploads staged files to the media library and creates posts from them."]
//! # Publisher (WordPress)
//!
//! [`WordpressClient`] implements [`Publisher`] against `/wp-json/wp/v2`,
//! authenticating with an application password over basic auth.
//!
//! - `upload_files` posts each staged file to `/media`, in order, and returns
//!   one handle per file or the first error.
//! - `create_post` composes the post body from the source item (see
//!   [`compose_post`]) and posts it to `/posts`.
//!
//! ## Deduplication
//! Every post gets a slug derived from the source media id
//! ([`dedup_slug`]). Before creating, the client looks the slug up and, when
//! a post already carries it, returns that post instead. A crash between
//! publishing and recording the publish therefore does not create a second
//! post on the next run.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;

use crate::config::{PostStatus, WordpressConfig};
use crate::contract::{PublishedPost, Publisher, RemoteMediaItem, RemoteUploadHandle, StagedFile};
use crate::error::ClientError;
use crate::retry::{self, RetryConfig};

const TITLE_MAX_CHARS: usize = 60;

pub struct WordpressClient {
    http: reqwest::Client,
    api_base: String,
    username: String,
    app_password: String,
    status: PostStatus,
    category_ids: Vec<u64>,
    retry: RetryConfig,
}

impl std::fmt::Debug for WordpressClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WordpressClient")
            .field("api_base", &self.api_base)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct WpMedia {
    id: u64,
    source_url: String,
    mime_type: String,
}

#[derive(Debug, Deserialize)]
struct WpPost {
    id: u64,
    link: String,
}

/// JSON body sent to `POST /wp/v2/posts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostBody {
    pub title: String,
    pub content: String,
    pub status: String,
    pub slug: String,
    pub date_gmt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured_media: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<u64>,
}

impl WordpressClient {
    pub fn new(config: &WordpressConfig, retry: RetryConfig) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClientError::from_transport("wordpress", e))?;
        tracing::info!(
            base_url = %config.base_url,
            username = %config.username,
            app_password_set = !config.app_password.is_empty(),
            "Initialized WordpressClient"
        );
        Ok(Self {
            http,
            api_base: format!("{}/wp-json/wp/v2", config.base_url.trim_end_matches('/')),
            username: config.username.clone(),
            app_password: config.app_password.clone(),
            status: config.default_status,
            category_ids: config.category_ids.clone(),
            retry,
        })
    }

    /// Send the request `build` produces, retrying transient failures.
    /// `build` runs once per attempt so streamed bodies start from the top.
    async fn send<T, B, Fut>(&self, endpoint: &str, build: B) -> Result<T, ClientError>
    where
        T: serde::de::DeserializeOwned,
        B: Fn() -> Fut,
        Fut: Future<Output = Result<reqwest::RequestBuilder, ClientError>>,
    {
        retry::retry_with_backoff(&self.retry, retry::classify_client_error, || async {
            let response = build()
                .await?
                .basic_auth(&self.username, Some(&self.app_password))
                .send()
                .await
                .map_err(|e| ClientError::from_transport(endpoint, e))?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::from_status(endpoint, status.as_u16(), body));
            }
            response
                .json::<T>()
                .await
                .map_err(|e| ClientError::from_transport(endpoint, e))
        })
        .await
    }

    async fn upload_one(&self, file: &StagedFile) -> Result<RemoteUploadHandle, ClientError> {
        let endpoint = format!("{}/media", self.api_base);
        let len = tokio::fs::metadata(&file.path).await?.len();
        let mime = mime_guess::from_path(&file.path)
            .first_or_octet_stream()
            .to_string();
        let disposition = format!("attachment; filename=\"{}\"", file.file_name);

        let media: WpMedia = self
            .send(&endpoint, || async {
                let source = tokio::fs::File::open(&file.path).await?;
                Ok::<_, ClientError>(
                    self.http
                        .post(&endpoint)
                        .header(CONTENT_TYPE, mime.as_str())
                        .header(CONTENT_DISPOSITION, disposition.as_str())
                        .header(CONTENT_LENGTH, len)
                        .body(reqwest::Body::wrap_stream(ReaderStream::new(source))),
                )
            })
            .await?;

        tracing::info!(
            media_id = media.id,
            file = %file.file_name,
            bytes = len,
            mime = %media.mime_type,
            "[WORDPRESS] Uploaded media"
        );
        Ok(RemoteUploadHandle {
            id: media.id,
            source_url: media.source_url,
            mime_type: media.mime_type,
        })
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<PublishedPost>, ClientError> {
        let endpoint = format!("{}/posts", self.api_base);
        let posts: Vec<WpPost> = self
            .send(&endpoint, || async {
                Ok::<_, ClientError>(self.http.get(&endpoint).query(&[
                    ("slug", slug),
                    ("status", "publish,future,draft,pending,private"),
                    ("context", "edit"),
                ]))
            })
            .await?;
        Ok(posts.into_iter().next().map(|p| PublishedPost {
            id: p.id,
            link: p.link,
        }))
    }
}

#[async_trait]
impl Publisher for WordpressClient {
    async fn upload_files(
        &self,
        files: &[StagedFile],
    ) -> Result<Vec<RemoteUploadHandle>, ClientError> {
        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            handles.push(self.upload_one(file).await?);
        }
        Ok(handles)
    }

    async fn create_post(
        &self,
        item: &RemoteMediaItem,
        handles: &[RemoteUploadHandle],
    ) -> Result<PublishedPost, ClientError> {
        let body = compose_post(item, handles, self.status, &self.category_ids);

        if let Some(existing) = self.find_by_slug(&body.slug).await? {
            tracing::warn!(
                source_media_id = %item.id,
                post_id = existing.id,
                "[WORDPRESS] Post for this media already exists, reusing it"
            );
            return Ok(existing);
        }

        let endpoint = format!("{}/posts", self.api_base);
        let post: WpPost = self
            .send(&endpoint, || async {
                Ok::<_, ClientError>(self.http.post(&endpoint).json(&body))
            })
            .await?;
        tracing::info!(source_media_id = %item.id, post_id = post.id, link = %post.link, "[WORDPRESS] Created post");
        Ok(PublishedPost {
            id: post.id,
            link: post.link,
        })
    }
}

/// Slug identifying the post created for a source media id.
pub fn dedup_slug(media_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"instagram:");
    hasher.update(media_id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("ig-{}", &digest[..16])
}

/// Post title: first non-empty caption line, truncated on a char boundary.
pub fn post_title(item: &RemoteMediaItem) -> String {
    let line = item
        .caption
        .as_deref()
        .and_then(|c| c.lines().map(str::trim).find(|l| !l.is_empty()));
    match line {
        Some(line) if line.chars().count() > TITLE_MAX_CHARS => {
            let cut: String = line.chars().take(TITLE_MAX_CHARS).collect();
            format!("{}...", cut.trim_end())
        }
        Some(line) => line.to_string(),
        None => format!("Instagram post {}", item.id),
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Build the WordPress post body for a source item and its uploaded files.
pub fn compose_post(
    item: &RemoteMediaItem,
    handles: &[RemoteUploadHandle],
    status: PostStatus,
    category_ids: &[u64],
) -> PostBody {
    let mut blocks: Vec<String> = Vec::new();

    for handle in handles {
        let src = escape_html(&handle.source_url);
        if handle.mime_type.starts_with("video/") {
            blocks.push(format!("<figure class=\"wp-block-video\"><video controls src=\"{src}\"></video></figure>"));
        } else {
            blocks.push(format!("<figure class=\"wp-block-image\"><img src=\"{src}\" alt=\"\"/></figure>"));
        }
    }

    if let Some(caption) = item.caption.as_deref() {
        for paragraph in caption.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            blocks.push(format!("<p>{}</p>", escape_html(paragraph).replace('\n', "<br/>")));
        }
    }

    if let Some(permalink) = item.permalink.as_deref() {
        let href = escape_html(permalink);
        blocks.push(format!("<p><a href=\"{href}\">View on Instagram</a></p>"));
    }

    let featured_media = handles
        .iter()
        .find(|h| h.mime_type.starts_with("image/"))
        .map(|h| h.id);

    PostBody {
        title: post_title(item),
        content: blocks.join("\n"),
        status: status.as_str().to_string(),
        slug: dedup_slug(&item.id),
        date_gmt: item.timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        featured_media,
        categories: category_ids.to_vec(),
    }
}
