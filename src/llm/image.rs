//! 影像引用解析：把 ImageRef 转为推理模型可接受的 URL
//!
//! - `data:` URL 原样使用
//! - `http(s)://` 默认原样传递；开启 inline_remote 时下载并内联为 data URL
//! - 其余按本地路径读取，base64 编码为 data URL（MIME 由扩展名推断，未知时按 image/jpeg）

use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

#[derive(Debug, Clone)]
pub struct ImageResolver {
    http: reqwest::Client,
    inline_remote: bool,
}

impl Default for ImageResolver {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ImageResolver {
    pub fn new(inline_remote: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            inline_remote,
        }
    }

    pub async fn resolve(&self, image_ref: &str) -> Result<String, String> {
        if image_ref.starts_with("data:") {
            return Ok(image_ref.to_string());
        }
        if image_ref.starts_with("http://") || image_ref.starts_with("https://") {
            if !self.inline_remote {
                return Ok(image_ref.to_string());
            }
            return self.fetch_remote(image_ref).await;
        }

        let path = Path::new(image_ref);
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("cannot read image {}: {}", image_ref, e))?;
        Ok(data_url(mime_for(path), &bytes))
    }

    async fn fetch_remote(&self, url: &str) -> Result<String, String> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| format!("cannot fetch image {}: {}", url, e))?;
        if !resp.status().is_success() {
            return Err(format!("cannot fetch image {}: HTTP {}", url, resp.status()));
        }
        let mime = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .filter(|v| v.starts_with("image/"))
            .map(|v| v.to_string())
            .unwrap_or_else(|| mime_for(Path::new(url)).to_string());
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| format!("cannot fetch image {}: {}", url, e))?;
        Ok(data_url(&mime, &bytes))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}
