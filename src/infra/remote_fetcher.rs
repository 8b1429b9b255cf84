use crate::app::ports::FetcherPort;
use crate::constants::PUBLISHED_FILE_DETAILS_PATH;
use crate::domain::{ExternalFileId, FetchResult, FetchedContent};
use crate::error::{IngestError, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// Downloads workshop files through the platform's web API.
///
/// Looks up the item's details first, then downloads its `file_url`.
pub struct RemoteFetcher {
    client: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    response: DetailsResponse,
}

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    publishedfiledetails: Vec<PublishedFileDetails>,
}

#[derive(Debug, Deserialize)]
struct PublishedFileDetails {
    result: i32,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

impl PublishedFileDetails {
    fn display_name(&self, id: &ExternalFileId) -> String {
        let from_filename = self
            .filename
            .as_deref()
            .and_then(|f| f.rsplit(['/', '\\']).next())
            .filter(|f| !f.is_empty());
        let from_title = self.title.as_deref().filter(|t| !t.trim().is_empty());
        from_filename
            .or(from_title)
            .map(str::to_string)
            .unwrap_or_else(|| id.to_string())
    }
}

impl RemoteFetcher {
    pub fn new(api_base: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn details_url(&self) -> String {
        format!("{}/{}", self.api_base, PUBLISHED_FILE_DETAILS_PATH)
    }

    async fn lookup(&self, id: &ExternalFileId) -> Result<Option<PublishedFileDetails>> {
        let mut form = vec![
            ("itemcount", "1".to_string()),
            ("publishedfileids[0]", id.to_string()),
        ];
        if let Some(key) = &self.api_key {
            form.push(("key", key.clone()));
        }
        let resp = self
            .client
            .post(self.details_url())
            .form(&form)
            .send()
            .await
            .map_err(|e| IngestError::transient(id.as_str(), e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(IngestError::transient(id.as_str(), format!("details lookup returned {}", status)));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| IngestError::transient(id.as_str(), e.to_string()))?;
        let envelope = parse_details(&body).map_err(|e| IngestError::transient(id.as_str(), e.to_string()))?;
        Ok(envelope.response.publishedfiledetails.into_iter().next())
    }
}

fn parse_details(body: &[u8]) -> serde_json::Result<DetailsEnvelope> {
    serde_json::from_slice(body)
}

/// The download URL of a live item, or `None` when the details say it is gone.
///
/// Any `result` other than 1 (OK) means the item was removed or hidden.
fn download_url(details: Option<&PublishedFileDetails>) -> Option<&str> {
    let details = details?;
    if details.result != 1 {
        return None;
    }
    details.file_url.as_deref().filter(|u| !u.is_empty())
}

#[derive(Debug, PartialEq, Eq)]
enum DownloadStatus {
    Ok,
    Gone,
    Failed,
}

fn classify_download(status: StatusCode) -> DownloadStatus {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => DownloadStatus::Gone,
        s if s.is_success() => DownloadStatus::Ok,
        _ => DownloadStatus::Failed,
    }
}

#[async_trait]
impl FetcherPort for RemoteFetcher {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn fetch(&self, id: &ExternalFileId) -> Result<FetchResult> {
        let details = self.lookup(id).await?;
        let Some(file_url) = download_url(details.as_ref()).map(str::to_string) else {
            debug!(external_file_id = %id, "details lookup reports no downloadable item");
            return Ok(FetchResult::NotFound);
        };

        let resp = self
            .client
            .get(&file_url)
            .send()
            .await
            .map_err(|e| IngestError::transient(id.as_str(), e.to_string()))?;
        match classify_download(resp.status()) {
            DownloadStatus::Gone => return Ok(FetchResult::NotFound),
            DownloadStatus::Failed => {
                return Err(IngestError::transient(id.as_str(), format!("download returned {}", resp.status())));
            }
            DownloadStatus::Ok => {}
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| IngestError::transient(id.as_str(), e.to_string()))?
            .to_vec();

        let display_name = details.as_ref().map_or_else(|| id.to_string(), |d| d.display_name(id));
        Ok(FetchResult::Found(FetchedContent { bytes, display_name }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_published_file_details() {
        let body = br#"{"response":{"result":1,"resultcount":1,"publishedfiledetails":[
            {"publishedfileid":"42","result":1,"file_url":"https://cdn/x","filename":"mods/skin.zip","title":"Skin"}]}}"#;
        let env = parse_details(body).unwrap();
        let details = &env.response.publishedfiledetails[0];
        assert_eq!(details.result, 1);
        assert_eq!(details.display_name(&ExternalFileId::from(42)), "skin.zip");
    }

    #[test]
    fn display_name_falls_back_to_title_then_id() {
        let id = ExternalFileId::from(42);
        let titled = PublishedFileDetails { result: 1, file_url: None, filename: Some("".into()), title: Some("Skin".into()) };
        assert_eq!(titled.display_name(&id), "Skin");
        let bare = PublishedFileDetails { result: 1, file_url: None, filename: None, title: None };
        assert_eq!(bare.display_name(&id), "42");
    }

    #[test]
    fn missing_items_parse_without_file_fields() {
        let body = br#"{"response":{"publishedfiledetails":[{"publishedfileid":"1","result":9}]}}"#;
        let env = parse_details(body).unwrap();
        assert_eq!(env.response.publishedfiledetails[0].result, 9);
        assert!(env.response.publishedfiledetails[0].file_url.is_none());
    }

    #[test]
    fn details_url_joins_base() {
        let f = RemoteFetcher::new("https://api.example.com/", None);
        assert_eq!(
            f.details_url(),
            "https://api.example.com/ISteamRemoteStorage/GetPublishedFileDetails/v1/"
        );
    }

    fn details(result: i32, file_url: Option<&str>) -> PublishedFileDetails {
        PublishedFileDetails { result, file_url: file_url.map(str::to_string), filename: None, title: None }
    }

    #[test]
    fn only_live_items_with_a_url_are_downloadable() {
        assert_eq!(download_url(None), None);
        assert_eq!(download_url(Some(&details(9, Some("https://cdn/x")))), None);
        assert_eq!(download_url(Some(&details(1, Some("")))), None);
        assert_eq!(download_url(Some(&details(1, None))), None);
        assert_eq!(download_url(Some(&details(1, Some("https://cdn/x")))), Some("https://cdn/x"));
    }

    #[test]
    fn download_status_classification() {
        assert_eq!(classify_download(StatusCode::OK), DownloadStatus::Ok);
        assert_eq!(classify_download(StatusCode::NOT_FOUND), DownloadStatus::Gone);
        assert_eq!(classify_download(StatusCode::GONE), DownloadStatus::Gone);
        assert_eq!(classify_download(StatusCode::SERVICE_UNAVAILABLE), DownloadStatus::Failed);
        assert_eq!(classify_download(StatusCode::INTERNAL_SERVER_ERROR), DownloadStatus::Failed);
        assert_eq!(classify_download(StatusCode::FORBIDDEN), DownloadStatus::Failed);
    }

    mod http {
        use super::super::*;
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::{TcpListener, TcpStream};

        const DETAILS: &str = "/ISteamRemoteStorage/GetPublishedFileDetails/v1/";
        const FILE: &str = "/file/42.zip";

        /// Answers each request with the canned `(status, body)` for its path.
        /// `{base}` in a body is replaced by the server's own URL.
        async fn serve(routes: Vec<(&'static str, u16, &'static str)>) -> String {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            let routes: Vec<(&'static str, u16, String)> =
                routes.into_iter().map(|(p, s, b)| (p, s, b.replace("{base}", &base))).collect();
            tokio::spawn(async move {
                while let Ok((socket, _)) = listener.accept().await {
                    let routes = routes.clone();
                    tokio::spawn(respond(socket, routes));
                }
            });
            base
        }

        async fn respond(mut socket: TcpStream, routes: Vec<(&'static str, u16, String)>) {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                    let body_len = head
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + body_len {
                        break;
                    }
                }
            }
            let request = String::from_utf8_lossy(&buf).to_string();
            let path = request.split_whitespace().nth(1).unwrap_or("/");
            let (status, body) = routes
                .iter()
                .find(|(p, _, _)| *p == path)
                .map(|(_, s, b)| (*s, b.as_str()))
                .unwrap_or((404, ""));
            let reply = format!(
                "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = socket.write_all(reply.as_bytes()).await;
            let _ = socket.shutdown().await;
        }

        const LIVE: &str = r#"{"response":{"result":1,"resultcount":1,"publishedfiledetails":[
            {"publishedfileid":"42","result":1,"file_url":"{base}/file/42.zip","filename":"mods/skin.zip"}]}}"#;

        async fn fetch_with(routes: Vec<(&'static str, u16, &'static str)>) -> Result<FetchResult> {
            let base = serve(routes).await;
            RemoteFetcher::new(&base, Some("secret".into())).fetch(&ExternalFileId::from(42)).await
        }

        #[tokio::test]
        async fn live_item_is_downloaded() {
            let result = fetch_with(vec![(DETAILS, 200, LIVE), (FILE, 200, "PK")]).await.unwrap();
            assert_eq!(
                result,
                FetchResult::Found(FetchedContent { bytes: b"PK".to_vec(), display_name: "skin.zip".into() })
            );
        }

        #[tokio::test]
        async fn removed_item_is_not_found() {
            let removed = r#"{"response":{"publishedfiledetails":[{"publishedfileid":"42","result":9}]}}"#;
            let result = fetch_with(vec![(DETAILS, 200, removed)]).await.unwrap();
            assert_eq!(result, FetchResult::NotFound);
        }

        #[tokio::test]
        async fn item_without_file_url_is_not_found() {
            let no_url = r#"{"response":{"publishedfiledetails":[{"publishedfileid":"42","result":1,"file_url":""}]}}"#;
            let result = fetch_with(vec![(DETAILS, 200, no_url)]).await.unwrap();
            assert_eq!(result, FetchResult::NotFound);
        }

        #[tokio::test]
        async fn empty_details_list_is_not_found() {
            let empty = r#"{"response":{"publishedfiledetails":[]}}"#;
            let result = fetch_with(vec![(DETAILS, 200, empty)]).await.unwrap();
            assert_eq!(result, FetchResult::NotFound);
        }

        #[tokio::test]
        async fn download_404_and_410_are_not_found() {
            for status in [404, 410] {
                let result = fetch_with(vec![(DETAILS, 200, LIVE), (FILE, status, "")]).await.unwrap();
                assert_eq!(result, FetchResult::NotFound, "status {}", status);
            }
        }

        #[tokio::test]
        async fn download_503_is_transient() {
            let err = fetch_with(vec![(DETAILS, 200, LIVE), (FILE, 503, "")]).await.unwrap_err();
            assert!(matches!(err, IngestError::TransientFetch { .. }), "{:?}", err);
            assert!(err.to_string().contains("503"));
        }

        #[tokio::test]
        async fn details_500_is_transient() {
            let err = fetch_with(vec![(DETAILS, 500, "")]).await.unwrap_err();
            assert!(matches!(err, IngestError::TransientFetch { .. }), "{:?}", err);
        }

        #[tokio::test]
        async fn unparseable_details_are_transient() {
            let err = fetch_with(vec![(DETAILS, 200, "<html>maintenance</html>")]).await.unwrap_err();
            assert!(matches!(err, IngestError::TransientFetch { .. }), "{:?}", err);
        }

        #[tokio::test]
        async fn unreachable_api_is_transient() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let base = format!("http://{}", listener.local_addr().unwrap());
            drop(listener);

            let err = RemoteFetcher::new(&base, None).fetch(&ExternalFileId::from(42)).await.unwrap_err();
            assert!(matches!(err, IngestError::TransientFetch { .. }), "{:?}", err);
        }
    }
}
