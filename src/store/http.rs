//! S3-compatible bucket over plain HTTP (`target = s3`).
//!
//! Reads go to the public bucket URL. Writes are `PUT`s to the upload URL
//! (a pre-authorised endpoint or proxy in front of the bucket) with an
//! optional bearer token. S3 answers 403 instead of 404 for missing keys
//! when the caller may not list the bucket, so both count as not found on
//! reads. On writes 401/403 mean the credentials are wrong.
//!
//! Listing uses the bucket's `ListObjectsV2` XML API and needs a bucket
//! policy that allows public listing. Deletes go to the upload URL like
//! writes.

use super::ObjectStore;
use crate::config::StorageSettings;
use crate::error::{PosterError, SnapshotError};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    read_base: Url,
    write_base: Url,
    token: Option<String>,
}

impl HttpObjectStore {
    pub fn new(settings: &StorageSettings, timeout: Duration) -> Result<Self, SnapshotError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SnapshotError::Internal(format!("HTTP client: {}", e)))?;

        let read_base = directory_url(&settings.bucket_url);
        let write_base = settings
            .upload_url
            .as_ref()
            .map(directory_url)
            .unwrap_or_else(|| read_base.clone());

        Ok(Self {
            client,
            read_base,
            write_base,
            token: settings.upload_token.clone(),
        })
    }

    fn object_url(base: &Url, key: &str) -> Result<Url, PosterError> {
        base.join(key).map_err(|e| PosterError::Storage {
            key: key.to_string(),
            reason: format!("invalid object URL: {}", e),
        })
    }
}

/// `join` drops the last path segment unless the base ends with `/`.
fn directory_url(url: &Url) -> Url {
    let mut url = url.clone();
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// One page of a `ListBucketResult`.
#[derive(Debug, Default)]
struct ListPage {
    keys: Vec<String>,
    truncated: bool,
    next_token: Option<String>,
}

fn parse_list_page(xml: &str) -> Result<ListPage, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut current_tag = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
            }
            Ok(Event::End(_)) => current_tag.clear(),
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|e| format!("invalid listing XML: {}", e))?
                    .into_owned();
                match current_tag.as_str() {
                    "Key" => page.keys.push(text),
                    "IsTruncated" => page.truncated = text == "true",
                    "NextContinuationToken" => page.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("invalid listing XML: {}", e)),
            _ => {}
        }
    }
    Ok(page)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, PosterError> {
        let url = Self::object_url(&self.read_base, key)?;
        let storage = |reason: String| PosterError::Storage {
            key: key.to_string(),
            reason,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| storage(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN => Err(PosterError::NotFound {
                key: key.to_string(),
            }),
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| storage(e.to_string()))?
                .to_vec()),
            status => Err(storage(format!("HTTP {}", status))),
        }
    }

    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PosterError> {
        let url = Self::object_url(&self.write_base, key)?;

        let mut request = self
            .client
            .put(url)
            .header("content-type", content_type)
            .header("x-amz-acl", "public-read")
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PosterError::Storage {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match response.status() {
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Err(PosterError::StorageCredentials {
                    key: key.to_string(),
                    status: status.as_u16(),
                })
            }
            status if status.is_success() => Ok(self.location(key)),
            status => Err(PosterError::Storage {
                key: key.to_string(),
                reason: format!("HTTP {}", status),
            }),
        }
    }

    /// S3 `ListObjectsV2` on the read URL, following continuation tokens.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, PosterError> {
        let storage = |reason: String| PosterError::Storage {
            key: prefix.to_string(),
            reason,
        };

        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut url = self.read_base.clone();
            {
                let mut query = url.query_pairs_mut();
                query.append_pair("list-type", "2").append_pair("prefix", prefix);
                if let Some(t) = &token {
                    query.append_pair("continuation-token", t);
                }
            }

            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| storage(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(storage(format!("listing failed with HTTP {}", status)));
            }
            let body = response.text().await.map_err(|e| storage(e.to_string()))?;

            let page = parse_list_page(&body).map_err(storage)?;
            keys.extend(page.keys);
            match page.next_token {
                Some(next) if page.truncated => token = Some(next),
                _ => break,
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), PosterError> {
        let url = Self::object_url(&self.write_base, key)?;
        let mut request = self.client.delete(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| PosterError::Storage {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        match response.status() {
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                Err(PosterError::StorageCredentials {
                    key: key.to_string(),
                    status: status.as_u16(),
                })
            }
            status if status.is_success() || status == StatusCode::NOT_FOUND => Ok(()),
            status => Err(PosterError::Storage {
                key: key.to_string(),
                reason: format!("HTTP {}", status),
            }),
        }
    }

    fn location(&self, key: &str) -> String {
        Self::object_url(&self.read_base, key)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.read_base, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer, token: Option<&str>) -> HttpObjectStore {
        let settings = StorageSettings {
            bucket_url: Url::parse(&format!("{}/bucket", server.uri())).unwrap(),
            upload_url: None,
            upload_token: token.map(str::to_string),
            snapshot_dir: Default::default(),
        };
        HttpObjectStore::new(&settings, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn get_maps_missing_keys_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/a.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1, 2]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket/b.png"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let s = store(&server, None);
        assert_eq!(s.get("a.png").await.unwrap(), vec![1, 2]);
        assert!(matches!(
            s.get("b.png").await.unwrap_err(),
            PosterError::NotFound { .. }
        ));
        // unmatched requests get 404 from wiremock
        assert!(matches!(
            s.get("c.png").await.unwrap_err(),
            PosterError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn server_errors_are_retryable_storage_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let err = store(&server, None).get("a.png").await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn put_sends_token_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/bucket/temp/b1/report.html"))
            .and(header("authorization", "Bearer t0k"))
            .and(header("content-type", "text/html"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let location = store(&server, Some("t0k"))
            .put("temp/b1/report.html", b"<html/>".to_vec(), "text/html")
            .await
            .unwrap();
        assert!(location.ends_with("/bucket/temp/b1/report.html"));
    }

    #[tokio::test]
    async fn rejected_write_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let err = store(&server, Some("bad"))
            .put("a.png", vec![1], "image/png")
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    const LIST_PAGE_1: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix></Prefix>
  <IsTruncated>true</IsTruncated>
  <Contents><Key>tile-b.png</Key><Size>10</Size></Contents>
  <Contents><Key>temp/1/a&amp;b.png</Key><Size>10</Size></Contents>
  <NextContinuationToken>tok-2</NextContinuationToken>
</ListBucketResult>"#;

    const LIST_PAGE_2: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <IsTruncated>false</IsTruncated>
  <Contents><Key>render-a.png</Key><Size>10</Size></Contents>
</ListBucketResult>"#;

    #[tokio::test]
    async fn list_follows_continuation_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bucket/"))
            .and(query_param("list-type", "2"))
            .and(query_param("continuation-token", "tok-2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE_2))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/bucket/"))
            .and(query_param("list-type", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(LIST_PAGE_1))
            .expect(1)
            .mount(&server)
            .await;

        let keys = store(&server, None).list("").await.unwrap();
        assert_eq!(keys, ["render-a.png", "temp/1/a&b.png", "tile-b.png"]);
    }

    #[tokio::test]
    async fn delete_tolerates_missing_keys() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/bucket/a.png"))
            .and(header("authorization", "Bearer t0k"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/bucket/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let s = store(&server, Some("t0k"));
        s.delete("a.png").await.unwrap();
        s.delete("gone.png").await.unwrap();
    }
}
