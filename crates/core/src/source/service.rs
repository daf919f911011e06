use super::{Page, PageRequest, RecordSource};
use crate::{Error, RawRecord, Result};
use reqwest::{
    Client, RequestBuilder, Response, StatusCode,
    header::{ACCEPT, RANGE},
};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use std::{future::Future, time::Duration};
use url::Url;

/// The default iSamples export service.
pub const DEFAULT_URL: &str = "https://central.isample.xyz/isamples_central/export/";

/// Default wait between job status checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// The format requested from the export service.
pub const EXPORT_FORMAT: &str = "jsonl";

const ACCEPT_TYPES: &str = "application/json, application/x-ndjson";
const STATUS_PREFIX: &str = "status:";
const DOWNLOAD_PREFIX: &str = "download:";

/// A record source backed by the iSamples export service.
///
/// The service runs exports as jobs. The first page request creates a job,
/// later requests poll its status until it completes, and the rest read the
/// job's JSON lines result a page at a time with byte ranges. Every request
/// carries the bearer token, if there is one.
#[derive(Clone, Debug)]
pub struct ExportServiceSource {
    client: Client,
    url: Url,
    jwt: Option<String>,
    poll_interval: Duration,
}

/// The state of an export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The job has been accepted.
    Created,

    /// The job is running.
    Started,

    /// The result is ready to download.
    Completed,

    /// The job failed.
    Error,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    uuid: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: JobStatus,

    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

#[derive(Debug, PartialEq, Eq)]
enum Token<'a> {
    Create,
    Status(&'a str),
    Download(&'a str, u64),
}

impl ExportServiceSource {
    /// Creates a new source for an export service url.
    ///
    /// # Examples
    ///
    /// ```
    /// use isamples_export::source::ExportServiceSource;
    ///
    /// let source = ExportServiceSource::new("https://central.isample.xyz/isamples_central/export").unwrap();
    /// assert_eq!(
    ///     source.url().as_str(),
    ///     "https://central.isample.xyz/isamples_central/export/"
    /// );
    /// ```
    pub fn new(url: &str) -> Result<ExportServiceSource> {
        let client = Client::builder()
            .user_agent(crate::user_agent())
            .build()?;
        ExportServiceSource::with_client(client, url)
    }

    /// Creates a new source with the given client.
    pub fn with_client(client: Client, url: &str) -> Result<ExportServiceSource> {
        let url = if url.ends_with('/') {
            Url::parse(url)?
        } else {
            Url::parse(&format!("{url}/"))?
        };
        Ok(ExportServiceSource {
            client,
            url,
            jwt: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Sets the bearer token sent with every request.
    pub fn with_jwt(mut self, jwt: impl Into<Option<String>>) -> ExportServiceSource {
        self.jwt = jwt.into();
        self
    }

    /// Sets the wait between job status checks.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> ExportServiceSource {
        self.poll_interval = poll_interval;
        self
    }

    /// The service's base url.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Creates an export job, returning its id.
    pub async fn create(&self, query: &str) -> Result<String> {
        let url = self.url.join("create")?;
        tracing::debug!("GET {url} q={query}");
        let request = self
            .client
            .get(url)
            .query(&[("q", query), ("export_format", EXPORT_FORMAT)]);
        let response = check(self.send(request).await?)?;
        let create: CreateResponse = read_json(response).await?;
        tracing::info!("created export job {}", create.uuid);
        Ok(create.uuid)
    }

    /// Checks an export job's status.
    ///
    /// A job that failed is returned as [Error::ExportJob].
    pub async fn status(&self, uuid: &str) -> Result<JobStatus> {
        let url = self.url.join("status")?;
        let request = self.client.get(url).query(&[("uuid", uuid)]);
        let response = check(self.send(request).await?)?;
        let status: StatusResponse = read_json(response).await?;
        tracing::debug!("export job {uuid} is {:?}", status.status);
        if status.status == JobStatus::Error {
            Err(Error::ExportJob {
                uuid: uuid.to_string(),
                message: Value::Object(status.rest).to_string(),
            })
        } else {
            Ok(status.status)
        }
    }

    /// Reads up to `page_size` records of a completed job, starting `offset`
    /// bytes into the result.
    pub async fn download(&self, uuid: &str, offset: u64, page_size: usize) -> Result<Page> {
        let url = self.url.join("download")?;
        tracing::debug!("GET {url} uuid={uuid} offset={offset}");
        let mut request = self.client.get(url).query(&[("uuid", uuid)]);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let mut response = self.send(request).await?;
        let mut skip = match response.status() {
            StatusCode::PARTIAL_CONTENT => 0,
            StatusCode::RANGE_NOT_SATISFIABLE => return Ok(Page::default()),
            _ => {
                response = check(response)?;
                offset
            }
        };
        let mut buffer: Vec<u8> = Vec::new();
        let mut start = 0;
        let mut records = Vec::new();
        let mut exhausted = false;
        loop {
            while records.len() < page_size {
                let Some(end) = buffer[start..].iter().position(|byte| *byte == b'\n') else {
                    break;
                };
                push_record(&buffer[start..start + end], &mut records)?;
                start += end + 1;
            }
            if records.len() >= page_size {
                break;
            }
            match response.chunk().await? {
                Some(chunk) => {
                    let skipped = usize::try_from(skip).unwrap_or(usize::MAX).min(chunk.len());
                    skip -= skipped as u64;
                    buffer.extend_from_slice(&chunk[skipped..]);
                }
                None => {
                    push_record(&buffer[start..], &mut records)?;
                    start = buffer.len();
                    exhausted = true;
                    break;
                }
            }
        }
        let next = offset + start as u64;
        Ok(Page {
            records,
            next_page_token: (!exhausted).then(|| download_token(uuid, next)),
            num_found: None,
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let mut request = request.header(ACCEPT, ACCEPT_TYPES);
        if let Some(jwt) = &self.jwt {
            request = request.bearer_auth(jwt);
        }
        request.send().await.map_err(Error::from)
    }

    async fn page(&self, request: &PageRequest) -> Result<Page> {
        match parse_token(request.token.as_deref())? {
            Token::Create => {
                let uuid = self.create(&request.query).await?;
                Ok(Page {
                    next_page_token: Some(format!("{STATUS_PREFIX}{uuid}")),
                    ..Default::default()
                })
            }
            Token::Status(uuid) => match self.status(uuid).await? {
                JobStatus::Completed => {
                    tracing::info!("export job {uuid} completed, downloading");
                    self.download(uuid, 0, request.page_size).await
                }
                status => {
                    tracing::info!(
                        "export job {uuid} is {status:?}, checking again in {:?}",
                        self.poll_interval
                    );
                    tokio::time::sleep(self.poll_interval).await;
                    Ok(Page {
                        next_page_token: request.token.clone(),
                        ..Default::default()
                    })
                }
            },
            Token::Download(uuid, offset) => self.download(uuid, offset, request.page_size).await,
        }
    }
}

impl RecordSource for ExportServiceSource {
    fn fetch_page(&self, request: &PageRequest) -> impl Future<Output = Result<Page>> + Send {
        self.page(request)
    }
}

fn parse_token(token: Option<&str>) -> Result<Token<'_>> {
    let Some(token) = token else {
        return Ok(Token::Create);
    };
    if let Some(uuid) = token.strip_prefix(STATUS_PREFIX) {
        return Ok(Token::Status(uuid));
    }
    token
        .strip_prefix(DOWNLOAD_PREFIX)
        .and_then(|rest| rest.rsplit_once(':'))
        .and_then(|(uuid, offset)| offset.parse().ok().map(|offset| Token::Download(uuid, offset)))
        .ok_or_else(|| Error::MalformedPage(format!("unknown page token: {token}")))
}

fn download_token(uuid: &str, offset: u64) -> String {
    format!("{DOWNLOAD_PREFIX}{uuid}:{offset}")
}

fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(Error::Backend {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|err| Error::MalformedPage(err.to_string()))
}

fn push_record(line: &[u8], records: &mut Vec<RawRecord>) -> Result<()> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return Ok(());
    }
    match serde_json::from_slice(line) {
        Ok(Value::Object(record)) => {
            records.push(record);
            Ok(())
        }
        Ok(value) => Err(Error::MalformedPage(format!(
            "expected a JSON object, got {value}"
        ))),
        Err(err) => Err(Error::MalformedPage(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::{ExportServiceSource, JobStatus, Token};
    use crate::{
        Error,
        source::{PageRequest, RecordSource},
    };
    use mockito::{Matcher, Server};
    use serde_json::json;
    use std::time::Duration;

    fn jsonl(n: usize) -> String {
        (0..n)
            .map(|i| json!({"sample_identifier": format!("IGSN:{i}")}).to_string() + "\n")
            .collect()
    }

    fn source(server: &Server) -> ExportServiceSource {
        ExportServiceSource::new(&server.url())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn tokens() {
        assert_eq!(super::parse_token(None).unwrap(), Token::Create);
        assert_eq!(
            super::parse_token(Some("status:abc")).unwrap(),
            Token::Status("abc")
        );
        assert_eq!(
            super::parse_token(Some(&super::download_token("abc", 42))).unwrap(),
            Token::Download("abc", 42)
        );
        assert!(super::parse_token(Some("download:abc")).is_err());
        assert!(super::parse_token(Some("cursor")).is_err());
    }

    #[tokio::test]
    async fn create() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/create")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "source:SESAR".into()),
                Matcher::UrlEncoded("export_format".into(), "jsonl".into()),
            ]))
            .match_header("authorization", "Bearer a-token")
            .with_body(json!({"uuid": "1f1b9c3e"}).to_string())
            .create_async()
            .await;
        let page = source(&server)
            .with_jwt("a-token".to_string())
            .fetch_page(&PageRequest::new("source:SESAR", 10))
            .await
            .unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_page_token.as_deref(), Some("status:1f1b9c3e"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn running_job_is_polled() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .match_query(Matcher::UrlEncoded("uuid".into(), "1f1b9c3e".into()))
            .with_body(json!({"status": "started", "query": "{\"q\": \"source:SESAR\"}"}).to_string())
            .create_async()
            .await;
        let request = PageRequest::new("source:SESAR", 10).next("status:1f1b9c3e".to_string());
        let page = source(&server).fetch_page(&request).await.unwrap();
        assert!(page.records.is_empty());
        assert_eq!(page.next_page_token.as_deref(), Some("status:1f1b9c3e"));
    }

    #[tokio::test]
    async fn failed_job() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .match_query(Matcher::Any)
            .with_body(json!({"status": "error", "query": "{\"q\": \"source:(\"}"}).to_string())
            .create_async()
            .await;
        let error = source(&server).status("1f1b9c3e").await.unwrap_err();
        let Error::ExportJob { uuid, message } = error else {
            panic!("unexpected error: {error}");
        };
        assert_eq!(uuid, "1f1b9c3e");
        assert!(message.contains("source:("));
    }

    #[tokio::test]
    async fn unknown_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/status")
            .match_query(Matcher::Any)
            .with_body(json!({"status": "paused"}).to_string())
            .create_async()
            .await;
        let error = source(&server).status("1f1b9c3e").await.unwrap_err();
        assert!(matches!(error, Error::MalformedPage(_)));
    }

    #[tokio::test]
    async fn download_pages() {
        let mut server = Server::new_async().await;
        let body = jsonl(3);
        let first_line = body.find('\n').unwrap() + 1;
        let two_lines = first_line + body[first_line..].find('\n').unwrap() + 1;
        let _first = server
            .mock("GET", "/download")
            .match_query(Matcher::UrlEncoded("uuid".into(), "1f1b9c3e".into()))
            .match_header("range", Matcher::Missing)
            .with_body(&body)
            .create_async()
            .await;
        let _rest = server
            .mock("GET", "/download")
            .match_query(Matcher::UrlEncoded("uuid".into(), "1f1b9c3e".into()))
            .match_header("range", format!("bytes={two_lines}-").as_str())
            .with_status(206)
            .with_body(&body[two_lines..])
            .create_async()
            .await;
        let source = source(&server);
        let page = source.download("1f1b9c3e", 0, 2).await.unwrap();
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1]["sample_identifier"], "IGSN:1");
        let token = page.next_page_token.unwrap();
        assert_eq!(token, format!("download:1f1b9c3e:{two_lines}"));
        let page = source
            .fetch_page(&PageRequest::new("*:*", 2).next(token))
            .await
            .unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0]["sample_identifier"], "IGSN:2");
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn download_without_range_support() {
        let mut server = Server::new_async().await;
        let body = jsonl(3);
        let offset = body.find('\n').unwrap() + 1;
        let _mock = server
            .mock("GET", "/download")
            .match_query(Matcher::Any)
            .with_body(&body)
            .create_async()
            .await;
        let page = source(&server)
            .download("1f1b9c3e", offset as u64, 10)
            .await
            .unwrap();
        let ids: Vec<_> = page
            .records
            .iter()
            .map(|record| record["sample_identifier"].as_str().unwrap())
            .collect();
        assert_eq!(ids, ["IGSN:1", "IGSN:2"]);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn download_past_the_end() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .match_query(Matcher::Any)
            .with_status(416)
            .create_async()
            .await;
        let page = source(&server).download("1f1b9c3e", 100, 10).await.unwrap();
        assert!(page.records.is_empty());
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn malformed_line() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/download")
            .match_query(Matcher::Any)
            .with_body("{\"sample_identifier\": \"a\"}\n[1, 2]\n")
            .create_async()
            .await;
        let error = source(&server)
            .download("1f1b9c3e", 0, 10)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::MalformedPage(_)));
    }

    #[test]
    fn job_status() {
        let status: JobStatus = serde_json::from_value(json!("completed")).unwrap();
        assert_eq!(status, JobStatus::Completed);
    }
}
