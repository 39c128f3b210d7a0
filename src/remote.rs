//! Azure DevOps REST access.
//!
//! [`AzdoClient`] talks to the platform with PAT basic auth: repository
//! lookup, paged pull-request listing, WIQL work-item queries, and chunked
//! work-item detail fetches. [`RemoteSource`] is the seam the sync driver
//! consumes, so tests and alternative hosts can substitute their own source.
//!
//! Credentials come from the environment:
//! - `AZUREDEVOPS_ACCESS_TOKEN`: personal access token
//! - `AZUREDEVOPS_URL`: organization base URL, e.g. `https://dev.azure.com/org`
//!
//! The client sets no request timeout; callers that need one impose it from
//! outside the invocation.

use base64::Engine;
use serde::Deserialize;

use crate::error::SyncError;
use crate::models::{PullRequest, Repository, SyncWindow, WorkItem};

/// REST API version appended to every request.
const API_VERSION: &str = "7.1";

/// Page size for the pull-request listing.
const PULL_REQUEST_PAGE: usize = 100;

/// Platform cap on ids per work-item detail fetch.
pub const WORK_ITEM_FETCH_CAP: usize = 200;

/// PAT plus organization URL, supplied once before any fetch.
#[derive(Clone)]
pub struct Credentials {
    pub access_token: String,
    pub organization_url: String,
}

impl Credentials {
    /// Load from `AZUREDEVOPS_ACCESS_TOKEN` and `AZUREDEVOPS_URL`.
    pub fn from_env() -> Result<Self, SyncError> {
        let access_token =
            std::env::var("AZUREDEVOPS_ACCESS_TOKEN").map_err(|_| SyncError::MissingCredential)?;
        let organization_url =
            std::env::var("AZUREDEVOPS_URL").map_err(|_| SyncError::MissingCredential)?;
        Ok(Self {
            access_token,
            organization_url: organization_url.trim_end_matches('/').to_string(),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_token", &"<redacted>")
            .field("organization_url", &self.organization_url)
            .finish()
    }
}

/// Remote half of the entity source: everything reached over the REST API.
///
/// Fetch operations tolerate partial failure at the granularity their
/// errors encode: a failed [`work_items`](RemoteSource::work_items) chunk is
/// a [`SyncError::FailedItemFetch`] the driver skips past, while a failed
/// query or listing is a [`SyncError::RemoteQueryFailed`] that ends the
/// entity kind's segment.
pub trait RemoteSource: Send + Sync {
    /// Organization base URL, used to build user-facing work-item links.
    fn organization_url(&self) -> &str;

    fn repository(&self, project: &str, repository: &str) -> Result<Repository, SyncError>;

    /// List pull requests matching `status`, optionally bounded to a
    /// creation-time window.
    fn pull_requests(
        &self,
        project: &str,
        repository_id: &str,
        status: &str,
        window: Option<SyncWindow>,
    ) -> Result<Vec<PullRequest>, SyncError>;

    /// Run a WIQL query and return matching work-item ids.
    fn work_item_ids(&self, project: &str, query: &str) -> Result<Vec<i64>, SyncError>;

    /// Fetch full work items for up to [`WORK_ITEM_FETCH_CAP`] ids.
    fn work_items(&self, ids: &[i64]) -> Result<Vec<WorkItem>, SyncError>;
}

pub struct AzdoClient {
    http: reqwest::blocking::Client,
    credentials: Credentials,
    auth_header: String,
}

impl AzdoClient {
    pub fn new(credentials: Credentials) -> Result<Self, SyncError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(None::<std::time::Duration>)
            .build()
            .map_err(|e| SyncError::remote("http client", e.to_string()))?;

        let token = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", credentials.access_token));

        Ok(Self {
            http,
            credentials,
            auth_header: format!("Basic {token}"),
        })
    }

    fn api_url(&self, segments: &[&str]) -> Result<reqwest::Url, SyncError> {
        let mut url = reqwest::Url::parse(&self.credentials.organization_url)
            .map_err(|e| SyncError::remote("organization url", e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| SyncError::remote("organization url", "cannot be a base"))?
            .extend(segments);
        url.query_pairs_mut().append_pair("api-version", API_VERSION);
        Ok(url)
    }

    fn get_json<T: for<'de> Deserialize<'de>>(&self, url: reqwest::Url) -> Result<T, String> {
        self.http
            .get(url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json::<T>())
            .map_err(|e| e.to_string())
    }

    fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: reqwest::Url,
        body: &serde_json::Value,
    ) -> Result<T, String> {
        self.http
            .post(url)
            .header(reqwest::header::AUTHORIZATION, &self.auth_header)
            .json(body)
            .send()
            .and_then(|response| response.error_for_status())
            .and_then(|response| response.json::<T>())
            .map_err(|e| e.to_string())
    }
}

#[derive(Deserialize)]
struct PullRequestPage {
    #[serde(default)]
    value: Vec<PullRequest>,
}

#[derive(Deserialize)]
struct WiqlResponse {
    #[serde(rename = "workItems", default)]
    work_items: Vec<WorkItemRef>,
}

#[derive(Deserialize)]
struct WorkItemRef {
    id: i64,
}

#[derive(Deserialize)]
struct WorkItemList {
    #[serde(default)]
    value: Vec<WorkItem>,
}

impl RemoteSource for AzdoClient {
    fn organization_url(&self) -> &str {
        &self.credentials.organization_url
    }

    fn repository(&self, project: &str, repository: &str) -> Result<Repository, SyncError> {
        let url = self.api_url(&[project, "_apis", "git", "repositories", repository])?;
        self.get_json(url)
            .map_err(|detail| SyncError::remote("repository lookup", detail))
    }

    fn pull_requests(
        &self,
        project: &str,
        repository_id: &str,
        status: &str,
        window: Option<SyncWindow>,
    ) -> Result<Vec<PullRequest>, SyncError> {
        let mut all = Vec::new();
        let mut skip = 0usize;

        loop {
            let mut url = self.api_url(&[
                project,
                "_apis",
                "git",
                "repositories",
                repository_id,
                "pullrequests",
            ])?;
            {
                let mut pairs = url.query_pairs_mut();
                pairs.append_pair("searchCriteria.status", status);
                pairs.append_pair("$top", &PULL_REQUEST_PAGE.to_string());
                pairs.append_pair("$skip", &skip.to_string());
                if let Some(window) = window {
                    pairs.append_pair(
                        "searchCriteria.minTime",
                        &window.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    );
                    pairs.append_pair(
                        "searchCriteria.maxTime",
                        &window.end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                    );
                    pairs.append_pair("searchCriteria.queryTimeRangeType", "created");
                }
            }

            let page: PullRequestPage = self
                .get_json(url)
                .map_err(|detail| SyncError::remote("pull request listing", detail))?;

            let fetched = page.value.len();
            all.extend(page.value);
            if fetched < PULL_REQUEST_PAGE {
                return Ok(all);
            }
            skip += PULL_REQUEST_PAGE;
        }
    }

    fn work_item_ids(&self, project: &str, query: &str) -> Result<Vec<i64>, SyncError> {
        let url = self.api_url(&[project, "_apis", "wit", "wiql"])?;
        let response: WiqlResponse = self
            .post_json(url, &serde_json::json!({ "query": query }))
            .map_err(|detail| SyncError::remote("work item query", detail))?;
        Ok(response.work_items.into_iter().map(|r| r.id).collect())
    }

    fn work_items(&self, ids: &[i64]) -> Result<Vec<WorkItem>, SyncError> {
        debug_assert!(ids.len() <= WORK_ITEM_FETCH_CAP);

        let id_list = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = self.api_url(&["_apis", "wit", "workitems"])?;
        url.query_pairs_mut()
            .append_pair("ids", &id_list)
            .append_pair("$expand", "all");

        let list: WorkItemList =
            self.get_json(url).map_err(|detail| SyncError::FailedItemFetch {
                count: ids.len(),
                detail,
            })?;
        Ok(list.value)
    }
}

/// Insert the PAT into an `https://` clone URL, replacing any userinfo the
/// platform put there. Non-https URLs (local fixtures, pre-authenticated
/// remotes) pass through unchanged.
pub fn authenticated_clone_url(remote_url: &str, access_token: Option<&str>) -> String {
    let token = match access_token {
        Some(token) if !token.is_empty() => token,
        _ => return remote_url.to_string(),
    };
    let rest = match remote_url.strip_prefix("https://") {
        Some(rest) => rest,
        None => return remote_url.to_string(),
    };

    let (authority, path) = match rest.split_once('/') {
        Some((authority, path)) => (authority, Some(path)),
        None => (rest, None),
    };
    let host = authority.rsplit('@').next().unwrap_or(authority);

    let mut url = format!("https://{token}@{host}");
    if let Some(path) = path {
        url.push('/');
        url.push_str(path);
    }
    url
}
