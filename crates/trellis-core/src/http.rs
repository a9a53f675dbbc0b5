//! HTTP client for the remote document API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::api::{ApiResult, TaskApi, TaskPatch};
use crate::error::ApiError;
use crate::task::{Initiative, Kpi, Project, Task};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

pub struct HttpApi {
    client: Client,
    base_url: Url,
}

impl HttpApi {
    pub fn new(base_url: &str) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| ApiError::Network(err.to_string()))?;
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|err| ApiError::Network(format!("invalid api url {base_url}: {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::Network(format!("invalid api url {base_url}")));
        }
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Appends each segment percent-encoded, so ids never change the route.
    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Network(format!("invalid api url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> ApiResult<RequestBuilder> {
        Ok(self.client.request(method, self.url(segments)?))
    }

    /// Sends the request and turns non-success statuses into [`ApiError`].
    async fn send(&self, request: RequestBuilder, what: &str) -> ApiResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        debug!(what, status = status.as_u16(), "api response");

        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(what, status = status.as_u16(), body = %body, "api request failed");
        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(what.to_string()));
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            message: if body.is_empty() {
                status.to_string()
            } else {
                body
            },
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> ApiResult<T> {
        let response = self.send(request, what).await?;
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(format!("{what}: {err}")))
    }
}

#[async_trait]
impl TaskApi for HttpApi {
    #[tracing::instrument(skip(self))]
    async fn list_tasks(&self) -> ApiResult<Vec<Task>> {
        self.fetch(self.request(Method::GET, &["tasks"])?, "tasks").await
    }

    #[tracing::instrument(skip(self))]
    async fn get_task(&self, id: &str) -> ApiResult<Task> {
        let what = format!("task {id}");
        self.fetch(self.request(Method::GET, &["tasks", id])?, &what)
            .await
    }

    #[tracing::instrument(skip(self, task), fields(id = %task.id))]
    async fn create_task(&self, task: &Task) -> ApiResult<Task> {
        self.fetch(self.request(Method::POST, &["tasks"])?.json(task), "create task")
            .await
    }

    #[tracing::instrument(skip(self, patch))]
    async fn update_task(&self, id: &str, project: &str, patch: &TaskPatch) -> ApiResult<Task> {
        let what = format!("task {id}");
        let request = self
            .request(Method::PATCH, &["tasks", id])?
            .query(&[("project", project)])
            .json(patch);
        self.fetch(request, &what).await
    }

    #[tracing::instrument(skip(self))]
    async fn delete_task(&self, id: &str, project: &str) -> ApiResult<()> {
        let what = format!("task {id}");
        let request = self
            .request(Method::DELETE, &["tasks", id])?
            .query(&[("project", project)]);
        self.send(request, &what).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn list_initiatives(&self) -> ApiResult<Vec<Initiative>> {
        self.fetch(self.request(Method::GET, &["initiatives"])?, "initiatives")
            .await
    }

    #[tracing::instrument(skip(self, initiative), fields(id = %initiative.id))]
    async fn create_initiative(&self, initiative: &Initiative) -> ApiResult<Initiative> {
        self.fetch(
            self.request(Method::POST, &["initiatives"])?.json(initiative),
            "create initiative",
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_projects(&self) -> ApiResult<Vec<Project>> {
        self.fetch(self.request(Method::GET, &["projects"])?, "projects")
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn list_kpis(&self) -> ApiResult<Vec<Kpi>> {
        self.fetch(self.request(Method::GET, &["kpis"])?, "kpis").await
    }
}
