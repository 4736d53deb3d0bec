use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;
use trail_core::model::{
    GenerateTrailRequest, GenerationStarted, Lesson, LessonId, LessonProgressPatch, ModuleId,
    Trail, TrailGenerationStatus, TrailId, TrailModule, TrailSummary,
};

use super::TrailApi;
use crate::config::{MAX_ACTIVE_TRAILS, TrailServiceConfig};
use crate::error::TrailApiError;

/// How a 409 response is read for a given endpoint.
#[derive(Clone, Copy)]
enum OnConflict {
    Quota,
    Reject,
}

/// Identifies the entity a request targets, for `NotFound` errors.
struct Target<'a> {
    entity: &'static str,
    id: &'a str,
    on_conflict: OnConflict,
}

impl<'a> Target<'a> {
    fn new(entity: &'static str, id: &'a str) -> Self {
        Self {
            entity,
            id,
            on_conflict: OnConflict::Reject,
        }
    }

    fn quota(mut self) -> Self {
        self.on_conflict = OnConflict::Quota;
        self
    }
}

/// `TrailApi` over HTTP + JSON.
#[derive(Clone)]
pub struct HttpTrailApi {
    client: Client,
    base_url: Url,
    api_token: Option<String>,
}

impl HttpTrailApi {
    /// Build a client for the configured service.
    ///
    /// # Errors
    ///
    /// Returns `TrailApiError::Http` if the HTTP client cannot be constructed.
    pub fn new(config: &TrailServiceConfig) -> Result<Self, TrailApiError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_token: config.api_token.clone(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TrailApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| TrailApiError::Unavailable(format!("bad base url {}", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: Method, segments: &[&str]) -> Result<RequestBuilder, TrailApiError> {
        let url = self.endpoint(segments)?;
        debug!(%method, %url, "trail service request");
        let builder = self.client.request(method, url);
        Ok(match &self.api_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    async fn send(builder: RequestBuilder, target: &Target<'_>) -> Result<Response, TrailApiError> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        Err(match status {
            StatusCode::NOT_FOUND => TrailApiError::not_found(target.entity, target.id),
            StatusCode::CONFLICT => match target.on_conflict {
                OnConflict::Quota => TrailApiError::QuotaExceeded {
                    limit: MAX_ACTIVE_TRAILS,
                },
                OnConflict::Reject => {
                    let body = response.text().await.unwrap_or_default();
                    TrailApiError::Conflict(if body.trim().is_empty() {
                        format!("{} {} rejected the update", target.entity, target.id)
                    } else {
                        body
                    })
                }
            },
            other => TrailApiError::HttpStatus(other),
        })
    }

    async fn fetch<T: DeserializeOwned>(
        builder: RequestBuilder,
        target: Target<'_>,
    ) -> Result<T, TrailApiError> {
        let response = Self::send(builder, &target).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl TrailApi for HttpTrailApi {
    async fn list_active_trails(&self) -> Result<Vec<TrailSummary>, TrailApiError> {
        let builder = self.request(Method::GET, &["trails"])?;
        Self::fetch(builder, Target::new("trails", "")).await
    }

    async fn get_trail(&self, id: &TrailId) -> Result<Trail, TrailApiError> {
        let builder = self.request(Method::GET, &["trails", id.as_str()])?;
        Self::fetch(builder, Target::new("trail", id.as_str())).await
    }

    async fn get_module(
        &self,
        trail_id: &TrailId,
        module_id: &ModuleId,
    ) -> Result<TrailModule, TrailApiError> {
        let builder = self.request(
            Method::GET,
            &["trails", trail_id.as_str(), "modules", module_id.as_str()],
        )?;
        Self::fetch(builder, Target::new("module", module_id.as_str())).await
    }

    async fn get_lesson(&self, id: &LessonId) -> Result<Lesson, TrailApiError> {
        let builder = self.request(Method::GET, &["lessons", id.as_str()])?;
        Self::fetch(builder, Target::new("lesson", id.as_str())).await
    }

    async fn generate_trail(
        &self,
        request: &GenerateTrailRequest,
    ) -> Result<GenerationStarted, TrailApiError> {
        let builder = self
            .request(Method::POST, &["trails", "generate"])?
            .json(request);
        Self::fetch(
            builder,
            Target::new("language", &request.language_code).quota(),
        )
        .await
    }

    async fn generation_status(
        &self,
        id: &TrailId,
    ) -> Result<TrailGenerationStatus, TrailApiError> {
        let builder = self.request(Method::GET, &["trails", id.as_str(), "generation-status"])?;
        Self::fetch(builder, Target::new("trail", id.as_str())).await
    }

    async fn archive_trail(&self, id: &TrailId) -> Result<(), TrailApiError> {
        let builder = self.request(Method::PATCH, &["trails", id.as_str(), "archive"])?;
        Self::send(builder, &Target::new("trail", id.as_str())).await?;
        Ok(())
    }

    async fn update_lesson_progress(
        &self,
        id: &LessonId,
        patch: &LessonProgressPatch,
    ) -> Result<Lesson, TrailApiError> {
        let builder = self
            .request(Method::PATCH, &["lessons", id.as_str(), "progress"])?
            .json(patch);
        Self::fetch(builder, Target::new("lesson", id.as_str())).await
    }
}
