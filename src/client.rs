use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::identity::Identity;
use crate::model::{RemoteState, Status};
use crate::schema::{ResourceDescriptor, ZONE};
use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::{header, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;
use url::Url;

/// Declared attribute values sent with a mutation.
pub type Attributes = IndexMap<String, Value>;

/// The remote control plane, one call per method.
///
/// `get` and `delete` report a missing resource as [`ApiError::NotFound`].
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        attributes: &Attributes,
    ) -> Result<Identity, ApiError>;

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
    ) -> Result<RemoteState, ApiError>;

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
        changes: &Attributes,
    ) -> Result<(), ApiError>;

    async fn delete(&self, descriptor: &ResourceDescriptor, id: &Identity) -> Result<(), ApiError>;
}

#[async_trait]
impl<T: RemoteApi + ?Sized> RemoteApi for Arc<T> {
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        attributes: &Attributes,
    ) -> Result<Identity, ApiError> {
        (**self).create(descriptor, attributes).await
    }

    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
    ) -> Result<RemoteState, ApiError> {
        (**self).get(descriptor, id).await
    }

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
        changes: &Attributes,
    ) -> Result<(), ApiError> {
        (**self).update(descriptor, id, changes).await
    }

    async fn delete(&self, descriptor: &ResourceDescriptor, id: &Identity) -> Result<(), ApiError> {
        (**self).delete(descriptor, id).await
    }
}

#[derive(Clone, Debug)]
pub struct HttpClientBuilder {
    api: Url,
    secret_key: Option<String>,
    default_zone: Option<String>,
    timeout: Option<Duration>,
}

impl HttpClientBuilder {
    pub fn from_url(api: Url) -> Self {
        Self {
            api,
            secret_key: None,
            default_zone: None,
            timeout: None,
        }
    }

    pub fn secret_key<S: Into<String>>(mut self, secret_key: S) -> Self {
        self.secret_key = Some(secret_key.into());
        self
    }

    pub fn default_zone<S: Into<String>>(mut self, zone: S) -> Self {
        self.default_zone = Some(zone.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> anyhow::Result<HttpClient> {
        let mut client = reqwest::Client::builder();
        if let Some(timeout) = self.timeout {
            client = client.timeout(timeout);
        }
        Ok(HttpClient {
            client: client.build()?,
            api: self.api,
            secret_key: self.secret_key,
            default_zone: self.default_zone,
        })
    }
}

impl From<&ClientConfig> for HttpClientBuilder {
    fn from(config: &ClientConfig) -> Self {
        let mut builder = Self::from_url(config.url.clone()).secret_key(config.secret_key.clone());
        if let Some(zone) = &config.default_zone {
            builder = builder.default_zone(zone.clone());
        }
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        builder
    }
}

/// JSON/REST client for the cloud control plane.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
    api: Url,
    secret_key: Option<String>,
    default_zone: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ErrorInformation {
    #[serde(default)]
    message: String,
}

#[derive(Debug, serde::Deserialize)]
struct Created {
    id: String,
}

impl HttpClient {
    async fn request<R, F, FR, ResFut>(
        &self,
        method: Method,
        url: Url,
        request_handler: F,
        response_handler: FR,
    ) -> Result<R, ApiError>
    where
        F: FnOnce(RequestBuilder) -> RequestBuilder,
        FR: FnOnce(Response) -> ResFut,
        ResFut: Future<Output = Result<R, ApiError>>,
    {
        let mut request = self.client.request(method, url);
        if let Some(key) = &self.secret_key {
            request = request.header("X-Auth-Token", key);
        }
        let request = request_handler(request.header(header::ACCEPT, "application/json"));
        let response = request.send().await?;

        response_handler(response).await
    }

    fn url(&self, descriptor: &ResourceDescriptor, zone: Option<&str>, id: Option<&str>) -> Result<Url, ApiError> {
        let mut segments = Vec::with_capacity(descriptor.api_path.len() + 1);
        for segment in descriptor.api_path {
            if *segment == ZONE {
                segments.push(zone.ok_or_else(|| ApiError::Validation {
                    reason: format!("no zone given for {:?}", descriptor.kind),
                })?);
            } else {
                segments.push(*segment);
            }
        }
        segments.extend(id);

        let mut url = self.api.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::Validation {
                reason: "Failed to build path".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Zone and remote-local ID of an identity.
    fn locate<'a>(&self, descriptor: &ResourceDescriptor, id: &'a Identity) -> Result<(Option<&'a str>, &'a str), ApiError> {
        if !descriptor.is_zoned() {
            return Ok((None, id.as_str()));
        }
        id.zoned()
            .map(|(zone, id)| (Some(zone), id))
            .ok_or_else(|| ApiError::Validation {
                reason: format!("resource id '{id}' is not zoned"),
            })
    }

    fn to_state(&self, descriptor: &ResourceDescriptor, zone: Option<&str>, payload: Value) -> Result<RemoteState, ApiError> {
        let Value::Object(mut attributes) = payload else {
            return Err(ApiError::Malformed {
                reason: "expected a JSON object".to_string(),
            });
        };
        attributes.remove("id");

        let status = match descriptor.status_field {
            Some(field) => {
                let reason = attributes
                    .get("error_message")
                    .and_then(Value::as_str)
                    .map(ToString::to_string);
                match attributes.remove(field) {
                    Some(Value::String(raw)) => Status::parse(&raw, reason.as_deref()),
                    _ => {
                        return Err(ApiError::Malformed {
                            reason: format!("missing '{field}' in response"),
                        })
                    }
                }
            }
            None => Status::Ready,
        };
        if let Some(zone) = zone {
            attributes.insert("zone".to_string(), Value::from(zone));
        }

        Ok(RemoteState::new(status, attributes.into_iter().collect()))
    }
}

#[async_trait]
impl RemoteApi for HttpClient {
    #[instrument(skip_all, err, fields(kind = ?descriptor.kind))]
    async fn create(
        &self,
        descriptor: &ResourceDescriptor,
        attributes: &Attributes,
    ) -> Result<Identity, ApiError> {
        let mut body = attributes.clone();
        let zone = match body.remove("zone") {
            Some(Value::String(zone)) => Some(zone),
            _ => self.default_zone.clone(),
        };
        let zone = zone.filter(|_| descriptor.is_zoned());

        let created: Created = self
            .request(
                Method::POST,
                self.url(descriptor, zone.as_deref(), None)?,
                json(body),
                create_response,
            )
            .await?;

        let raw = match zone {
            Some(zone) => format!("{zone}/{}", created.id),
            None => created.id,
        };
        Identity::assigned(raw).ok_or_else(|| ApiError::Malformed {
            reason: "creation response carries an empty id".to_string(),
        })
    }

    #[instrument(skip_all, err, fields(kind = ?descriptor.kind, id = %id))]
    async fn get(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
    ) -> Result<RemoteState, ApiError> {
        let (zone, local) = self.locate(descriptor, id)?;
        let payload: Value = self
            .request(
                Method::GET,
                self.url(descriptor, zone, Some(local))?,
                empty,
                read_response,
            )
            .await?;
        self.to_state(descriptor, zone, payload)
    }

    #[instrument(skip_all, err, fields(kind = ?descriptor.kind, id = %id))]
    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        id: &Identity,
        changes: &Attributes,
    ) -> Result<(), ApiError> {
        let (zone, local) = self.locate(descriptor, id)?;
        self.request(
            Method::PATCH,
            self.url(descriptor, zone, Some(local))?,
            json(changes.clone()),
            update_response,
        )
        .await
    }

    #[instrument(skip_all, err, fields(kind = ?descriptor.kind, id = %id))]
    async fn delete(&self, descriptor: &ResourceDescriptor, id: &Identity) -> Result<(), ApiError> {
        let (zone, local) = self.locate(descriptor, id)?;
        self.request(
            Method::DELETE,
            self.url(descriptor, zone, Some(local))?,
            empty,
            delete_response,
        )
        .await
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Malformed {
                reason: err.to_string(),
            }
        } else {
            Self::Transport {
                reason: err.to_string(),
            }
        }
    }
}

#[inline]
fn empty(request: RequestBuilder) -> RequestBuilder {
    request
}

fn json<S: Serialize>(payload: S) -> impl FnOnce(RequestBuilder) -> RequestBuilder {
    move |r| r.json(&payload)
}

async fn create_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    log::debug!("Eval create response: {:#?}", response);
    match response.status() {
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => Ok(response.json().await?),
        _ => default_response(response).await,
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    log::debug!("Eval get response: {:#?}", response);
    match response.status() {
        StatusCode::OK => Ok(response.json().await?),
        _ => default_response(response).await,
    }
}

async fn update_response(response: Response) -> Result<(), ApiError> {
    log::debug!("Eval update response: {:#?}", response);
    match response.status() {
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::ACCEPTED => Ok(()),
        _ => default_response(response).await,
    }
}

async fn delete_response(response: Response) -> Result<(), ApiError> {
    log::debug!("Eval delete response: {:#?}", response);
    match response.status() {
        StatusCode::OK | StatusCode::NO_CONTENT | StatusCode::ACCEPTED => Ok(()),
        _ => default_response(response).await,
    }
}

async fn default_response<T>(response: Response) -> Result<T, ApiError> {
    let code = response.status();
    let message = match response.json::<ErrorInformation>().await {
        Ok(info) if !info.message.is_empty() => info.message,
        _ => code.to_string(),
    };
    Err(error_for(code, message))
}

fn error_for(code: StatusCode, message: String) -> ApiError {
    match code {
        StatusCode::NOT_FOUND | StatusCode::GONE => ApiError::NotFound,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ApiError::Validation { reason: message }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Auth { reason: message },
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
            ApiError::Conflict { reason: message }
        }
        StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
        _ => ApiError::Transport { reason: message },
    }
}
