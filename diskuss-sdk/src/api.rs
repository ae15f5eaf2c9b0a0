//! HTTP collaborators of the sync core: account authentication, user
//! search, and discussion creation.
//!
//! These are plain request/reply lookups against the account API, returning
//! the same entities the wire protocol carries. No retry logic lives here;
//! failures map onto the SDK error taxonomy and the caller decides.

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::types::{Discussion, User, UserId};

/// A minted credential plus the profile it belongs to.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user: User,
}

/// Standard response envelope: `{"message": ..., "data": ...}`.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[allow(dead_code)]
    message: Option<String>,
    data: T,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Thin client for the account API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl ApiClient {
    /// `base_url` without a trailing slash, e.g. `https://api.example.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: None,
        }
    }

    /// Attach a bearer token to subsequent requests.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Exchange credentials for a bearer token.
    pub async fn login(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/api/auth/login", self.base_url))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let resp = check_auth_status(resp).await?;
        Ok(resp.json::<TokenResponse>().await?.token)
    }

    /// Register a new account; returns a bearer token like [`login`].
    ///
    /// [`login`]: ApiClient::login
    pub async fn signup(&self, username: &str, password: &str) -> Result<String> {
        let resp = self
            .http
            .post(format!("{}/api/auth/signup", self.base_url))
            .json(&serde_json::json!({ "username": username, "password": password }))
            .send()
            .await?;
        let resp = check_auth_status(resp).await?;
        Ok(resp.json::<TokenResponse>().await?.token)
    }

    /// Log in and fetch the profile in one go.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<AuthSession> {
        let token = self.login(username, password).await?;
        let user = self.clone().with_token(token.clone()).me().await?;
        Ok(AuthSession { token, user })
    }

    /// The authenticated user's profile.
    pub async fn me(&self) -> Result<User> {
        let resp = self
            .request(reqwest::Method::GET, "/api/diskuss/me")?
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<Envelope<User>>().await?.data)
    }

    /// User candidates by partial username match.
    pub async fn search_users(&self, query: &str) -> Result<Vec<User>> {
        let resp = self
            .request(reqwest::Method::GET, "/api/diskuss/users")?
            .query(&[("username", query)])
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<Envelope<Vec<User>>>().await?.data)
    }

    /// The user's discussions, with their latest messages.
    ///
    /// The same data the socket's `request_discussions` yields, useful for
    /// rendering the sidebar before the socket settles. Feed the result to
    /// [`crate::directory::DiscussionDirectory::replace`].
    pub async fn discussions(&self) -> Result<Vec<Discussion>> {
        let resp = self
            .request(reqwest::Method::GET, "/api/diskuss/discussions")?
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<Envelope<Vec<Discussion>>>().await?.data)
    }

    /// Create (or fetch) the discussion with the given participants.
    pub async fn create_discussion(&self, participants: &[UserId]) -> Result<Discussion> {
        let resp = self
            .request(reqwest::Method::POST, "/api/diskuss/discussions")?
            .json(&serde_json::json!({ "participants": participants }))
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(resp.json::<Envelope<Discussion>>().await?.data)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::Auth("no token; log in first".to_string()))?;
        Ok(self
            .http
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(token))
    }
}

/// Map an error status to the taxonomy; 401/403 is an auth failure.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let message = error_message(resp).await;
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        Err(Error::Auth(message))
    } else {
        Err(Error::Network(format!("{status}: {message}")))
    }
}

/// Like [`check_status`], but any rejection of a credential exchange is an
/// auth failure regardless of the exact status code.
async fn check_auth_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(Error::Auth(error_message(resp).await))
}

async fn error_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    match resp.json::<ErrorBody>().await {
        Ok(ErrorBody { message: Some(m) }) => m,
        _ => status.to_string(),
    }
}
