//! Plumbing shared by all of the HTTP handlers.

use model::{auth, db::Connection, pricing, schema::User, Error, ErrorKind};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;
use std::time::Instant;
use tide::{
    http::mime, utils::async_trait, Body, Middleware, Next, Request, Response, StatusCode,
};
use uuid::Uuid;

/// State shared by all requests.
#[derive(Clone, Debug)]
pub struct State {
    pub conn: Connection,
    pub auth: auth::Options,
    pub pricing: pricing::Options,
}

/// Build the application, with every route mounted.
pub fn app(state: State) -> tide::Server<State> {
    let mut app = tide::with_state(state);
    app.with(LogRequests);
    app.with(tide::utils::After(render_error));
    crate::routes::mount(&mut app);
    app
}

/// The HTTP status reported for a model error.
pub fn status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NotFound,
        ErrorKind::Invalid => StatusCode::BadRequest,
        ErrorKind::Conflict => StatusCode::Conflict,
        ErrorKind::Unauthenticated => StatusCode::Unauthorized,
        ErrorKind::Forbidden => StatusCode::Forbidden,
        ErrorKind::Internal => StatusCode::InternalServerError,
    }
}

/// Conversion of model results into responses with the right status.
pub trait ApiResult<T> {
    fn api(self) -> tide::Result<T>;
}

impl<T> ApiResult<T> for Result<T, Error> {
    fn api(self) -> tide::Result<T> {
        self.map_err(|err| {
            if err.kind() == ErrorKind::Internal {
                tracing::error!("{err}");
            }
            tide::Error::new(status(err.kind()), err)
        })
    }
}

/// Respond with `value` as JSON.
pub fn json(value: &impl Serialize) -> tide::Result {
    json_with_status(StatusCode::Ok, value)
}

/// Respond with `value` as JSON and a `201 Created` status.
pub fn created(value: &impl Serialize) -> tide::Result {
    json_with_status(StatusCode::Created, value)
}

fn json_with_status(status: StatusCode, value: &impl Serialize) -> tide::Result {
    Ok(Response::builder(status)
        .body(Body::from_json(value)?)
        .content_type(mime::JSON)
        .build())
}

/// Parse the JSON request body.
pub async fn body<T: DeserializeOwned>(req: &mut Request<State>) -> tide::Result<T> {
    req.body_json()
        .await
        .map_err(|err| tide::Error::from_str(StatusCode::BadRequest, format!("bad body: {err}")))
}

/// Parse the query string.
pub fn query<T: DeserializeOwned>(req: &Request<State>) -> tide::Result<T> {
    req.query()
        .map_err(|err| tide::Error::from_str(StatusCode::BadRequest, format!("bad query: {err}")))
}

/// Parse an identifier from the URL path.
pub fn id_param(req: &Request<State>, name: &str) -> tide::Result<Uuid> {
    let param = req.param(name)?;
    param.parse().map_err(|_| {
        tide::Error::from_str(
            StatusCode::BadRequest,
            format!("{param} is not a valid {name}"),
        )
    })
}

/// The bearer token the request was made with.
pub fn bearer_token(req: &Request<State>) -> tide::Result<String> {
    req.header("Authorization")
        .and_then(|values| values.last().as_str().strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
        .ok_or_else(|| tide::Error::from_str(StatusCode::Unauthorized, "authentication required"))
}

/// The user the request was made by.
pub async fn authenticate(req: &Request<State>) -> tide::Result<User> {
    let token = bearer_token(req)?;
    auth::authenticate(&req.state().conn, &token).await.api()
}

/// The user the request was made by, who must be an administrator.
pub async fn require_admin(req: &Request<State>) -> tide::Result<User> {
    let user = authenticate(req).await?;
    if !user.is_admin() {
        tracing::warn!("user {} denied access to {}", user.id, req.url().path());
        return Err(tide::Error::from_str(
            StatusCode::Forbidden,
            "administrator access required",
        ));
    }
    Ok(user)
}

/// Render any error as a JSON object of the form `{"error": "..."}`.
///
/// Server errors are logged where they happen and reported to the client without detail, so
/// that file paths and other internals never leak.
async fn render_error(mut res: Response) -> tide::Result {
    if let Some(err) = res.error() {
        let msg = if res.status().is_server_error() {
            "internal error".to_string()
        } else {
            err.to_string()
        };
        res.set_body(json!({ "error": msg }));
        res.set_content_type(mime::JSON);
    }
    Ok(res)
}

/// Middleware which logs every request, with its status and latency.
struct LogRequests;

#[async_trait]
impl Middleware<State> for LogRequests {
    async fn handle(&self, req: Request<State>, next: Next<'_, State>) -> tide::Result {
        let method = req.method();
        let path = req.url().path().to_string();
        let start = Instant::now();
        let res = next.run(req).await;
        let status = res.status();
        let elapsed = start.elapsed();
        if status.is_server_error() {
            tracing::error!("{method} {path} {status} ({elapsed:?})");
        } else if status.is_client_error() {
            tracing::warn!("{method} {path} {status} ({elapsed:?})");
        } else {
            tracing::info!("{method} {path} {status} ({elapsed:?})");
        }
        Ok(res)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    async fn rendered(status: StatusCode, msg: &'static str) -> serde_json::Value {
        let mut res = Response::new(status);
        res.set_error(tide::Error::from_str(status, msg));
        let mut res = render_error(res).await.unwrap();
        res.take_body().into_json().await.unwrap()
    }

    #[async_std::test]
    async fn server_errors_are_not_detailed() {
        let body = rendered(
            StatusCode::InternalServerError,
            "cannot write /var/lib/grocer/store.json",
        )
        .await;
        assert_eq!(body, json!({ "error": "internal error" }));

        let body = rendered(StatusCode::Conflict, "cart is empty").await;
        assert_eq!(body, json!({ "error": "cart is empty" }));
    }

    #[test]
    fn error_statuses() {
        assert_eq!(status(ErrorKind::NotFound), StatusCode::NotFound);
        assert_eq!(status(ErrorKind::Unauthenticated), StatusCode::Unauthorized);
        assert_eq!(status(ErrorKind::Internal), StatusCode::InternalServerError);
    }
}
