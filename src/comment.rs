//! Comment endpoints: list, fetch, create, modify, delete.
//!
//! Creating a comment hands the client a signed token bound to
//! `[thread, id]`, both as a cookie and in the `X-Glosa-Token` header. Editing
//! or deleting that comment later requires the token back, within the
//! configured max-age. No session exists on the server.

use std::sync::Arc;

use http::StatusCode;
use http::header::{LOCATION, SET_COOKIE};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::dispatcher::Context;
use crate::error::{Fault, HttpError};
use crate::markup::MarkupRenderer;
use crate::request::Request;
use crate::response::Response;
use crate::router::Params;
use crate::store::{Comment, CommentUpdate, Mode, NewComment};

/// Header carrying the token for clients that cannot use cookies.
pub const TOKEN_HEADER: &str = "x-glosa-token";

const MAX_TEXT: usize = 65_535;
const MAX_FIELD: usize = 255;

/// Characters escaped when a thread path is put back into a URL.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ').add(b'"').add(b'#').add(b'%').add(b'<').add(b'>').add(b'?').add(b'`').add(b'{').add(b'}');

/// Cookie holding the token for comment `id`.
pub fn cookie_name(id: i64) -> String {
    format!("glosa-{id}")
}

/// API shape of a stored comment: rendered text, no e-mail or address.
pub fn encoder(markup: Arc<dyn MarkupRenderer>) -> impl Fn(&Comment) -> Value + Send + Sync + 'static {
    move |c: &Comment| {
        json!({
            "id": c.id,
            "parent": c.parent,
            "created": seconds(c.created),
            "modified": c.modified.map(seconds),
            "text": markup.render(&c.text),
            "author": c.author,
            "website": c.website,
            "mode": c.mode.bits(),
        })
    }
}

fn seconds(t: chrono::DateTime<chrono::Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}

// ── Request bodies ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CommentForm {
    text: String,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    parent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct UpdateForm {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    author: Option<String>,
    #[serde(default)]
    website: Option<String>,
}

/// Trims, and maps blank to `None`.
fn field(value: Option<String>, name: &str) -> Result<Option<String>, HttpError> {
    let Some(value) = value.map(|v| v.trim().to_owned()).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_FIELD {
        return Err(HttpError::bad_request(format!("`{name}` is too long")));
    }
    Ok(Some(value))
}

fn text(value: String) -> Result<String, HttpError> {
    if value.trim().is_empty() {
        return Err(HttpError::bad_request("`text` must not be empty"));
    }
    if value.chars().count() > MAX_TEXT {
        return Err(HttpError::bad_request("`text` is too long"));
    }
    Ok(value)
}

fn website(value: Option<String>) -> Result<Option<String>, HttpError> {
    let value = field(value, "website")?;
    match &value {
        Some(url) if !(url.starts_with("http://") || url.starts_with("https://")) => {
            Err(HttpError::bad_request("`website` must be an http(s) URL"))
        }
        _ => Ok(value),
    }
}

fn thread(params: &Params) -> Result<String, Fault> {
    params
        .str("path")
        .map(str::to_owned)
        .ok_or_else(|| Fault::internal("route without a `path` placeholder"))
}

fn comment_id(params: &Params) -> Result<i64, Fault> {
    params.int("id").ok_or_else(|| Fault::internal("route without an `id` placeholder"))
}

// ── Handlers ──────────────────────────────────────────────────────────────────

/// `GET /comment/<path>/` lists a thread, `GET /comment/<path>/<id>` fetches
/// one comment. Pending comments are never shown here.
pub async fn get(ctx: Arc<Context>, params: Params, _req: Request) -> Result<Response, Fault> {
    let path = thread(&params)?;

    let body = match params.int("id") {
        Some(id) => {
            let comment = ctx.store(move |s| s.get(&path, id)).await?;
            if comment.mode == Mode::Pending {
                return Err(HttpError::not_found().into());
            }
            ctx.encoder().value(&comment)?
        }
        None => {
            let comments = ctx
                .store(move |s| s.retrieve(&path, &[Mode::Public, Mode::Deleted]))
                .await?;
            if comments.is_empty() {
                return Err(HttpError::not_found().into());
            }
            ctx.encoder().values(&comments)?
        }
    };
    Ok(Response::json(body.to_string()))
}

/// `POST /comment/<path>/new`.
pub async fn create(ctx: Arc<Context>, params: Params, req: Request) -> Result<Response, Fault> {
    let path = thread(&params)?;
    let form: CommentForm = req.json()?;

    let new = NewComment {
        text: text(form.text)?,
        author: field(form.author, "author")?,
        email: field(form.email, "email")?,
        website: website(form.website)?,
        parent: form.parent,
        remote_addr: req.remote_addr().map(|a| a.ip().to_string()),
        mode: if ctx.config().moderation { Mode::Pending } else { Mode::Public },
        created: None,
    };

    let stored = {
        let path = path.clone();
        ctx.store(move |s| s.add(&path, new)).await?
    };
    info!(thread = %path, id = stored.id, pending = stored.mode == Mode::Pending, "comment created");

    let token = ctx.sign(&(&path, stored.id))?;
    let status = match stored.mode {
        Mode::Pending => StatusCode::ACCEPTED,
        _ => StatusCode::CREATED,
    };
    let location = format!(
        "{}/comment/{}/{}",
        ctx.config().host,
        utf8_percent_encode(&path, PATH),
        stored.id
    );
    let cookie = format!(
        "{}={token}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        cookie_name(stored.id),
        ctx.max_age().as_secs()
    );

    Ok(Response::builder()
        .status(status)
        .header(LOCATION.as_str(), location)
        .header(SET_COOKIE.as_str(), cookie)
        .header(TOKEN_HEADER, token)
        .json(ctx.encoder().to_vec(&stored)?))
}

/// `PUT` or `DELETE /comment/<path>/<id>`, with the token issued on creation.
pub async fn modify(ctx: Arc<Context>, params: Params, req: Request) -> Result<Response, Fault> {
    let path = thread(&params)?;
    let id = comment_id(&params)?;
    authorize(&ctx, &req, &path, id)?;

    if req.method() == http::Method::DELETE {
        let stub = {
            let path = path.clone();
            ctx.store(move |s| s.delete(&path, id)).await?
        };
        info!(thread = %path, id, soft = stub.is_some(), "comment deleted");

        let expire = format!("{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax", cookie_name(id));
        return Ok(Response::builder()
            .header(SET_COOKIE.as_str(), expire)
            .json(ctx.encoder().optional(stub.as_ref())?.to_string()));
    }

    let form: UpdateForm = req.json()?;
    let update = CommentUpdate {
        text: form.text.map(text).transpose()?,
        author: field(form.author, "author")?,
        website: website(form.website)?,
    };
    let updated = {
        let path = path.clone();
        ctx.store(move |s| s.update(&path, id, update)).await?
    };
    info!(thread = %path, id, "comment edited");
    Ok(Response::json(ctx.encoder().to_vec(&updated)?))
}

/// The token must verify and name exactly this thread and comment.
fn authorize(ctx: &Context, req: &Request, path: &str, id: i64) -> Result<(), Fault> {
    let cookie = cookie_name(id);
    let Some(token) = req.cookie(&cookie).or_else(|| req.header(TOKEN_HEADER)) else {
        warn!(thread = %path, id, "modification without token");
        return Err(HttpError::forbidden().into());
    };

    let (token_path, token_id): (String, i64) = ctx.unsign(token).map_err(|err| {
        warn!(thread = %path, id, %err, "rejected comment token");
        Fault::from(err)
    })?;
    if token_path != path || token_id != id {
        warn!(thread = %path, id, "token issued for another comment");
        return Err(HttpError::forbidden().into());
    }
    Ok(())
}
