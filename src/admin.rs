//! Moderation endpoint at `/`.
//!
//! Disabled unless `admin_password` is configured. Requests authenticate with
//! `Authorization: Bearer <password>`.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::dispatcher::Context;
use crate::error::{Fault, HttpError};
use crate::request::Request;
use crate::response::Response;
use crate::router::Params;
use crate::store::Mode;

const DEFAULT_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Action {
    Activate,
    Delete,
}

#[derive(Debug, Deserialize)]
struct Moderation {
    action: Action,
    path: String,
    id: i64,
}

/// `GET /` lists pending comments, `POST /` activates or deletes one.
pub async fn index(ctx: Arc<Context>, _params: Params, req: Request) -> Result<Response, Fault> {
    authorize(&ctx, &req)?;

    if req.method() == http::Method::POST {
        let Moderation { action, path, id } = req.json()?;
        let result = {
            let path = path.clone();
            match action {
                Action::Activate => ctx.store(move |s| s.activate(&path, id).map(Some)).await?,
                Action::Delete => ctx.store(move |s| s.delete(&path, id)).await?,
            }
        };
        info!(thread = %path, id, ?action, "moderated");
        return Ok(Response::json(ctx.encoder().optional(result.as_ref())?.to_string()));
    }

    let limit = match req.query_param("limit") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| HttpError::bad_request("`limit` must be a non-negative integer"))?,
        None => DEFAULT_LIMIT,
    };
    let pending = ctx.store(move |s| s.recent(Mode::Pending, limit)).await?;

    let items = pending
        .iter()
        .map(|(path, comment)| Ok(json!({ "path": path, "comment": ctx.encoder().value(comment)? })))
        .collect::<Result<Vec<_>, serde_json::Error>>()?;
    Ok(Response::json(serde_json::Value::Array(items).to_string()))
}

fn authorize(ctx: &Context, req: &Request) -> Result<(), HttpError> {
    let Some(expected) = ctx.config().admin_password.as_deref() else {
        debug!("moderation disabled");
        return Err(HttpError::forbidden());
    };
    match req.bearer() {
        Some(given) if ctx.signer().secret_matches(given, expected) => Ok(()),
        _ => {
            warn!(remote = ?req.remote_addr(), "rejected moderation request");
            Err(HttpError::forbidden())
        }
    }
}
