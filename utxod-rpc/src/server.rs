//! HTTP plumbing: Basic auth, the JSON-RPC envelope, and the hyper server.

use std::sync::Arc;

use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::config::Config;
use crate::methods::{dispatch, RpcContext};

/// Spawns the RPC server, if enabled. Returns immediately; the server
/// shuts down when `shutdown` flips to true.
pub fn spawn(config: Config, ctx: RpcContext, mut shutdown: watch::Receiver<bool>) {
    if !config.enabled {
        info!("rpc server disabled by configuration");
        return;
    }
    let ctx = Arc::new(ctx);
    let expected_auth = basic_auth_header(&config.username, &config.password);
    let addr = config.listen_addr;

    tokio::spawn(async move {
        let make_svc = make_service_fn(move |_conn| {
            let ctx = ctx.clone();
            let expected_auth = expected_auth.clone();
            async move {
                Ok::<_, std::convert::Infallible>(service_fn(move |req| {
                    handle(ctx.clone(), expected_auth.clone(), req)
                }))
            }
        });
        let server = Server::bind(&addr).serve(make_svc).with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        });
        info!(%addr, "rpc server listening");
        if let Err(error) = server.await {
            error!(%error, "rpc server failed");
        }
    });
}

fn basic_auth_header(username: &str, password: &str) -> String {
    format!("Basic {}", base64::encode(format!("{}:{}", username, password)))
}

async fn handle(
    ctx: Arc<RpcContext>,
    expected_auth: String,
    req: Request<Body>,
) -> Result<Response<Body>, std::convert::Infallible> {
    if req.method() != Method::POST {
        return Ok(plain_response(StatusCode::METHOD_NOT_ALLOWED, "only POST is served"));
    }
    let authorized = req
        .headers()
        .get(hyper::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value == expected_auth)
        .unwrap_or(false);
    if !authorized {
        let mut response = plain_response(StatusCode::UNAUTHORIZED, "authorization required");
        response
            .headers_mut()
            .insert(hyper::header::WWW_AUTHENTICATE, "Basic realm=\"jsonrpc\"".parse().expect("static header value"));
        return Ok(response);
    }

    let body = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return Ok(plain_response(StatusCode::BAD_REQUEST, "unreadable body")),
    };
    let request: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return Ok(plain_response(StatusCode::BAD_REQUEST, "body is not JSON")),
    };

    let id = request.get("id").cloned().unwrap_or(Value::Null);
    let method = request.get("method").and_then(Value::as_str).unwrap_or_default().to_owned();
    let params = request
        .get("params")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    debug!(%method, "rpc call");
    // Chain access is synchronous (it holds the chain lock and may touch
    // disk), so step off the async reactor while the call runs.
    let result = tokio::task::block_in_place(|| dispatch(&ctx, &method, &params));

    let envelope = match result {
        Ok(result) => json!({ "result": result, "error": Value::Null, "id": id }),
        Err(error) => json!({ "result": Value::Null, "error": error.to_json(), "id": id }),
    };
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(Body::from(envelope.to_string()))
        .expect("response construction is infallible");
    Ok(response)
}

fn plain_response(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(message.to_owned()))
        .expect("response construction is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_header_matches_the_classic_form() {
        // "user:pass" base64-encoded, as any HTTP client would send it.
        assert_eq!(basic_auth_header("user", "pass"), "Basic dXNlcjpwYXNz");
    }
}
