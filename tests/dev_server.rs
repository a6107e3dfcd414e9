//! End-to-end scenarios driven through the real axum `Router` via
//! `tower::ServiceExt::oneshot` (no socket bind needed).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sprig::config;
use sprig::server::DevServer;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tower::ServiceExt;

/// A minimal project: `react` (via `main`) and `react-dom/client` (via an
/// `exports` subpath) as its only third-party dependencies.
fn fixture_project() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    write(
        &root.join("src").join("main.tsx"),
        r#"import React from "react";
import { createRoot } from "react-dom/client";

export function run() {
  return <div>{React.name}{createRoot.name}</div>;
}
"#,
    );
    write(&root.join("src").join("index.css"), ".a { color: red; }\n");
    write(
        &root.join("index.html"),
        "<html><head></head><body><div id=\"root\"></div></body></html>",
    );

    let react = root.join("node_modules").join("react");
    write(&react.join("package.json"), r#"{"main": "index.js"}"#);
    write(&react.join("index.js"), "export default { name: 'React' };");

    let react_dom = root.join("node_modules").join("react-dom");
    write(
        &react_dom.join("package.json"),
        r#"{"exports": {"./client": {"import": "./client.js", "default": "./client.js"}}}"#,
    );
    write(
        &react_dom.join("client.js"),
        "export function createRoot() { return {}; }",
    );

    (tmp, root)
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Cold start with an empty dep cache produces one artifact per direct
/// dependency plus a `_meta.json` hash, and `GET /` injects the overlay +
/// HMR client script tags before `</body>`.
#[tokio::test]
async fn cold_start_prebundles_direct_dependencies_and_injects_hmr_tags() {
    let (_tmp, root) = fixture_project();
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    server.warm_prebundle().await.unwrap();

    let deps_dir = root.join(".react-client").join("deps");
    assert!(deps_dir.join("react.js").is_file());
    assert!(deps_dir.join("react-dom_client.js").is_file());

    let meta: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(deps_dir.join("_meta.json")).unwrap()).unwrap();
    assert!(meta["hash"].as_str().unwrap().len() > 0);

    let router = server.into_router();
    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    assert!(html.contains(r#"src="/@runtime/overlay""#));
    assert!(html.contains("new WebSocket("));
    let body_close = html.rfind("</body>").unwrap();
    let overlay_tag = html.find("/@runtime/overlay").unwrap();
    assert!(overlay_tag < body_close);
}

/// Subpath resolution through an `exports` map.
#[tokio::test]
async fn subpath_module_request_serves_bundled_export() {
    let (_tmp, root) = fixture_project();
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    let router = server.into_router();

    let response = router
        .oneshot(
            Request::get("/@modules/react-dom/client")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/javascript; charset=utf-8"
    );
    let body = body_text(response).await;
    assert!(body.contains("createRoot"));
    assert!(root.join(".react-client/deps/react-dom_client.js").is_file());
}

/// An unresolvable module yields 500 with a JS-comment body.
#[tokio::test]
async fn unknown_module_returns_500_with_js_comment_body() {
    let (_tmp, root) = fixture_project();
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    let router = server.into_router();

    let response = router
        .oneshot(
            Request::get("/@modules/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_text(response).await;
    assert!(body.starts_with("// Failed to resolve module does-not-exist:"));
}

/// A `.css` request compiles to a style-injecting JS module.
#[tokio::test]
async fn css_request_compiles_to_style_injection_module() {
    let (_tmp, root) = fixture_project();
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    let router = server.into_router();

    let response = router
        .oneshot(
            Request::get("/src/index.css")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/javascript; charset=utf-8"
    );
    let body = body_text(response).await;
    assert!(body.contains("document.createElement('style')"));
    assert!(body.contains(".a { color: red; }"));
}

/// `/@source-map` returns a line-numbered snippet window centered on the
/// requested line, read against the original source file.
#[tokio::test]
async fn source_map_endpoint_returns_windowed_snippet() {
    let (_tmp, root) = fixture_project();
    write(
        &root.join("src").join("five.ts"),
        "line1\nline2\nline3\nline4\nline5\n",
    );
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    let router = server.into_router();

    let response = router
        .oneshot(
            Request::get("/@source-map?file=/src/five.ts&line=3&column=0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_text(response).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let snippet = json["snippet"].as_str().unwrap();
    assert!(snippet.contains("1: line1"));
    assert!(snippet.contains("3: line3"));
    assert!(snippet.contains("5: line5"));
}

/// Two consecutive requests for the same file without an intervening
/// change return byte-identical bodies.
#[tokio::test]
async fn transform_cache_is_stable_until_invalidated() {
    let (_tmp, root) = fixture_project();
    let project_config = config::load(root.to_str().unwrap(), Some(0), Vec::new()).unwrap();
    let server = DevServer::new(project_config);
    let router = server.into_router();

    let first = router
        .clone()
        .oneshot(Request::get("/src/main.tsx").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let first_body = body_text(first).await;

    let second = router
        .oneshot(Request::get("/src/main.tsx").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let second_body = body_text(second).await;

    assert_eq!(first_body, second_body);
}
