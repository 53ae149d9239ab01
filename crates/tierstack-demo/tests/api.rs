//! In-process HTTP tests for the posts service.

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use tierstack_demo::{Post, PostStore, build_router};

fn router() -> axum::Router {
    build_router(PostStore::open_in_memory().unwrap())
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/posts")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn root_says_hello() {
    let resp = router().oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "Hello World");
}

#[tokio::test]
async fn health_is_ok() {
    let resp = router().oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_then_list() {
    let app = router();

    let resp = app.clone().oneshot(post(r#"{"title":"hello"}"#)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let created: Post = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(created.title, "hello");

    let resp = app.oneshot(get("/posts")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let posts: Vec<Post> = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(posts, vec![created]);
}

#[tokio::test]
async fn invalid_bodies_are_rejected() {
    let app = router();
    for body in [
        r#"{}"#,
        r#"{"title":42}"#,
        "not json",
        r#"{"name":"x"}"#,
        r#"{"title":""}"#,
        r#"{"title":"   "}"#,
    ] {
        let resp = app.clone().oneshot(post(body)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(body_text(resp).await, "Invalid!");
    }

    let resp = app.oneshot(get("/posts")).await.unwrap();
    assert_eq!(body_text(resp).await, "[]");
}
