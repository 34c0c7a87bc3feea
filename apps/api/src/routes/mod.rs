pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::ingest::handlers as ingest;
use crate::proxy;
use crate::records::handlers as records;
use crate::settings::handlers as settings;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Generation proxy
        .route(
            "/api/generate",
            post(proxy::handle_generate).fallback(proxy::method_not_allowed),
        )
        // Batches
        .route("/api/v1/batches", post(records::handle_create_batch))
        .route(
            "/api/v1/batches/spreadsheet",
            post(ingest::handle_spreadsheet_upload),
        )
        .route("/api/v1/batches/files", post(ingest::handle_files_upload))
        .route(
            "/api/v1/batches/template",
            get(ingest::handle_download_template),
        )
        // Records
        .route(
            "/api/v1/records",
            get(records::handle_list_records).delete(records::handle_reset_records),
        )
        .route(
            "/api/v1/records/export",
            get(records::handle_export_records),
        )
        .route(
            "/api/v1/records/:id",
            get(records::handle_get_record)
                .put(records::handle_edit_record)
                .delete(records::handle_delete_record),
        )
        .route(
            "/api/v1/records/:id/regenerate",
            post(records::handle_regenerate_record),
        )
        .route(
            "/api/v1/records/:id/reasoning",
            get(records::handle_get_reasoning),
        )
        .route(
            "/api/v1/records/:id/events",
            get(records::handle_record_events),
        )
        .route("/api/v1/events", get(records::handle_events))
        // Saved form state
        .route(
            "/api/v1/settings",
            get(settings::handle_get_settings).put(settings::handle_put_settings),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::generation::testing::{backend_error, ScriptedGenerator};
    use crate::generation::Generator;

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn multipart_request(uri: &str, parts: &[(&str, &str, &[u8])]) -> Request<Body> {
        const BOUNDARY: &str = "remarks-test-boundary";
        let mut body = Vec::new();
        for (field, file_name, bytes) in parts {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Waits for the spawned batch task to finish all `total` records.
    async fn wait_for_batch(state: &AppState, total: usize) {
        for _ in 0..200 {
            if let Some(progress) = state.store.lock().await.progress() {
                if progress.processed == total {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("batch did not finish");
    }

    fn state_with(generator: Arc<ScriptedGenerator>) -> AppState {
        AppState::for_tests(generator as Arc<dyn Generator>)
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(state_with(Arc::new(ScriptedGenerator::default())));
        let response = app.oneshot(empty_request(Method::GET, "/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["service"], "remarks-api");
    }

    #[tokio::test]
    async fn test_json_batch_then_list_and_export() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("토론에서 논리적으로 발표함.".to_string()),
            Err(backend_error("OpenAI API 요청 실패: overloaded")),
        ]));
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [
                    {"id": "20501", "content": "토론 활동 참여"},
                    {"id": "20502", "content": "과학 탐구"}
                ]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_json(response).await["total"], 2);

        wait_for_batch(&state, 2).await;

        let list = body_json(
            app.clone()
                .oneshot(empty_request(Method::GET, "/api/v1/records"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(list["records"][0]["id"], "20501");
        assert_eq!(list["records"][0]["original_content"], "토론 활동 참여");
        assert_eq!(list["records"][1]["error"], "OpenAI API 요청 실패: overloaded");
        assert_eq!(list["progress"]["percentage"], 100);

        let export = app
            .oneshot(empty_request(Method::GET, "/api/v1/records/export"))
            .await
            .unwrap();
        assert_eq!(body_text(export).await, "20501\t토론에서 논리적으로 발표함.\n");
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let generator = Arc::new(ScriptedGenerator::default());
        let app = build_router(state_with(generator.clone()));
        let response = app
            .oneshot(json_request(Method::POST, "/api/v1/batches", json!({"items": []})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_spreadsheet_missing_content_column_changes_nothing() {
        let generator = Arc::new(ScriptedGenerator::default());
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        let response = app
            .oneshot(multipart_request(
                "/api/v1/batches/spreadsheet",
                &[("file", "roster.csv", "학번,이름\n20501,김민준\n".as_bytes())],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["message"], crate::ingest::MISSING_COLUMNS_MESSAGE);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(state.store.lock().await.is_empty());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_spreadsheet_upload_starts_batch() {
        let generator = Arc::new(ScriptedGenerator::default());
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        let response = app
            .oneshot(multipart_request(
                "/api/v1/batches/spreadsheet",
                &[(
                    "file",
                    "roster.csv",
                    "학번,이름,활동내용\n20501,김민준,토론 활동 참여\n".as_bytes(),
                )],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        wait_for_batch(&state, 1).await;
        let store = state.store.lock().await;
        assert_eq!(store.get("20501").unwrap().original_content, "토론 활동 참여");
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_file_upload_uses_file_name_as_id() {
        let generator = Arc::new(ScriptedGenerator::default());
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        let response = app
            .oneshot(multipart_request(
                "/api/v1/batches/files",
                &[
                    ("files", "20501.kim.txt", "  토론 활동 참여\n".as_bytes()),
                    ("files", "20502.hwp", &b"\x00"[..]),
                ],
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        wait_for_batch(&state, 2).await;
        let store = state.store.lock().await;
        let ids: Vec<&str> = store.entries().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["20501", "20502"]);
        assert_eq!(store.get("20501").unwrap().original_content, "토론 활동 참여");
        assert_eq!(
            store.get("20502").unwrap().original_content,
            "지원하지 않는 파일 형식입니다: .hwp"
        );
    }

    #[tokio::test]
    async fn test_broken_docx_rejects_upload_before_generation() {
        let generator = Arc::new(ScriptedGenerator::default());
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        let response = app
            .oneshot(multipart_request(
                "/api/v1/batches/files",
                &[
                    ("files", "20501.txt", "토론".as_bytes()),
                    ("files", "20502.docx", &b"not a zip"[..]),
                ],
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["message"].as_str().unwrap().contains("20502.docx"));
        assert_eq!(generator.calls(), 0);
        assert!(state.store.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_template_download() {
        let app = build_router(state_with(Arc::new(ScriptedGenerator::default())));

        let response = app
            .clone()
            .oneshot(empty_request(Method::GET, "/api/v1/batches/template"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get("content-disposition")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(disposition.ends_with(".xlsx"));
        assert!(disposition.contains("filename*=UTF-8''"));

        let response = app
            .oneshot(empty_request(Method::GET, "/api/v1/batches/template?format=csv"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("학번,이름,활동내용"));
    }

    #[tokio::test]
    async fn test_edit_regenerate_and_reasoning() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("처음 결과".to_string()),
            Ok("상 수준 결과".to_string()),
            Ok("'토론' 키워드를 근거로 함.".to_string()),
        ]));
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "토론 활동"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 1).await;

        let edited = body_json(
            app.clone()
                .oneshot(json_request(
                    Method::PUT,
                    "/api/v1/records/a",
                    json!({"content": "  교사가 고친 문장  "}),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(edited["content"], "교사가 고친 문장");

        let regenerated = body_json(
            app.clone()
                .oneshot(json_request(
                    Method::POST,
                    "/api/v1/records/a/regenerate",
                    json!({"level": "상"}),
                ))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(regenerated["content"], "상 수준 결과");
        assert_eq!(regenerated["level"], "상");

        let reasoning = body_json(
            app.oneshot(empty_request(Method::GET, "/api/v1/records/a/reasoning"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(reasoning["original_content"], "토론 활동");
        assert_eq!(reasoning["reasoning"], "'토론' 키워드를 근거로 함.");
    }

    #[tokio::test]
    async fn test_failed_reasoning_returns_fixed_message() {
        let generator = Arc::new(ScriptedGenerator::new(vec![
            Ok("결과".to_string()),
            Err(backend_error("서버 내부 오류가 발생했습니다.")),
        ]));
        let state = state_with(generator);
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "원본"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 1).await;

        let response = app
            .oneshot(empty_request(Method::GET, "/api/v1/records/a/reasoning"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            body_json(response).await["error"]["message"],
            records::REASONING_FAILED_MESSAGE
        );
    }

    #[tokio::test]
    async fn test_reasoning_for_failed_row_is_rejected() {
        let generator = Arc::new(ScriptedGenerator::new(vec![Err(backend_error("quota exceeded"))]));
        let state = state_with(generator.clone());
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "원본"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 1).await;

        let response = app
            .oneshot(empty_request(Method::GET, "/api/v1/records/a/reasoning"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"]["message"],
            crate::records::orchestrator::NOTHING_TO_EXPLAIN_MESSAGE
        );
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_last_record_reports_empty() {
        let state = state_with(Arc::new(ScriptedGenerator::default()));
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "원본"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 1).await;

        let response = app
            .clone()
            .oneshot(empty_request(Method::DELETE, "/api/v1/records/a"))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["removed"], "a");
        assert_eq!(body["empty"], true);

        let response = app
            .oneshot(empty_request(Method::DELETE, "/api/v1/records/a"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let app = build_router(state_with(Arc::new(ScriptedGenerator::default())));

        let defaults = body_json(
            app.clone()
                .oneshot(empty_request(Method::GET, "/api/v1/settings"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(defaults["recordType"], "교과세특");
        assert_eq!(defaults["subject"], "국어");

        let response = app
            .clone()
            .oneshot(json_request(
                Method::PUT,
                "/api/v1/settings",
                json!({"recordType": "진로활동", "guidelines": "맞춤법 준수"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let saved = body_json(
            app.oneshot(empty_request(Method::GET, "/api/v1/settings"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(saved["recordType"], "진로활동");
        assert_eq!(saved["guidelines"], "맞춤법 준수");
        assert_eq!(saved["subject"], "국어");
    }

    #[tokio::test]
    async fn test_store_events_reach_broadcast_subscribers() {
        let state = state_with(Arc::new(ScriptedGenerator::default()));
        let mut events = state.events.subscribe();

        state.store.lock().await.clear();

        let event = events.recv().await.unwrap();
        assert_eq!(event, crate::records::store::StoreEvent::Cleared);
    }

    #[tokio::test]
    async fn test_record_event_stream_ends_with_removal() {
        let state = state_with(Arc::new(ScriptedGenerator::default()));
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "원본"}, {"id": "b", "content": "원본"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 2).await;

        let stream = app
            .clone()
            .oneshot(empty_request(Method::GET, "/api/v1/records/a/events"))
            .await
            .unwrap();
        assert_eq!(stream.status(), StatusCode::OK);

        app.clone()
            .oneshot(json_request(Method::PUT, "/api/v1/records/b", json!({"content": "다른 행"})))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_request(Method::PUT, "/api/v1/records/a", json!({"content": "고친 행"})))
            .await
            .unwrap();
        app.oneshot(empty_request(Method::DELETE, "/api/v1/records/a"))
            .await
            .unwrap();

        let body = body_text(stream).await;
        assert!(body.contains("고친 행"));
        assert!(!body.contains("다른 행"));
        assert!(body.contains(r#""type":"removed""#));
    }

    #[tokio::test]
    async fn test_disconnected_record_streams_are_unsubscribed() {
        let state = state_with(Arc::new(ScriptedGenerator::default()));
        let app = build_router(state.clone());

        app.clone()
            .oneshot(json_request(
                Method::POST,
                "/api/v1/batches",
                json!({"items": [{"id": "a", "content": "원본"}]}),
            ))
            .await
            .unwrap();
        wait_for_batch(&state, 1).await;

        for _ in 0..3 {
            let stream = app
                .clone()
                .oneshot(empty_request(Method::GET, "/api/v1/records/a/events"))
                .await
                .unwrap();
            assert_eq!(stream.status(), StatusCode::OK);
            drop(stream);
        }

        app.oneshot(json_request(Method::PUT, "/api/v1/records/a", json!({"content": "고친 행"})))
            .await
            .unwrap();
        assert_eq!(state.store.lock().await.watcher_count("a"), 0);
    }

    #[tokio::test]
    async fn test_record_event_stream_for_unknown_record_is_404() {
        let app = build_router(state_with(Arc::new(ScriptedGenerator::default())));
        let response = app
            .oneshot(empty_request(Method::GET, "/api/v1/records/nope/events"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
