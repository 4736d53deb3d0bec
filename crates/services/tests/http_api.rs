use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use services::config::parse_base_url;
use services::{
    HttpTrailApi, StoreConfig, TrailApi, TrailApiError, TrailServiceConfig, TrailStore,
};
use trail_core::model::{GenerateTrailRequest, LessonId, LessonProgressPatch, TrailId, TrailStatus};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, token: Option<&str>) -> HttpTrailApi {
    let base = parse_base_url(&format!("{}/api", server.uri())).unwrap();
    let mut config = TrailServiceConfig::new(base);
    config.api_token = token.map(str::to_owned);
    HttpTrailApi::new(&config).unwrap()
}

fn trail_json(status: &str) -> serde_json::Value {
    json!({
        "id": "T1",
        "languageCode": "es",
        "languageName": "Spanish",
        "languageFlag": "es",
        "levelCode": "B1",
        "levelName": "Intermediate",
        "status": status,
        "modules": [{
            "id": "M1",
            "title": "Ordering food",
            "competencyCode": "B1.3",
            "competencyName": "Restaurants",
            "orderIndex": 0,
            "status": "READY",
            "lessons": [
                {
                    "id": "L1",
                    "title": "Menu words",
                    "type": "VOCABULARY",
                    "durationMinutes": 10,
                    "completedAt": "2024-05-01T10:00:00Z",
                    "score": 80,
                    "timeSpentSeconds": 600
                },
                { "id": "L2", "title": "At the table", "type": "CONVERSATION", "durationMinutes": 15 }
            ]
        }],
        "estimatedDurationMinutes": 120
    })
}

#[tokio::test]
async fn list_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/trails"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": "T1",
            "languageCode": "es",
            "languageName": "Spanish",
            "levelCode": "B1",
            "levelName": "Intermediate",
            "status": "PARTIAL",
            "lessonsCompleted": 2,
            "totalLessons": 10,
            "progressPercentage": 20
        }])))
        .expect(1)
        .mount(&server)
        .await;

    let summaries = client(&server, Some("secret"))
        .list_active_trails()
        .await
        .unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].status, TrailStatus::Partial);
    assert_eq!(summaries[0].language.language_code, "es");
    assert_eq!(summaries[0].progress_percentage, 20);
}

#[tokio::test]
async fn trail_decodes_nested_lessons() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/trails/T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(trail_json("READY")))
        .mount(&server)
        .await;

    let trail = client(&server, None)
        .get_trail(&TrailId::new("T1"))
        .await
        .unwrap();
    assert_eq!(trail.status(), TrailStatus::Ready);
    assert_eq!(trail.modules().len(), 1);
    assert_eq!(trail.estimated_duration_minutes(), Some(120));
    let (_, lesson) = trail.find_lesson(&LessonId::new("L1")).unwrap();
    assert!(lesson.is_completed());
    assert_eq!(lesson.score(), Some(80));
}

#[tokio::test]
async fn missing_trail_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/trails/T9"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .get_trail(&TrailId::new("T9"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrailApiError::NotFound { entity: "trail", ref id } if id == "T9"));
}

#[tokio::test]
async fn generate_conflict_is_quota() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/trails/generate"))
        .and(body_json(json!({ "languageCode": "de" })))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .generate_trail(&GenerateTrailRequest::new("de"))
        .await
        .unwrap_err();
    assert!(matches!(err, TrailApiError::QuotaExceeded { limit: 3 }));
}

#[tokio::test]
async fn regenerate_sends_force_flag() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/trails/generate"))
        .and(body_json(json!({ "languageCode": "es", "forceRegenerate": true })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "trailId": "T1" })))
        .expect(1)
        .mount(&server)
        .await;

    let started = client(&server, None)
        .generate_trail(&GenerateTrailRequest::regenerate("es"))
        .await
        .unwrap();
    assert_eq!(started.trail_id, TrailId::new("T1"));
}

#[tokio::test]
async fn progress_conflict_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/lessons/L2/progress"))
        .and(body_json(json!({ "completed": true, "score": 90 })))
        .respond_with(ResponseTemplate::new(409).set_body_string("module still generating"))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .update_lesson_progress(
            &LessonId::new("L2"),
            &LessonProgressPatch::completed(Some(90), None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TrailApiError::Conflict(ref body) if body == "module still generating"));
}

#[tokio::test]
async fn server_errors_are_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/trails/T1/generation-status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client(&server, None)
        .generation_status(&TrailId::new("T1"))
        .await
        .unwrap_err();
    assert!(err.is_transient());
}

#[tokio::test]
async fn store_follows_generation_over_http() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/trails/generate"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({ "trailId": "T1" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/trails/T1/generation-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "progressPercentage": 100,
            "currentStep": "done",
            "modulesGenerated": 1,
            "totalModules": 1
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/trails/T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(trail_json("READY")))
        .mount(&server)
        .await;

    let config = StoreConfig {
        poll_interval: Duration::from_millis(20),
        ..StoreConfig::default()
    };
    let store = TrailStore::new(Arc::new(client(&server, None)), config);
    let id = store
        .generate_trail(GenerateTrailRequest::new("es"))
        .await
        .unwrap();

    let mut rx = store.watch();
    let snapshot = tokio::time::timeout(
        Duration::from_secs(5),
        rx.wait_for(|s| s.trail(&id).is_some()),
    )
    .await
    .unwrap()
    .unwrap()
    .clone();

    let progress = snapshot.progress_for(&id).unwrap();
    assert_eq!(progress.total_lessons, 2);
    assert_eq!(progress.lessons_completed, 1);
    assert_eq!(progress.progress_percentage, 50);
    assert_eq!(progress.time_spent_minutes, 10);
    assert!(snapshot.generation_status_for(&id).is_none());
}
