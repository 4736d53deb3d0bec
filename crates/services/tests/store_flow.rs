use std::sync::Arc;
use std::time::Duration;

use services::api::{InMemoryTrailApi, Operation, ScriptedStatus, TrailApi, TrailBlueprint};
use services::{Clock, StoreConfig, TrailSnapshot, TrailStore};
use trail_core::model::{
    GenerateTrailRequest, Lesson, LessonId, LessonProgressPatch, LessonType, ModuleId,
    ModuleStatus, Trail, TrailGenerationStatus, TrailId, TrailLanguage, TrailModule, TrailStatus,
};
use trail_core::time::fixed_now;

const POLL: Duration = Duration::from_secs(3);

fn language(code: &str) -> TrailLanguage {
    TrailLanguage {
        language_code: code.into(),
        language_name: code.to_uppercase(),
        language_flag: String::new(),
        level_code: "B1".into(),
        level_name: "Intermediate".into(),
    }
}

/// `modules` modules of `lessons` lessons each; lesson ids run `L1..` per language.
fn modules(code: &str, modules: u32, lessons: u32) -> Vec<TrailModule> {
    (0..modules)
        .map(|m| {
            let lessons = (0..lessons)
                .map(|l| {
                    Lesson::new(
                        LessonId::new(format!("{code}-L{}", m * lessons + l + 1)),
                        format!("Lesson {}", l + 1),
                        LessonType::Vocabulary,
                        10,
                    )
                })
                .collect();
            TrailModule::new(
                ModuleId::new(format!("{code}-M{}", m + 1)),
                format!("Module {}", m + 1),
                "B1.1",
                "Everyday conversation",
                m,
            )
            .with_lessons(lessons)
            .with_status(ModuleStatus::Ready)
        })
        .collect()
}

fn ready_trail(id: &str, code: &str) -> Trail {
    let mut trail = Trail::new(TrailId::new(id), language(code), fixed_now())
        .with_modules(modules(code, 2, 3));
    trail.advance_to(TrailStatus::Ready).unwrap();
    trail
}

fn report(pct: u8, modules_generated: u32) -> ScriptedStatus {
    ScriptedStatus::Report(TrailGenerationStatus {
        progress_percentage: pct,
        current_step: "generating".into(),
        modules_generated,
        total_modules: 4,
        ..TrailGenerationStatus::default()
    })
}

fn setup() -> (InMemoryTrailApi, TrailStore) {
    let api = InMemoryTrailApi::new().with_clock(Clock::fixed(fixed_now()));
    for code in ["en", "es", "fr", "de"] {
        api.add_blueprint(TrailBlueprint::new(language(code), modules(code, 4, 3)))
            .unwrap();
    }
    let config = StoreConfig {
        poll_interval: POLL,
        ..StoreConfig::default()
    };
    let store = TrailStore::with_clock(Arc::new(api.clone()), config, Clock::fixed(fixed_now()));
    (api, store)
}

async fn wait_until(
    store: &TrailStore,
    mut done: impl FnMut(&TrailSnapshot) -> bool,
) -> Arc<TrailSnapshot> {
    let mut rx = store.watch();
    let snapshot = tokio::time::timeout(POLL * 40, rx.wait_for(|s| done(s.as_ref())))
        .await
        .expect("store never reached the expected state")
        .expect("store dropped");
    Arc::clone(&snapshot)
}

#[tokio::test(start_paused = true)]
async fn generation_completes_into_ready_trail() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.script_generation(&id, [report(25, 1), report(100, 4)])
        .unwrap();

    let started = store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    assert_eq!(started, id);
    assert!(store.is_watching(&id));
    assert!(store.snapshot().generation_status_for(&id).is_some());

    let snapshot = wait_until(&store, |s| {
        s.trail(&id).is_some_and(|t| t.status() == TrailStatus::Ready)
    })
    .await;

    let trail = snapshot.trail(&id).unwrap();
    assert_eq!(trail.modules().len(), 4);
    assert!(trail.modules().iter().all(|m| !m.is_pending()));
    assert_eq!(trail.progress().total_lessons, 12);
    assert_eq!(trail.progress().lessons_completed, 0);
    assert_eq!(trail.progress().progress_percentage, 0);

    let summary = snapshot.summary(&id).unwrap();
    assert_eq!(summary.status, TrailStatus::Ready);
    assert_eq!(summary.total_lessons, 12);
    assert!(snapshot.generation_status_for(&id).is_none());
    assert!(snapshot.error().is_none());

    assert!(!store.is_watching(&id));
    assert_eq!(api.status_checks(&id), 2);
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(api.status_checks(&id), 2);
}

#[tokio::test(start_paused = true)]
async fn partial_progress_is_visible_before_completion() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.script_generation(&id, [report(25, 1), report(50, 2), report(75, 3)])
        .unwrap();
    api.script_generation(&id, (0..10).map(|_| report(75, 3)))
        .unwrap();

    store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    let snapshot = wait_until(&store, |s| {
        s.generation_status_for(&id)
            .is_some_and(|g| g.progress_percentage == 75)
    })
    .await;

    assert_eq!(snapshot.generation_status().unwrap().modules_generated, 3);
    assert!(snapshot.trail(&id).is_none());
    assert!(store.is_watching(&id));
    store.dispose();
}

#[tokio::test(start_paused = true)]
async fn fourth_trail_is_rejected_locally() {
    let (api, store) = setup();
    for (id, code) in [("T1", "en"), ("T2", "es"), ("T3", "fr")] {
        api.seed_trail(ready_trail(id, code)).unwrap();
    }
    store.load_active_trails().await.unwrap();
    assert_eq!(store.snapshot().active_count(), 3);

    let err = store
        .generate_trail(GenerateTrailRequest::new("de"))
        .await
        .unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(api.generate_calls(), 0);
    assert_eq!(store.open_subscriptions(), 0);

    let snapshot = store.snapshot();
    assert!(snapshot.error().is_some());
    assert_eq!(snapshot.active_trails().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn regenerating_existing_language_is_not_a_quota_hit() {
    let (api, store) = setup();
    for (id, code) in [("T1", "en"), ("T2", "es"), ("T3", "fr")] {
        api.seed_trail(ready_trail(id, code)).unwrap();
    }
    store.load_active_trails().await.unwrap();
    let id = TrailId::new("T1");
    api.script_generation(&id, [report(10, 0)]).unwrap();

    let started = store
        .generate_trail(GenerateTrailRequest::regenerate("en"))
        .await
        .unwrap();
    assert_eq!(started, id);
    assert_eq!(
        store.snapshot().summary(&id).unwrap().status,
        TrailStatus::Generating
    );

    let snapshot = wait_until(&store, |s| {
        s.summary(&id).is_some_and(|t| t.status == TrailStatus::Ready)
    })
    .await;
    assert_eq!(snapshot.trail(&id).unwrap().modules().len(), 4);
    assert!(!store.is_watching(&id));
}

#[tokio::test(start_paused = true)]
async fn second_generate_supersedes_subscription() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.script_generation(&id, (0..6).map(|i| report(i * 10, 0)))
        .unwrap();

    store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    tokio::time::sleep(POLL).await;
    let again = store
        .generate_trail(GenerateTrailRequest::regenerate("en"))
        .await
        .unwrap();
    assert_eq!(again, id);
    assert_eq!(store.open_subscriptions(), 1);

    wait_until(&store, |s| {
        s.trail(&id).is_some_and(|t| t.status() == TrailStatus::Ready)
    })
    .await;
    assert_eq!(store.open_subscriptions(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_archive_restores_trail() {
    let (api, store) = setup();
    for (id, code) in [("T1", "en"), ("T2", "es")] {
        api.seed_trail(ready_trail(id, code)).unwrap();
    }
    store.load_active_trails().await.unwrap();
    let first = TrailId::new("T1");
    store.load_trail(&first).await.unwrap();
    api.fail_next(Operation::Archive).unwrap();

    let err = store.archive_trail(&first).await.unwrap_err();
    assert!(!err.is_not_found());

    let snapshot = store.snapshot();
    assert_eq!(snapshot.active_trails()[0].id, first);
    assert_eq!(snapshot.active_trails().len(), 2);
    assert!(snapshot.trail(&first).is_some());
    assert!(snapshot.error().is_some());

    store.archive_trail(&first).await.unwrap();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.active_trails().len(), 1);
    assert!(snapshot.trail(&first).is_none());
    assert_eq!(api.trail(&first).unwrap().status(), TrailStatus::Archived);

    // Archiving twice is harmless.
    store.archive_trail(&first).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn archive_cancels_running_generation() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.script_generation(&id, (0..20).map(|_| report(10, 0)))
        .unwrap();
    store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    tokio::time::sleep(POLL).await;

    store.archive_trail(&id).await.unwrap();
    assert!(!store.is_watching(&id));
    assert!(store.snapshot().generation_status_for(&id).is_none());

    let checks = api.status_checks(&id);
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(api.status_checks(&id), checks);
}

#[tokio::test(start_paused = true)]
async fn completing_a_lesson_updates_progress() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.seed_trail(ready_trail("T1", "en")).unwrap();
    for (lesson, score) in [("en-L1", 70), ("en-L2", 90)] {
        api.update_lesson_progress(
            &LessonId::new(lesson),
            &LessonProgressPatch::completed(Some(score), Some(600)),
        )
        .await
        .unwrap();
    }
    store.load_active_trails().await.unwrap();
    store.load_trail(&id).await.unwrap();

    let before = store.snapshot().progress_for(&id).cloned().unwrap();
    assert_eq!(before.lessons_completed, 2);
    assert_eq!(before.average_score, Some(80.0));

    let lesson_id = LessonId::new("en-L5");
    let lesson = store
        .update_lesson_progress(&lesson_id, LessonProgressPatch::completed(Some(85), Some(300)))
        .await
        .unwrap();
    assert!(lesson.is_completed());
    assert_eq!(lesson.score(), Some(85));

    let snapshot = store.snapshot();
    let progress = snapshot.progress_for(&id).unwrap();
    assert_eq!(progress.lessons_completed, before.lessons_completed + 1);
    assert_eq!(progress.total_lessons, 6);
    assert_eq!(progress.progress_percentage, 50);
    let average = progress.average_score.unwrap();
    assert!((average - (70.0 + 90.0 + 85.0) / 3.0).abs() < 1e-9);
    assert_eq!(progress.time_spent_minutes, 25);
    assert_eq!(snapshot.summary(&id).unwrap().lessons_completed, 3);
    assert_eq!(snapshot.overall_progress().lessons_completed, 3);

    let remote = api.trail(&id).unwrap();
    assert!(remote.find_lesson(&lesson_id).unwrap().1.is_completed());
}

#[tokio::test(start_paused = true)]
async fn failing_generation_can_be_regenerated_at_quota() {
    let (api, store) = setup();
    for (id, code) in [("T1", "en"), ("T2", "es")] {
        api.seed_trail(ready_trail(id, code)).unwrap();
    }
    store.load_active_trails().await.unwrap();

    let id = TrailId::new("T3");
    let failed = ScriptedStatus::Report(TrailGenerationStatus {
        progress_percentage: 20,
        current_step: "writing lessons".into(),
        error_message: Some("lesson writer crashed".into()),
        ..TrailGenerationStatus::default()
    });
    api.script_generation(&id, std::iter::repeat_n(failed, 20))
        .unwrap();

    let started = store
        .generate_trail(GenerateTrailRequest::new("fr"))
        .await
        .unwrap();
    assert_eq!(started, id);
    wait_until(&store, |s| {
        s.generation_status_for(&id).is_some_and(TrailGenerationStatus::has_failed)
    })
    .await;
    assert_eq!(store.snapshot().active_count(), 3);
    assert_eq!(store.snapshot().trail_for_language("fr"), Some(&id));

    let retried = store
        .generate_trail(GenerateTrailRequest::regenerate("fr"))
        .await
        .unwrap();
    assert_eq!(retried, id);
    assert_eq!(api.generate_calls(), 2);
    assert_eq!(store.open_subscriptions(), 1);

    let err = store
        .generate_trail(GenerateTrailRequest::new("de"))
        .await
        .unwrap_err();
    assert!(err.is_quota_exceeded());
    assert_eq!(api.generate_calls(), 2);
    store.dispose();
}

#[tokio::test(start_paused = true)]
async fn completion_is_never_reverted() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.seed_trail(ready_trail("T1", "en")).unwrap();
    store.load_trail(&id).await.unwrap();
    let lesson_id = LessonId::new("en-L1");

    store
        .update_lesson_progress(&lesson_id, LessonProgressPatch::completed(Some(60), None))
        .await
        .unwrap();
    let first = store.snapshot().lesson(&lesson_id).unwrap().completed_at();

    let retake = LessonProgressPatch {
        completed: false,
        score: Some(90),
        time_spent_seconds: None,
    };
    let lesson = store
        .update_lesson_progress(&lesson_id, retake)
        .await
        .unwrap();
    assert!(lesson.is_completed());
    assert_eq!(lesson.completed_at(), first);
    assert_eq!(lesson.score(), Some(90));
    assert_eq!(store.snapshot().progress_for(&id).unwrap().lessons_completed, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_progress_update_rolls_back() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.seed_trail(ready_trail("T1", "en")).unwrap();
    store.load_active_trails().await.unwrap();
    store.load_trail(&id).await.unwrap();
    api.fail_next(Operation::UpdateProgress).unwrap();

    let lesson_id = LessonId::new("en-L2");
    store
        .update_lesson_progress(&lesson_id, LessonProgressPatch::completed(Some(70), Some(60)))
        .await
        .unwrap_err();

    let snapshot = store.snapshot();
    assert!(!snapshot.lesson(&lesson_id).unwrap().is_completed());
    assert_eq!(snapshot.progress_for(&id).unwrap().lessons_completed, 0);
    assert_eq!(snapshot.summary(&id).unwrap().lessons_completed, 0);
    assert!(snapshot.error().is_some());
}

#[tokio::test(start_paused = true)]
async fn pending_lessons_cannot_be_completed() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.script_generation(&id, (0..20).map(|_| report(10, 0)))
        .unwrap();
    store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    store.load_trail(&id).await.unwrap();

    let err = store
        .update_lesson_progress(
            &LessonId::new("en-L1"),
            LessonProgressPatch::completed(Some(80), None),
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());
    assert!(store.snapshot().error().is_some());
    store.dispose();
}

#[tokio::test(start_paused = true)]
async fn failed_reload_keeps_stale_list() {
    let (api, store) = setup();
    api.seed_trail(ready_trail("T1", "en")).unwrap();
    store.load_active_trails().await.unwrap();
    api.fail_next(Operation::ListActive).unwrap();

    store.load_active_trails().await.unwrap_err();
    let snapshot = store.snapshot();
    assert_eq!(snapshot.active_trails().len(), 1);
    assert!(snapshot.error().is_some());
    assert!(!snapshot.is_loading());

    store.clear_error();
    assert!(store.snapshot().error().is_none());
}

#[tokio::test(start_paused = true)]
async fn dispose_cancels_every_subscription() {
    let (api, store) = setup();
    for id in ["T1", "T2"] {
        api.script_generation(&TrailId::new(id), (0..20).map(|_| report(10, 0)))
            .unwrap();
    }
    store
        .generate_trail(GenerateTrailRequest::new("en"))
        .await
        .unwrap();
    store
        .generate_trail(GenerateTrailRequest::new("es"))
        .await
        .unwrap();
    assert_eq!(store.open_subscriptions(), 2);
    tokio::time::sleep(POLL).await;

    let before = store.snapshot();
    store.dispose();
    store.dispose();
    assert_eq!(store.open_subscriptions(), 0);

    let checks = api.status_checks(&TrailId::new("T1"));
    tokio::time::sleep(POLL * 5).await;
    assert_eq!(api.status_checks(&TrailId::new("T1")), checks);
    assert!(Arc::ptr_eq(&before, &store.snapshot()));

    let err = store
        .generate_trail(GenerateTrailRequest::new("fr"))
        .await
        .unwrap_err();
    assert!(matches!(err, services::TrailStoreError::Disposed));
    assert_eq!(api.generate_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn module_and_lesson_loads_merge_into_trail() {
    let (api, store) = setup();
    let id = TrailId::new("T1");
    api.seed_trail(ready_trail("T1", "en")).unwrap();
    store.load_trail(&id).await.unwrap();

    api.update_lesson_progress(
        &LessonId::new("en-L4"),
        &LessonProgressPatch::completed(Some(100), Some(120)),
    )
    .await
    .unwrap();

    let module = store
        .load_module(&id, &ModuleId::new("en-M2"))
        .await
        .unwrap();
    assert!(module.lessons()[0].is_completed());
    assert_eq!(store.snapshot().progress_for(&id).unwrap().lessons_completed, 1);

    let lesson = store.load_lesson(&LessonId::new("en-L4")).await.unwrap();
    assert_eq!(lesson.score(), Some(100));

    let err = store.load_trail(&TrailId::new("missing")).await.unwrap_err();
    assert!(err.is_not_found());
}
