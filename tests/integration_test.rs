use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quiz_scrape::error::{AppError, AppResult};
use quiz_scrape::models::{QuestionRecord, QuizResult};
use quiz_scrape::services::{FetchOptions, QuizCategory, QuizLink, QuizSource};
use quiz_scrape::{App, Config, QuestionType};
use tokio_util::sync::CancellationToken;

const PROFILES: &str = r#"
[profiles.turbo]
concurrency = 4
delay_min = 0.0
delay_max = 0.0
requests_per_minute = 6000
timeouts = { page_load_ms = 5000, network_idle_ms = 5000, quiz_page_ms = 5000, quiz_wait_ms = 5000 }

[profiles.aggressive]
concurrency = 3
delay_min = 0.0
delay_max = 0.0
requests_per_minute = 6000
timeouts = { page_load_ms = 5000, network_idle_ms = 5000, quiz_page_ms = 5000, quiz_wait_ms = 5000 }

[profiles.fast]
concurrency = 2
delay_min = 0.0
delay_max = 0.0
requests_per_minute = 6000
timeouts = { page_load_ms = 5000, network_idle_ms = 5000, quiz_page_ms = 5000, quiz_wait_ms = 5000 }

[profiles.normal]
concurrency = 2
delay_min = 0.0
delay_max = 0.0
requests_per_minute = 6000
timeouts = { page_load_ms = 5000, network_idle_ms = 5000, quiz_page_ms = 5000, quiz_wait_ms = 5000 }

[profiles.conservative]
concurrency = 1
delay_min = 0.0
delay_max = 0.0
requests_per_minute = 6000
timeouts = { page_load_ms = 5000, network_idle_ms = 5000, quiz_page_ms = 5000, quiz_wait_ms = 5000 }
"#;

const MAPPINGS: &str = r#"
[difficulty_mapping]
Easy = ["easy"]
Hard = ["difficult", "tough"]

[domain_mapping]
Culture = ["music", "entertainment"]
History = ["history"]

[topic_mapping]
Music = ["pop music", "music"]
History = ["world history"]
"#;

// ========== 测试用的测验来源 ==========

enum FakeQuiz {
    Questions {
        records: Vec<QuestionRecord>,
        results: Vec<QuizResult>,
    },
    Broken,
}

#[derive(Default)]
struct FakeSource {
    categories: Vec<QuizCategory>,
    quizzes: HashMap<String, Vec<QuizLink>>,
    pages: HashMap<String, FakeQuiz>,
    fetch_delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    /// 只统计能正常打开的测验页
    pages_open: AtomicUsize,
    max_pages_open: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeSource {
    fn add_quiz(&mut self, category: &str, slug: &str, quiz: FakeQuiz) -> String {
        let category_url = format!("https://quiz.test/quizzes/{}/", category);
        if !self.categories.iter().any(|c| c.url == category_url) {
            self.categories.push(QuizCategory {
                name: category.to_string(),
                url: category_url.clone(),
            });
        }
        let url = format!("https://quiz.test/quiz/{}", slug);
        self.quizzes.entry(category_url).or_default().push(QuizLink {
            title: slug.to_string(),
            url: url.clone(),
        });
        self.pages.insert(url.clone(), quiz);
        url
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn max_pages_open(&self) -> usize {
        self.max_pages_open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuizSource for FakeSource {
    type Page = String;

    async fn list_categories(&self) -> AppResult<Vec<QuizCategory>> {
        Ok(self.categories.clone())
    }

    async fn list_quizzes(&self, category_url: &str) -> AppResult<Vec<QuizLink>> {
        Ok(self.quizzes.get(category_url).cloned().unwrap_or_default())
    }

    async fn fetch(&self, url: &str, _options: &FetchOptions) -> AppResult<String> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if matches!(self.pages.get(url), Some(FakeQuiz::Broken) | None) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            return Err(AppError::timeout("测验页面", url, Duration::from_millis(1)));
        }
        let open = self.pages_open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_pages_open.fetch_max(open, Ordering::SeqCst);
        tokio::time::sleep(self.fetch_delay).await;
        Ok(url.to_string())
    }

    async fn extract_questions(&self, page: &String) -> AppResult<Vec<QuestionRecord>> {
        match self.pages.get(page) {
            Some(FakeQuiz::Questions { records, .. }) => Ok(records.clone()),
            _ => Err(AppError::Other(format!("没有题目: {}", page))),
        }
    }

    async fn submit_and_extract_results(
        &self,
        page: &String,
        _selections: &[usize],
    ) -> AppResult<Vec<QuizResult>> {
        match self.pages.get(page) {
            Some(FakeQuiz::Questions { results, .. }) => Ok(results.clone()),
            _ => Ok(Vec::new()),
        }
    }

    async fn release(&self, _page: String) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.pages_open.fetch_sub(1, Ordering::SeqCst);
    }
}

// ========== 辅助函数 ==========

fn record(text: &str, options: &[&str], domain: &str, topic: &str, difficulty: &str) -> QuestionRecord {
    QuestionRecord {
        raw_text: text.to_string(),
        options: options.iter().map(|s| s.to_string()).collect(),
        correct_answer: options[0].to_string(),
        hint: String::new(),
        description: format!("Explanation: about {}", text),
        media_ref: None,
        raw_domain: domain.to_string(),
        raw_topic: topic.to_string(),
        raw_difficulty: difficulty.to_string(),
    }
}

fn music_quiz(n: usize) -> FakeQuiz {
    FakeQuiz::Questions {
        records: vec![
            record(
                &format!("{}. Which band recorded album number {}?", 1, n),
                &["The Beatles", "Queen", "ABBA", "Blur"],
                "Music",
                "Pop Music",
                "Easy",
            ),
            record(
                &format!("Is album number {} a live album?", n),
                &["True", "False"],
                "music",
                "pop music",
                "tough",
            ),
        ],
        results: Vec::new(),
    }
}

fn test_config(dir: &Path) -> Config {
    std::fs::write(dir.join("profiles.toml"), PROFILES).unwrap();
    std::fs::write(dir.join("mappings.toml"), MAPPINGS).unwrap();
    Config {
        speed_profile: "fast".to_string(),
        profiles_file: Some(dir.join("profiles.toml")),
        mappings_file: dir.join("mappings.toml"),
        index_file: dir.join("question_indices.json"),
        progress_file: dir.join("scrape_progress.json"),
        output_dir: dir.join("output"),
        images_dir: dir.join("assets/images"),
        audio_dir: dir.join("assets/audio"),
        unmapped_report: Some(dir.join("unmapped_values.json")),
        output_log_file: dir.join("run.txt").to_string_lossy().to_string(),
        error_threshold: 3,
        ..Config::default()
    }
}

async fn run_app(config: Config, source: FakeSource) -> (App<FakeSource>, anyhow::Result<quiz_scrape::RunStats>) {
    let app = App::with_source(config, source).await.unwrap();
    let result = app.run_with_cancel(&CancellationToken::new()).await;
    (app, result)
}

fn keys(rows: &[Vec<String>]) -> BTreeSet<String> {
    rows.iter().map(|r| r[0].clone()).collect()
}

// ========== 测试 ==========

#[tokio::test]
async fn test_full_run_writes_rows_per_type() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    for n in 1..=3 {
        source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
    }
    source.add_quiz(
        "music",
        "instruments",
        FakeQuiz::Questions {
            records: vec![record(
                "Listen to the clip. Which instrument is playing?",
                &["Violin", "Cello", "Flute", "Oboe"],
                "Music",
                "Music",
                "Difficult",
            )],
            results: Vec::new(),
        },
    );

    let (app, result) = run_app(test_config(dir.path()), source).await;
    let stats = result.unwrap();

    assert_eq!(stats.items_total, 4);
    assert_eq!(stats.items_succeeded, 4);
    assert_eq!(stats.items_failed, 0);
    assert_eq!(stats.questions_persisted, 7);
    assert_eq!(stats.per_type[&QuestionType::MultipleChoice], 3);
    assert_eq!(stats.per_type[&QuestionType::TrueFalse], 3);
    assert_eq!(stats.per_type[&QuestionType::Sound], 1);

    let sink = app.sink();
    let mc_rows = sink.read_rows(QuestionType::MultipleChoice).unwrap();
    assert_eq!(
        keys(&mc_rows),
        (1..=3).map(|n| format!("Question_MQ_Parsed_{:04}", n)).collect()
    );
    let row = &mc_rows[0];
    assert_eq!(row[1..4].to_vec(), vec!["Culture", "Music", "Easy"]);
    assert!(row[4].starts_with("Which band recorded"));
    assert_eq!(row[9], "The Beatles");
    assert!(row[11].starts_with("about "));

    let tf_rows = sink.read_rows(QuestionType::TrueFalse).unwrap();
    assert_eq!(tf_rows.len(), 3);
    assert!(tf_rows.iter().all(|r| r[3] == "Hard" && r.len() == 10));

    let sound_rows = sink.read_rows(QuestionType::Sound).unwrap();
    assert_eq!(keys(&sound_rows), ["Question_SOUND_Parsed_0001".to_string()].into());

    let indices = app.index_allocator().get_all_indices();
    assert_eq!(indices["multiple_choice"], 3);
    assert_eq!(indices["true_false"], 3);
    assert_eq!(indices["sound"], 1);
}

#[tokio::test]
async fn test_missing_answers_come_from_results_page() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    let mut incomplete = record(
        "Which city hosted the 1900 World's Fair?",
        &["Paris", "London", "Vienna", "Chicago"],
        "History",
        "World History",
        "Easy",
    );
    incomplete.correct_answer.clear();
    incomplete.description.clear();
    source.add_quiz(
        "history",
        "fairs",
        FakeQuiz::Questions {
            records: vec![incomplete],
            results: vec![QuizResult {
                correct_answer: Some("paris".to_string()),
                hint: Some("Hint: think of the Eiffel Tower".to_string()),
                description: Some("Interesting Information: It drew 50 million visitors.".to_string()),
            }],
        },
    );

    let (app, result) = run_app(test_config(dir.path()), source).await;
    result.unwrap();

    let rows = app.sink().read_rows(QuestionType::MultipleChoice).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], "History");
    assert_eq!(rows[0][9], "Paris");
    assert_eq!(rows[0][10], "think of the Eiffel Tower");
    assert_eq!(rows[0][11], "It drew 50 million visitors.");
}

#[tokio::test]
async fn test_item_failures_do_not_halt_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    source.add_quiz("music", "albums-1", music_quiz(1));
    let broken = source.add_quiz("music", "broken", FakeQuiz::Broken);
    source.add_quiz("music", "albums-2", music_quiz(2));

    let config = test_config(dir.path());
    let progress_file = config.progress_file.clone();
    let (_app, result) = run_app(config, source).await;
    let stats = result.unwrap();

    assert_eq!(stats.items_succeeded, 2);
    assert_eq!(stats.items_failed, 1);
    assert_eq!(stats.downgrades, 0);

    let progress = std::fs::read_to_string(progress_file).unwrap();
    assert!(progress.contains("albums-1"));
    assert!(!progress.contains(&broken));
}

#[tokio::test]
async fn test_strict_unmapped_value_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    source.add_quiz(
        "food",
        "cheese",
        FakeQuiz::Questions {
            records: vec![record(
                "Which country gave us Gouda?",
                &["Netherlands", "France", "Italy", "Spain"],
                "Gastronomy",
                "Music",
                "Easy",
            )],
            results: Vec::new(),
        },
    );

    let mut config = test_config(dir.path());
    config.strict_mapping = true;
    let index_file = config.index_file.clone();
    let (app, result) = run_app(config, source).await;

    let err = result.unwrap_err();
    let app_err = err.downcast_ref::<AppError>().expect("应为 AppError");
    assert!(app_err.is_fatal());
    let msg = app_err.to_string();
    assert!(msg.contains("Gastronomy"));
    assert!(msg.contains("domain_mapping"));

    assert!(app.sink().read_rows(QuestionType::MultipleChoice).unwrap().is_empty());
    assert!(!index_file.exists());
}

#[tokio::test]
async fn test_index_persist_failure_stops_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    for n in 1..=3 {
        source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
    }

    // 索引文件的父路径是普通文件，写盘必然失败
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, "not a directory").unwrap();
    let mut config = test_config(dir.path());
    config.index_file = blocker.join("question_indices.json");
    let progress_file = config.progress_file.clone();
    let (app, result) = run_app(config, source).await;

    let err = result.unwrap_err();
    let app_err = err.downcast_ref::<AppError>().expect("应为 AppError");
    assert!(app_err.is_fatal());
    assert!(app_err.to_string().contains("question_indices.json"));

    assert!(app.sink().read_rows(QuestionType::MultipleChoice).unwrap().is_empty());
    assert!(!progress_file.exists());
}

#[tokio::test]
async fn test_lenient_unmapped_value_kept_and_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    source.add_quiz(
        "food",
        "cheese",
        FakeQuiz::Questions {
            records: vec![record(
                "Which country gave us Gouda?",
                &["Netherlands", "France", "Italy", "Spain"],
                "Gastronomy",
                "Music",
                "Easy",
            )],
            results: Vec::new(),
        },
    );

    let config = test_config(dir.path());
    let report_path = config.unmapped_report.clone().unwrap();
    let (app, result) = run_app(config, source).await;
    result.unwrap();

    let rows = app.sink().read_rows(QuestionType::MultipleChoice).unwrap();
    assert_eq!(rows[0][1], "Gastronomy");

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(report_path).unwrap()).unwrap();
    assert_eq!(report["domain"], serde_json::json!(["Gastronomy"]));
    assert_eq!(report["topic"], serde_json::json!([]));
}

#[tokio::test]
async fn test_resume_skips_done_and_never_duplicates() {
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        let mut source = FakeSource::default();
        for n in 1..=3 {
            source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
        }
        source
    };

    let (_app, first) = run_app(test_config(dir.path()), build()).await;
    assert_eq!(first.unwrap().questions_persisted, 6);

    // 第二次运行：全部已完成
    let (_app, second) = run_app(test_config(dir.path()), build()).await;
    let second = second.unwrap();
    assert_eq!(second.items_total, 0);
    assert_eq!(second.items_skipped_done, 3);

    // 清空进度后重跑：题目已存在，不会再占用编号
    let mut config = test_config(dir.path());
    config.reset_progress = true;
    let (app, third) = run_app(config, build()).await;
    let third = third.unwrap();
    assert_eq!(third.items_succeeded, 3);
    assert_eq!(third.questions_persisted, 0);
    assert_eq!(third.questions_duplicate, 6);

    let mc_rows = app.sink().read_rows(QuestionType::MultipleChoice).unwrap();
    assert_eq!(mc_rows.len(), 3);
    assert_eq!(app.index_allocator().get_all_indices()["multiple_choice"], 3);
}

#[tokio::test]
async fn test_dispatch_respects_profile_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource {
        fetch_delay: Duration::from_millis(40),
        ..Default::default()
    };
    for n in 1..=8 {
        source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
    }
    let source = Arc::new(source);

    let mut config = test_config(dir.path());
    config.speed_profile = "fast".to_string();
    let app = App::with_source(config, SharedSource(Arc::clone(&source)))
        .await
        .unwrap();
    let stats = app.run_with_cancel(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.items_succeeded, 8);
    assert_eq!(source.max_in_flight(), 2);
}

#[tokio::test]
async fn test_consecutive_failures_downgrade_profile() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    for n in 1..=6 {
        source.add_quiz("music", &format!("broken-{}", n), FakeQuiz::Broken);
    }

    let mut config = test_config(dir.path());
    config.speed_profile = "turbo".to_string();
    let (app, result) = run_app(config, source).await;
    let stats = result.unwrap();

    assert_eq!(stats.items_failed, 6);
    assert_eq!(stats.downgrades, 2);
    assert_eq!(stats.final_profile, "fast");
    assert_eq!(app.current_profile().concurrency, 2);
}

#[tokio::test]
async fn test_downgraded_concurrency_bounds_later_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource {
        fetch_delay: Duration::from_millis(60),
        ..Default::default()
    };
    for n in 1..=6 {
        source.add_quiz("music", &format!("broken-{}", n), FakeQuiz::Broken);
    }
    for n in 1..=8 {
        source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
    }
    let source = Arc::new(source);

    // turbo 并发 4，连续失败 3 次降一档：坏页面全部失败后降到 fast（并发 2）
    let mut config = test_config(dir.path());
    config.speed_profile = "turbo".to_string();
    let app = App::with_source(config, SharedSource(Arc::clone(&source)))
        .await
        .unwrap();
    let stats = app.run_with_cancel(&CancellationToken::new()).await.unwrap();

    assert_eq!(stats.items_failed, 6);
    assert_eq!(stats.items_succeeded, 8);
    assert_eq!(stats.downgrades, 2);
    assert_eq!(stats.final_profile, "fast");
    // 正常页面排在坏页面之后派发，同时打开的页面不超过降级后的并发
    assert_eq!(source.max_pages_open(), 2);
}

#[tokio::test]
async fn test_dry_run_previews_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    source.add_quiz("music", "albums-1", music_quiz(1));
    source.add_quiz("music", "albums-2", music_quiz(2));

    let mut config = test_config(dir.path());
    config.dry_run = true;
    let index_file = config.index_file.clone();
    let progress_file = config.progress_file.clone();
    let (app, result) = run_app(config, source).await;
    let stats = result.unwrap();

    assert_eq!(stats.items_succeeded, 2);
    assert_eq!(stats.questions_persisted, 4);
    for question_type in QuestionType::ALL {
        assert!(!app.sink().file_path(question_type).exists());
    }
    assert!(!index_file.exists());
    assert!(!progress_file.exists());
    assert_eq!(app.index_allocator().get_all_indices()["multiple_choice"], 0);
}

#[tokio::test]
async fn test_max_questions_and_category_filter() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    for n in 1..=3 {
        source.add_quiz("music", &format!("albums-{}", n), music_quiz(n));
    }
    source.add_quiz("history", "wars", music_quiz(9));

    let mut config = test_config(dir.path());
    config.speed_profile = "conservative".to_string();
    config.categories = vec!["MUSIC".to_string()];
    config.max_questions = Some(2);
    let (_app, result) = run_app(config, source).await;
    let stats = result.unwrap();

    assert_eq!(stats.items_total, 3);
    assert_eq!(stats.items_succeeded, 1);
    assert_eq!(stats.questions_persisted, 2);
}

#[tokio::test]
async fn test_cancelled_run_dispatches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FakeSource::default();
    source.add_quiz("music", "albums-1", music_quiz(1));
    let source = Arc::new(source);

    let app = App::with_source(test_config(dir.path()), SharedSource(Arc::clone(&source)))
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = app.run_with_cancel(&cancel).await.unwrap();

    assert!(stats.cancelled);
    assert_eq!(stats.items_succeeded, 0);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_overwrite_mode_backs_up_and_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let build = || {
        let mut source = FakeSource::default();
        source.add_quiz("music", "albums-1", music_quiz(1));
        source
    };

    let (_app, first) = run_app(test_config(dir.path()), build()).await;
    first.unwrap();

    let mut config = test_config(dir.path());
    config.output_mode = quiz_scrape::OutputMode::Overwrite;
    let (app, second) = run_app(config, build()).await;
    let second = second.unwrap();

    // 输出和进度都被清空，题目重新写入并占用新编号
    assert_eq!(second.items_succeeded, 1);
    assert_eq!(second.questions_persisted, 2);
    let rows = app.sink().read_rows(QuestionType::MultipleChoice).unwrap();
    assert_eq!(keys(&rows), ["Question_MQ_Parsed_0002".to_string()].into());

    let backups = std::fs::read_dir(dir.path().join("output"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_backup_"))
        .count();
    assert!(backups >= 1);
}

#[tokio::test]
#[ignore] // 需要本机安装 Chrome 并能访问测验站点
async fn test_live_dry_run_single_category() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    std::fs::copy("config/mappings.toml", &config.mappings_file).unwrap();
    config.dry_run = true;
    config.categories = vec!["music".to_string()];
    config.max_questions = Some(10);

    let app = App::initialize(config).await.expect("启动浏览器失败");
    let stats = app.run().await.expect("试运行失败");
    assert!(stats.questions_found > 0);
}

/// 让测试在运行后仍能读取来源上的计数
struct SharedSource(Arc<FakeSource>);

#[async_trait]
impl QuizSource for SharedSource {
    type Page = String;

    async fn list_categories(&self) -> AppResult<Vec<QuizCategory>> {
        self.0.list_categories().await
    }

    async fn list_quizzes(&self, category_url: &str) -> AppResult<Vec<QuizLink>> {
        self.0.list_quizzes(category_url).await
    }

    async fn fetch(&self, url: &str, options: &FetchOptions) -> AppResult<String> {
        self.0.fetch(url, options).await
    }

    async fn extract_questions(&self, page: &String) -> AppResult<Vec<QuestionRecord>> {
        self.0.extract_questions(page).await
    }

    async fn submit_and_extract_results(
        &self,
        page: &String,
        selections: &[usize],
    ) -> AppResult<Vec<QuizResult>> {
        self.0.submit_and_extract_results(page, selections).await
    }

    async fn release(&self, page: String) {
        self.0.release(page).await
    }
}
