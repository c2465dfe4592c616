pub mod browser_source;
pub mod category_mapper;
pub mod media_downloader;
pub mod question_classifier;
pub mod quiz_source;
pub mod result_sink;

pub use browser_source::ChromeQuizSource;
pub use category_mapper::{CategoryMapper, MappingMode};
pub use media_downloader::MediaDownloader;
pub use question_classifier::{Classification, QuestionClassifier};
pub use quiz_source::{FetchOptions, QuizCategory, QuizLink, QuizSource};
pub use result_sink::{CsvSink, ResultSink};
