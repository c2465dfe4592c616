pub mod loaders;
pub mod mapping;
pub mod question;
pub mod speed_profile;

pub use loaders::{load_mapping_document, load_profile_catalog};
pub use mapping::{MappingAxis, MappingDocument, MappingFinding, MappingTable};
pub use question::{
    MediaKind, QuestionRecord, QuestionRow, QuestionType, QuizResult, ResolvedQuestion,
};
pub use speed_profile::{ProfileCatalog, SpeedProfile, Timeouts, DEFAULT_PROFILE, PROFILE_LADDER};
