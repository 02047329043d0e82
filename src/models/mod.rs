pub mod loaders;
pub mod record;
pub mod stage_result;
pub mod work_item;

pub use loaders::{find_corpus_file, load_corpus, parse_corpus};
pub use record::{GroupRecord, RecordMeta, Substitution};
pub use stage_result::{
    AnalysisResult, AngleResult, DocumentResult, FallbackReason, Payload, Stage, StageOutput,
    SynthesisResult,
};
pub use work_item::{Corpus, Group, GroupId, ItemMetrics, WorkItem};
