pub mod corpus_loader;

pub use corpus_loader::{find_corpus_file, load_corpus, parse_corpus};
