mod knowledge_base;

pub use knowledge_base::{FileKnowledgeBase, search_corpus, tokenize};
