pub mod ingest;
pub mod llm;
pub mod profiler;
pub mod validator;
