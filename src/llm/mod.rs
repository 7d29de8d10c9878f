//! LLM sub-agent provider interface and schema validation.

pub mod client;
pub mod schema;

pub use client::{
    AgentTask, AnthropicClient, ClientConfig, RetryConfig, SubAgentClient, TokenBucket,
    UsageTotals,
};
pub use schema::{extract_json_object, FieldSpec, FieldType, OutputSchema, SchemaViolation};
