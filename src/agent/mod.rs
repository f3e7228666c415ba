//! The repository inspector agent.
//!
//! An AutoGPT-style loop: the model picks a command in JSON, the command is
//! run against the repository, and the result is fed back on the next turn.

pub mod agent_loop;
pub mod output_parser;
pub mod prompt;
pub mod tools;

pub use agent_loop::{AgentConfig, InspectorAgent};
pub use tools::{HumanInputTool, ListRepoTool, ReadFileTool, Tool, ToolRegistry};
