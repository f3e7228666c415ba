//! Autonomous plan-act-observe loop.
//!
//! Each iteration asks the model for the next command, runs it, and records
//! the outcome in both the transcript and the retrieval memory. The loop ends
//! when the model issues `finish`, when the user stops it through the
//! feedback step, or when the optional iteration cap is hit.

use crate::agent::output_parser::{parse_reply, Action};
use crate::agent::prompt::{PromptBuilder, USER_INPUT};
use crate::agent::tools::{HumanInputError, HumanInputTool, Tool, ToolError, ToolRegistry, FINISH_NAME};
use crate::config::Config;
use crate::llm::{ChatMessage, ChatModel, ChatRequest, LlmError};
use crate::memory::{EmbeddingError, MemoryStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Returned when the user stops the run from the feedback step.
pub const EXITING: &str = "EXITING";

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f32,
    /// End-user id forwarded with every completion request.
    pub user: Option<String>,
    pub max_iterations: Option<usize>,
    pub prompt: PromptBuilder,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "qwen2.5-coder:32b".to_string(),
            temperature: 0.0,
            user: None,
            max_iterations: None,
            prompt: PromptBuilder::default(),
        }
    }
}

impl AgentConfig {
    /// Agent settings for the slow model described by `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model.slow_model.clone(),
            temperature: config.model.temperature,
            user: None,
            max_iterations: config.agent.max_iterations,
            prompt: PromptBuilder {
                ai_name: config.agent.ai_name.clone(),
                ai_role: config.agent.ai_role.clone(),
                send_token_limit: config.agent.send_token_limit,
                memory_k: config.memory.retrieve_k,
                memory_token_budget: config.memory.token_budget,
            },
        }
    }
}

/// Failures that end an agent run.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error(transparent)]
    Memory(#[from] EmbeddingError),
}

enum Feedback {
    Continue(Option<String>),
    Stop,
}

/// The repository inspector agent.
pub struct InspectorAgent {
    config: AgentConfig,
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    memory: MemoryStore,
    transcript: Vec<ChatMessage>,
    feedback: bool,
}

impl InspectorAgent {
    pub fn new(
        config: AgentConfig,
        model: Arc<dyn ChatModel>,
        tools: ToolRegistry,
        memory: MemoryStore,
    ) -> Self {
        if tools.is_empty() {
            warn!("Agent has no tools, only finish is available");
        }
        info!(
            "Initializing {} with model {} ({} tools)",
            config.prompt.ai_name,
            config.model,
            tools.len()
        );
        Self {
            config,
            model,
            tools,
            memory,
            transcript: Vec::new(),
            feedback: false,
        }
    }

    /// Enable the human feedback step. The tool is also offered as a command.
    pub fn with_feedback(mut self, human: HumanInputTool) -> Self {
        self.tools.register(Tool::Human(human));
        self.feedback = true;
        self
    }

    pub fn transcript(&self) -> &[ChatMessage] {
        &self.transcript
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Work towards `goals` until the model finishes.
    pub async fn run(&mut self, goals: &[String]) -> Result<String, AgentError> {
        info!("Starting agent run with {} goal(s)", goals.len());

        let mut iteration = 0;
        loop {
            iteration += 1;
            if let Some(max) = self.config.max_iterations {
                if iteration > max {
                    warn!("Agent hit the iteration cap of {}", max);
                    return Ok(format!("Stopped after {} steps without finishing.", max));
                }
            }
            debug!("Agent iteration {}", iteration);

            let messages = self
                .config
                .prompt
                .build(goals, &self.tools, &self.transcript, &self.memory, USER_INPUT)
                .await?;

            let mut request = ChatRequest::new(self.config.model.as_str(), messages)
                .temperature(self.config.temperature);
            if let Some(user) = &self.config.user {
                request = request.user(user.as_str());
            }

            let reply = self.model.complete(request).await?;
            debug!("Assistant reply: {}", reply);

            self.transcript.push(ChatMessage::user(USER_INPUT));
            self.transcript.push(ChatMessage::assistant(reply.as_str()));

            let result = match parse_reply(&reply) {
                Ok(action) if action.name == FINISH_NAME => {
                    info!("Agent finished after {} iteration(s)", iteration);
                    return Ok(finish_response(&action.args));
                }
                Ok(action) => self.dispatch(action).await,
                Err(e) => {
                    warn!("Could not parse assistant reply: {}", e);
                    format!("Error: {}. ", e)
                }
            };

            let mut document = format!("Assistant Reply: {} \nResult: {} ", reply, result);
            if self.feedback {
                match self.collect_feedback(&reply).await {
                    Feedback::Stop => {
                        info!("User stopped the agent");
                        return Ok(EXITING.to_string());
                    }
                    Feedback::Continue(Some(text)) => {
                        document.push('\n');
                        document.push_str(&text);
                    }
                    Feedback::Continue(None) => {}
                }
            }

            self.memory.add_documents(&[document]).await?;
            self.transcript.push(ChatMessage::system(result));
        }
    }

    async fn dispatch(&mut self, action: Action) -> String {
        let Some(tool) = self.tools.get_mut(&action.name) else {
            warn!("Model asked for unknown command {}", action.name);
            return format!(
                "Unknown command '{}'. Please refer to the 'COMMANDS' list for available \
                 commands and only respond in the specified JSON format.",
                action.name
            );
        };

        let observation = match tool.run(&action.args).await {
            Ok(output) => output,
            Err(ToolError::Validation(e)) => {
                format!("Validation Error in args: {}, args: {}", e, render_args(&action.args))
            }
            Err(ToolError::Execution { kind, message }) => {
                format!("Error: {}, {}, args: {}", message, kind, render_args(&action.args))
            }
        };
        info!("Tool {} executed", action.name);

        format!("Command {} returned: {}", action.name, observation)
    }

    async fn collect_feedback(&mut self, reply: &str) -> Feedback {
        let Some(human) = self.tools.human_mut() else {
            return Feedback::Continue(None);
        };

        match human.ask(&format!("```\n{}\n```", reply)).await {
            Ok(text) if is_stop(&text) => Feedback::Stop,
            Ok(text) => Feedback::Continue(Some(text)),
            Err(HumanInputError::TimedOut(secs)) => {
                warn!("No feedback within {}s, continuing", secs);
                Feedback::Continue(None)
            }
            Err(e) => {
                warn!("Feedback channel failed: {}", e);
                Feedback::Stop
            }
        }
    }
}

fn is_stop(feedback: &str) -> bool {
    let feedback = feedback.trim();
    feedback.eq_ignore_ascii_case("q") || feedback.eq_ignore_ascii_case("stop")
}

fn finish_response(args: &Map<String, Value>) -> String {
    match args.get("response") {
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn render_args(args: &Map<String, Value>) -> String {
    Value::Object(args.clone()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{ListRepoTool, ReadFileTool};
    use crate::llm::testing::ScriptedModel;
    use crate::llm::Role;
    use crate::memory::embedder::HashingEmbedder;
    use crate::models::testing::TestConversation;
    use crate::models::{Message, Originator};
    use crate::scanner::{FileScanner, ScanConfig};
    use tempfile::TempDir;

    const LIST: &str = r#"{"thoughts": {"text": "look"}, "command": {"name": "list_repo", "args": {}}}"#;
    const DONE: &str = r#"{"command": {"name": "finish", "args": {"response": "Done"}}}"#;

    struct Fixture {
        _dir: TempDir,
        model: Arc<ScriptedModel>,
        agent: InspectorAgent,
    }

    fn fixture(replies: &[&str], config: AgentConfig) -> Fixture {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("main.py"), "print('hello')\n").unwrap();
        let scanner = FileScanner::new(dir.path().to_path_buf(), ScanConfig::default());

        let mut tools = ToolRegistry::new();
        tools.register(Tool::ListRepo(ListRepoTool::new(scanner.clone())));
        tools.register(Tool::ReadFile(ReadFileTool::new(scanner)));

        let model = Arc::new(ScriptedModel::new(replies.iter().copied()));
        let memory = MemoryStore::new(Arc::new(HashingEmbedder::new(64)));
        let agent = InspectorAgent::new(config, model.clone(), tools, memory);
        Fixture {
            _dir: dir,
            model,
            agent,
        }
    }

    fn goals() -> Vec<String> {
        vec!["Explain main.py".to_string()]
    }

    async fn single_observation(reply: &str) -> (Fixture, String) {
        let mut fx = fixture(&[reply, DONE], AgentConfig::default());
        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, "Done");
        assert_eq!(fx.agent.memory().len(), 1);
        let observation = fx.agent.transcript()[2].clone();
        assert_eq!(observation.role, Role::System);
        (fx, observation.content)
    }

    #[tokio::test]
    async fn test_finish_immediately() {
        let mut fx = fixture(&[DONE], AgentConfig::default());
        let result = fx.agent.run(&goals()).await.unwrap();

        assert_eq!(result, "Done");
        assert_eq!(fx.model.calls(), 1);
        assert!(fx.agent.memory().is_empty());
        let transcript = fx.agent.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0], ChatMessage::user(USER_INPUT));
        assert_eq!(transcript[1], ChatMessage::assistant(DONE));
    }

    #[tokio::test]
    async fn test_tool_success_is_recorded() {
        let (fx, observation) = single_observation(LIST).await;
        assert!(observation.starts_with("Command list_repo returned: Here is the complete list"));
        assert!(observation.ends_with("main.py"));

        let doc = fx.agent.memory().documents().next().unwrap().to_string();
        assert!(doc.starts_with(&format!("Assistant Reply: {} \nResult: Command list_repo", LIST)));

        // The second prompt carries the first exchange as history
        let second = &fx.model.requests()[1];
        assert!(second.messages.iter().any(|m| m.content == observation));
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (_fx, observation) =
            single_observation(r#"{"command": {"name": "write_file", "args": {}}}"#).await;
        assert_eq!(
            observation,
            "Unknown command 'write_file'. Please refer to the 'COMMANDS' list for available \
             commands and only respond in the specified JSON format."
        );
    }

    #[tokio::test]
    async fn test_validation_error() {
        let (_fx, observation) =
            single_observation(r#"{"command": {"name": "read_file", "args": {"path": "main.py"}}}"#)
                .await;
        assert!(observation.starts_with("Command read_file returned: Validation Error in args: "));
        assert!(observation.ends_with(r#"args: {"path":"main.py"}"#));
    }

    #[tokio::test]
    async fn test_execution_error() {
        let (_fx, observation) = single_observation(
            r#"{"command": {"name": "read_file", "args": {"file_path": "missing.py"}}}"#,
        )
        .await;
        assert!(observation.starts_with("Command read_file returned: Error: "));
        assert!(observation.ends_with(r#", NotFound, args: {"file_path":"missing.py"}"#));
    }

    #[tokio::test]
    async fn test_parse_error() {
        let (_fx, observation) = single_observation("let me think about it").await;
        assert_eq!(
            observation,
            "Error: Could not parse invalid json: let me think about it. "
        );
    }

    #[tokio::test]
    async fn test_read_file_output() {
        let (_fx, observation) = single_observation(
            r#"{"command": {"name": "read_file", "args": {"file_path": "main.py"}}}"#,
        )
        .await;
        assert_eq!(observation, "Command read_file returned: print('hello')\n");
    }

    #[tokio::test]
    async fn test_finish_with_non_string_response() {
        let mut fx = fixture(
            &[r#"{"command": {"name": "finish", "args": {"response": ["a", "b"]}}}"#],
            AgentConfig::default(),
        );
        assert_eq!(fx.agent.run(&goals()).await.unwrap(), r#"["a","b"]"#);
    }

    #[tokio::test]
    async fn test_request_carries_model_and_user() {
        let config = AgentConfig {
            model: "slow-model".to_string(),
            user: Some("originator-uuid".to_string()),
            ..AgentConfig::default()
        };
        let mut fx = fixture(&[DONE], config);
        fx.agent.run(&goals()).await.unwrap();

        let request = &fx.model.requests()[0];
        assert_eq!(request.model, "slow-model");
        assert_eq!(request.user.as_deref(), Some("originator-uuid"));
        assert_eq!(request.messages.last().unwrap().content, USER_INPUT);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let mut fx = fixture(&[], AgentConfig::default());
        fx.model.push_failure("boom");
        let err = fx.agent.run(&goals()).await.unwrap_err();
        assert!(matches!(err, AgentError::Llm(LlmError::Api { status: 500, .. })));
        assert!(fx.agent.transcript().is_empty());
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        let config = AgentConfig {
            max_iterations: Some(2),
            ..AgentConfig::default()
        };
        let mut fx = fixture(&[LIST, LIST, DONE], config);
        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, "Stopped after 2 steps without finishing.");
        assert_eq!(fx.model.calls(), 2);
        assert_eq!(fx.agent.memory().len(), 2);
    }

    fn with_feedback(fx: Fixture, conv: &TestConversation) -> Fixture {
        let first = Message::new(Originator::new("frank"), "Explain main.py");
        let human = HumanInputTool::new("RepoInspector", conv.conversation.clone(), first);
        Fixture {
            agent: fx.agent.with_feedback(human),
            ..fx
        }
    }

    #[tokio::test]
    async fn test_stop_feedback_exits_without_recording() {
        let mut conv = TestConversation::new();
        let mut fx = with_feedback(fixture(&[LIST], AgentConfig::default()), &conv);
        let answer = Message::new(Originator::new("frank"), " Stop ");
        conv.inbound_tx.send(answer).unwrap();

        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, EXITING);
        assert!(fx.agent.memory().is_empty());
        assert_eq!(fx.agent.transcript().len(), 2);

        let sent = conv.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, format!("```\n{}\n```", LIST));
    }

    #[tokio::test]
    async fn test_feedback_is_appended_to_memory() {
        let conv = TestConversation::new();
        let mut fx = with_feedback(fixture(&[LIST, DONE], AgentConfig::default()), &conv);
        let answer = Message::new(Originator::new("frank"), "now read main.py");
        conv.inbound_tx.send(answer).unwrap();

        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, "Done");

        let doc = fx.agent.memory().documents().next().unwrap().to_string();
        assert!(doc.ends_with(" \nnow read main.py"));

        // Human is offered as a command once feedback is on
        let prompt = &fx.model.requests()[0].messages[0].content;
        assert!(prompt.contains("3. Human: You can ask a human"));
    }

    #[tokio::test]
    async fn test_human_command_with_feedback_on() {
        let ask = r#"{"command": {"name": "Human", "args": {"query": "Which file?"}}}"#;
        let mut conv = TestConversation::new();
        let mut fx = with_feedback(fixture(&[ask, DONE], AgentConfig::default()), &conv);
        let answer = Message::new(Originator::new("frank"), "main.py");
        let feedback = Message::new(Originator::new("frank"), "go on");
        conv.inbound_tx.send(answer.clone()).unwrap();
        conv.inbound_tx.send(feedback).unwrap();

        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, "Done");
        assert_eq!(fx.agent.transcript()[2].content, "Command Human returned: main.py");

        let doc = fx.agent.memory().documents().next().unwrap().to_string();
        assert!(doc.contains("Result: Command Human returned: main.py "));
        assert!(doc.ends_with("\ngo on"));

        // The query goes out first, the feedback prompt answers the reply to it
        let sent = conv.drain();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].content, "Which file?");
        assert_eq!(sent[1].content, format!("```\n{}\n```", ask));
        assert_eq!(sent[1].in_reply_to, answer.id);
    }

    #[tokio::test]
    async fn test_closed_feedback_channel_exits() {
        let conv = TestConversation::new();
        let mut fx = with_feedback(fixture(&[LIST], AgentConfig::default()), &conv);
        drop(conv.inbound_tx);

        let result = fx.agent.run(&goals()).await.unwrap();
        assert_eq!(result, EXITING);
    }

    #[test]
    fn test_is_stop() {
        assert!(is_stop("q"));
        assert!(is_stop(" STOP\n"));
        assert!(!is_stop("stop reading that file"));
        assert!(!is_stop(""));
    }
}
