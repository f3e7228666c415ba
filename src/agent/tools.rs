//! Tools the inspector agent can call.
//!
//! Tools are a closed set. Each variant owns its argument type; the
//! argument map coming from the model is deserialized into it, and a
//! deserialization failure is reported as a validation error rather than an
//! execution error.

use crate::models::{Conversation, ConversationError, Message, OutboundMessage};
use crate::scanner::{FileScanner, ScanError};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// Reserved command name that ends the agent run.
pub const FINISH_NAME: &str = "finish";

/// Name of the human-input tool.
pub const HUMAN_TOOL_NAME: &str = "Human";

/// Why a tool call failed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ToolError {
    /// The arguments did not match the tool's schema.
    #[error("{0}")]
    Validation(String),
    /// The tool ran and failed.
    #[error("{message}")]
    Execution { kind: String, message: String },
}

impl From<ScanError> for ToolError {
    fn from(err: ScanError) -> Self {
        ToolError::Execution {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Lists every file of the repository.
#[derive(Debug, Clone)]
pub struct ListRepoTool {
    scanner: FileScanner,
}

impl ListRepoTool {
    pub fn new(scanner: FileScanner) -> Self {
        Self { scanner }
    }

    fn run(&self) -> Result<String, ToolError> {
        Ok(self.scanner.list_files()?.render())
    }
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    file_path: String,
}

/// Reads one listed file of the repository.
#[derive(Debug, Clone)]
pub struct ReadFileTool {
    scanner: FileScanner,
}

impl ReadFileTool {
    pub fn new(scanner: FileScanner) -> Self {
        Self { scanner }
    }

    fn run(&self, args: ReadFileArgs) -> Result<String, ToolError> {
        let listing = self.scanner.list_files()?;
        let Some(path) = listing.resolve(args.file_path.trim()) else {
            return Err(ToolError::Execution {
                kind: "NotFound".to_string(),
                message: format!("no such file in the repository: {}", args.file_path),
            });
        };
        Ok(self.scanner.read_file(path)?)
    }
}

#[derive(Debug, Deserialize)]
struct HumanArgs {
    query: String,
}

/// Failures while waiting on the human.
#[derive(Debug, thiserror::Error)]
pub enum HumanInputError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error("no reply from the user within {0}s")]
    TimedOut(u64),
}

/// Asks the user a question and waits for the answer.
///
/// The question goes out as a final response to the message the tool was
/// last answering; the next inbound message becomes the answer and the new
/// message to answer.
#[derive(Clone)]
pub struct HumanInputTool {
    bot_handle: String,
    conversation: Conversation,
    current: Message,
    timeout: Option<Duration>,
}

impl HumanInputTool {
    pub fn new(bot_handle: &str, conversation: Conversation, current: Message) -> Self {
        Self {
            bot_handle: bot_handle.to_string(),
            conversation,
            current,
            timeout: None,
        }
    }

    /// Bound the wait for a reply. Without this the wait is unbounded.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send `query` to the user and suspend until they answer.
    pub async fn ask(&mut self, query: &str) -> Result<String, HumanInputError> {
        self.conversation.send(OutboundMessage::final_response(
            &self.bot_handle,
            &self.current,
            query,
        ))?;

        debug!("Waiting for human input");
        let reply = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.conversation.wait_for_incoming())
                .await
                .map_err(|_| HumanInputError::TimedOut(limit.as_secs()))??,
            None => self.conversation.wait_for_incoming().await?,
        };

        let content = reply.content.clone();
        self.current = reply;
        Ok(content)
    }
}

/// Every tool the agent knows about.
#[derive(Clone)]
pub enum Tool {
    ListRepo(ListRepoTool),
    ReadFile(ReadFileTool),
    Human(HumanInputTool),
}

impl Tool {
    pub fn name(&self) -> &str {
        match self {
            Tool::ListRepo(_) => "list_repo",
            Tool::ReadFile(_) => "read_file",
            Tool::Human(_) => HUMAN_TOOL_NAME,
        }
    }

    pub fn description(&self) -> String {
        match self {
            Tool::ListRepo(tool) => format!(
                "List all the files in `{}` repo",
                tool.scanner.repo_name()
            ),
            Tool::ReadFile(_) => "Read file from disk".to_string(),
            Tool::Human(_) => "You can ask a human for guidance when you think you got stuck \
                 or you are not sure what to do next. The input should be a question for the human."
                .to_string(),
        }
    }

    /// JSON schema of the tool's arguments, as advertised to the model.
    pub fn args_schema(&self) -> Value {
        match self {
            Tool::ListRepo(_) => json!({}),
            Tool::ReadFile(_) => json!({
                "file_path": {
                    "title": "File Path",
                    "description": "name of file, relative to the repository root",
                    "type": "string"
                }
            }),
            Tool::Human(_) => json!({
                "query": {"title": "Query", "type": "string"}
            }),
        }
    }

    /// Validate `args` against the tool's schema and run it.
    pub async fn run(&mut self, args: &Map<String, Value>) -> Result<String, ToolError> {
        debug!("Executing tool: {} with args: {:?}", self.name(), args);

        match self {
            Tool::ListRepo(tool) => tool.run(),
            Tool::ReadFile(tool) => tool.run(parse_args(args)?),
            Tool::Human(tool) => {
                let HumanArgs { query } = parse_args(args)?;
                tool.ask(&query).await.map_err(|e| ToolError::Execution {
                    kind: match e {
                        HumanInputError::TimedOut(_) => "TimeoutError".to_string(),
                        HumanInputError::Conversation(_) => "ConversationClosed".to_string(),
                    },
                    message: e.to_string(),
                })
            }
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(args: &Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args.clone()))
        .map_err(|e| ToolError::Validation(e.to_string()))
}

/// Name-keyed dispatch table, keeping registration order for the prompt.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A tool with the same name replaces the old one.
    pub fn register(&mut self, tool: Tool) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&i) => self.tools[i] = tool,
            None => {
                self.index.insert(name.clone(), self.tools.len());
                self.tools.push(tool);
            }
        }
        info!("Registered tool {}", name);
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Tool> {
        let i = *self.index.get(name)?;
        self.tools.get_mut(i)
    }

    /// The registered human-input tool, used for the feedback step.
    pub fn human_mut(&mut self) -> Option<&mut HumanInputTool> {
        match self.get_mut(HUMAN_TOOL_NAME)? {
            Tool::Human(tool) => Some(tool),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::TestConversation;
    use crate::models::Originator;
    use crate::scanner::ScanConfig;
    use tempfile::TempDir;

    fn repo() -> (TempDir, FileScanner) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("a.py"), "print('a')\n").unwrap();
        std::fs::create_dir(temp_dir.path().join("src")).unwrap();
        std::fs::write(temp_dir.path().join("src/b.py"), "print('b')\n").unwrap();
        std::fs::write(temp_dir.path().join(".env"), "TOKEN=1").unwrap();
        let scanner = FileScanner::new(temp_dir.path().to_path_buf(), ScanConfig::default());
        (temp_dir, scanner)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_list_repo() {
        let (_dir, scanner) = repo();
        let mut tool = Tool::ListRepo(ListRepoTool::new(scanner));
        let output = tool.run(&Map::new()).await.unwrap();
        assert!(output.starts_with("Here is the complete list of files"));
        assert!(output.ends_with("a.py\nsrc/b.py"));
    }

    #[tokio::test]
    async fn test_read_file() {
        let (_dir, scanner) = repo();
        let mut tool = Tool::ReadFile(ReadFileTool::new(scanner));
        let output = tool.run(&args(json!({"file_path": "src/b.py"}))).await.unwrap();
        assert_eq!(output, "print('b')\n");
    }

    #[tokio::test]
    async fn test_read_file_missing_argument_is_validation_error() {
        let (_dir, scanner) = repo();
        let mut tool = Tool::ReadFile(ReadFileTool::new(scanner));
        let err = tool.run(&args(json!({"path": "a.py"}))).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));

        let err = tool.run(&args(json!({"file_path": 7}))).await.unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_read_file_rejects_unlisted_paths() {
        let (_dir, scanner) = repo();
        let mut tool = Tool::ReadFile(ReadFileTool::new(scanner));
        for path in ["missing.py", ".env", "../etc/passwd"] {
            let err = tool.run(&args(json!({ "file_path": path }))).await.unwrap_err();
            match err {
                ToolError::Execution { kind, .. } => assert_eq!(kind, "NotFound"),
                other => panic!("unexpected error for {path}: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_read_file_binary_is_execution_error() {
        let (dir, scanner) = repo();
        std::fs::write(dir.path().join("img.bin"), [0xff, 0xfe, 0x00, 0x41]).unwrap();
        let mut tool = Tool::ReadFile(ReadFileTool::new(scanner));

        let err = tool.run(&args(json!({"file_path": "img.bin"}))).await.unwrap_err();
        assert_eq!(
            err,
            ToolError::Execution {
                kind: "UnicodeDecodeError".to_string(),
                message: "file is not valid UTF-8 text: img.bin".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_human_tool_round_trip() {
        let mut conv = TestConversation::new();
        let first = Message::new(Originator::new("dana"), "inspect the repo");
        let mut tool = Tool::Human(HumanInputTool::new(
            "RepoInspector",
            conv.conversation.clone(),
            first.clone(),
        ));

        let answer = Message::new(first.originator.clone(), "look at src/");
        conv.inbound_tx.send(answer).unwrap();

        let reply = tool
            .run(&args(json!({"query": "Where should I look?"})))
            .await
            .unwrap();
        assert_eq!(reply, "look at src/");

        let sent = conv.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].content, "Where should I look?");
        assert_eq!(sent[0].in_reply_to, first.id);
    }

    #[tokio::test]
    async fn test_human_tool_timeout() {
        let conv = TestConversation::new();
        let first = Message::new(Originator::new("erin"), "hi");
        let mut tool = HumanInputTool::new("RepoInspector", conv.conversation.clone(), first)
            .with_timeout(Some(Duration::from_millis(20)));
        let err = tool.ask("anyone?").await.unwrap_err();
        assert!(matches!(err, HumanInputError::TimedOut(_)));
    }

    #[tokio::test]
    async fn test_registry_order_and_lookup() {
        let (_dir, scanner) = repo();
        let mut registry = ToolRegistry::new();
        registry.register(Tool::ListRepo(ListRepoTool::new(scanner.clone())));
        registry.register(Tool::ReadFile(ReadFileTool::new(scanner.clone())));
        registry.register(Tool::ListRepo(ListRepoTool::new(scanner)));

        let names: Vec<_> = registry.iter().map(|t| t.name()).collect();
        assert_eq!(names, vec!["list_repo", "read_file"]);
        assert!(registry.get_mut("read_file").is_some());
        assert!(registry.get_mut("write_file").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_args_schema() {
        let (_dir, scanner) = repo();
        let tool = Tool::ReadFile(ReadFileTool::new(scanner));
        assert_eq!(tool.args_schema()["file_path"]["type"], "string");
    }
}
