//! Prompt assembly for the inspector agent.
//!
//! Every model call gets the same layout: the full system prompt, the current
//! time, a block of relevant memories, as much recent history as fits, and the
//! fixed user input asking for the next command.

use crate::agent::tools::{ToolRegistry, FINISH_NAME};
use crate::llm::ChatMessage;
use crate::memory::{EmbeddingError, MemoryStore};
use tracing::debug;

/// The instruction appended to every prompt.
pub const USER_INPUT: &str =
    "Determine which next command to use, and respond using the format specified above:";

/// Tokens kept free for the model's reply.
const RESPONSE_RESERVE: usize = 1000;

/// How many trailing transcript entries feed history and memory lookup.
const HISTORY_WINDOW: usize = 10;

const CONSTRAINTS: &[&str] = &[
    "~4000 word limit for short term memory. Your short term memory is short, \
     so write down important findings in your thoughts.",
    "If you are unsure how you previously did something or want to recall past events, \
     thinking about similar events will help you remember.",
    "No user assistance",
    "Exclusively use the commands listed in double quotes e.g. \"command name\"",
];

const RESOURCES: &[&str] = &[
    "Read-only access to the files of the repository.",
    "Long Term memory management.",
];

const PERFORMANCE_EVALUATION: &[&str] = &[
    "Continuously review and analyze your actions to ensure you are performing \
     to the best of your abilities.",
    "Constructively self-criticize your big-picture behavior constantly.",
    "Reflect on past decisions and strategies to refine your approach.",
    "Every command has a cost, so be smart and efficient. \
     Aim to complete tasks in the least number of steps.",
];

const RESPONSE_FORMAT: &str = r#"{
    "thoughts": {
        "text": "thought",
        "reasoning": "reasoning",
        "plan": "- short bulleted\n- list that conveys\n- long-term plan",
        "criticism": "constructive self-criticism",
        "speak": "thoughts summary to say to user"
    },
    "command": {
        "name": "command name",
        "args": {
            "arg name": "value"
        }
    }
}"#;

/// Rough token count: one token per four characters, rounded up.
pub fn approx_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Builds the message list sent to the model on each iteration.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    pub ai_name: String,
    pub ai_role: String,
    pub send_token_limit: usize,
    pub memory_k: usize,
    pub memory_token_budget: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self {
            ai_name: "RepoInspector".to_string(),
            ai_role: "Source code researcher".to_string(),
            send_token_limit: 4196,
            memory_k: 4,
            memory_token_budget: 2500,
        }
    }
}

impl PromptBuilder {
    /// The system prompt: identity, goals, and the rules of the game.
    pub fn full_prompt(&self, goals: &[String], tools: &ToolRegistry) -> String {
        let mut prompt = format!(
            "You are {}, {}\n\
             Your decisions must always be made independently without seeking user assistance.\n\
             Play to your strengths as an LLM and pursue simple strategies with no legal complications.\n\
             If you have completed all your tasks, make sure to use the \"{}\" command.\n\n\
             GOALS:\n\n",
            self.ai_name, self.ai_role, FINISH_NAME
        );
        for (i, goal) in goals.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", i + 1, goal));
        }

        let commands: Vec<String> = tools
            .iter()
            .map(|tool| {
                format!(
                    "{}: {}, args json schema: {}",
                    tool.name(),
                    tool.description(),
                    tool.args_schema()
                )
            })
            .chain(std::iter::once(format!(
                "{}: use this to signal that you have finished all your objectives, \
                 args: \"response\": \"final response to let people know you have finished your objectives\"",
                FINISH_NAME
            )))
            .collect();

        prompt.push_str(&format!(
            "\n\nConstraints:\n{}\n\nCommands:\n{}\n\nResources:\n{}\n\n\
             Performance Evaluation:\n{}\n\n\
             You should only respond in JSON format as described below \n\
             Response Format: \n{}\n\
             Ensure the response can be parsed as strict JSON",
            numbered(CONSTRAINTS),
            numbered(&commands),
            numbered(RESOURCES),
            numbered(PERFORMANCE_EVALUATION),
            RESPONSE_FORMAT
        ));
        prompt
    }

    /// Assemble the messages for one model call.
    pub async fn build(
        &self,
        goals: &[String],
        tools: &ToolRegistry,
        transcript: &[ChatMessage],
        memory: &MemoryStore,
        user_input: &str,
    ) -> Result<Vec<ChatMessage>, EmbeddingError> {
        let base = ChatMessage::system(self.full_prompt(goals, tools));
        let time = ChatMessage::system(format!(
            "The current time and date is {}",
            chrono::Local::now().format("%c")
        ));
        let mut used_tokens = approx_tokens(&base.content) + approx_tokens(&time.content);

        let recent = &transcript[transcript.len().saturating_sub(HISTORY_WINDOW)..];

        let query = recent
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let mut relevant = memory.relevant_documents(&query, self.memory_k).await?;
        while relevant.iter().map(|d| approx_tokens(d)).sum::<usize>() > self.memory_token_budget {
            relevant.pop();
        }
        let memory_message = ChatMessage::system(format!(
            "This reminds you of these events from your past:\n{}\n\n",
            render_memories(&relevant)
        ));
        used_tokens += approx_tokens(&memory_message.content);

        let history_limit = self.send_token_limit.saturating_sub(RESPONSE_RESERVE);
        let mut history = Vec::new();
        for message in recent.iter().rev() {
            let tokens = approx_tokens(&message.content);
            if used_tokens + tokens > history_limit {
                break;
            }
            history.push(message.clone());
            used_tokens += tokens;
        }
        history.reverse();

        debug!(
            "Prompt uses ~{} tokens: {} memories, {} history entries",
            used_tokens,
            relevant.len(),
            history.len()
        );

        let mut messages = Vec::with_capacity(history.len() + 4);
        messages.push(base);
        messages.push(time);
        messages.push(memory_message);
        messages.extend(history);
        messages.push(ChatMessage::user(user_input));
        Ok(messages)
    }
}

fn numbered<S: AsRef<str>>(items: &[S]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {}", i + 1, item.as_ref()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_memories(docs: &[String]) -> String {
    let quoted: Vec<String> = docs.iter().map(|d| format!("{:?}", d)).collect();
    format!("[{}]", quoted.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tools::{ListRepoTool, ReadFileTool, Tool};
    use crate::llm::Role;
    use crate::memory::embedder::HashingEmbedder;
    use crate::scanner::{FileScanner, ScanConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn registry() -> (TempDir, ToolRegistry) {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("main.py"), "print(1)\n").unwrap();
        let scanner = FileScanner::new(temp_dir.path().to_path_buf(), ScanConfig::default());
        let mut tools = ToolRegistry::new();
        tools.register(Tool::ListRepo(ListRepoTool::new(scanner.clone())));
        tools.register(Tool::ReadFile(ReadFileTool::new(scanner)));
        (temp_dir, tools)
    }

    fn memory() -> MemoryStore {
        MemoryStore::new(Arc::new(HashingEmbedder::new(64)))
    }

    #[test]
    fn test_approx_tokens() {
        assert_eq!(approx_tokens(""), 0);
        assert_eq!(approx_tokens("abcd"), 1);
        assert_eq!(approx_tokens("abcde"), 2);
    }

    #[test]
    fn test_full_prompt_lists_goals_and_commands() {
        let (_dir, tools) = registry();
        let prompt = PromptBuilder::default()
            .full_prompt(&["Explain the entry point".to_string()], &tools);

        assert!(prompt.starts_with("You are RepoInspector, Source code researcher\n"));
        assert!(prompt.contains("GOALS:\n\n1. Explain the entry point\n"));
        assert!(prompt.contains("1. list_repo: List all the files in"));
        assert!(prompt.contains("2. read_file: Read file from disk, args json schema: {"));
        assert!(prompt.contains("3. finish: use this to signal"));
        assert!(prompt.contains("Response Format:"));
    }

    #[tokio::test]
    async fn test_build_layout_with_empty_history() {
        let (_dir, tools) = registry();
        let messages = PromptBuilder::default()
            .build(&["goal".to_string()], &tools, &[], &memory(), USER_INPUT)
            .await
            .unwrap();

        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.starts_with("The current time and date is"));
        assert_eq!(
            messages[2].content,
            "This reminds you of these events from your past:\n[]\n\n"
        );
        assert_eq!(messages[3], ChatMessage::user(USER_INPUT));
    }

    #[tokio::test]
    async fn test_history_respects_token_limit_and_order() {
        let (_dir, tools) = registry();
        let builder = PromptBuilder::default();
        let transcript: Vec<ChatMessage> = (0..8)
            .map(|i| ChatMessage::assistant(format!("{i}{}", "x".repeat(1999))))
            .collect();

        let messages = builder
            .build(&["goal".to_string()], &tools, &transcript, &memory(), USER_INPUT)
            .await
            .unwrap();

        let history: Vec<&ChatMessage> = messages[3..messages.len() - 1].iter().collect();
        assert!(!history.is_empty());
        assert!(history.len() < transcript.len());

        // Newest entries survive, oldest first
        let kept = &transcript[transcript.len() - history.len()..];
        for (got, want) in history.iter().zip(kept) {
            assert_eq!(*got, want);
        }

        let total: usize = messages.iter().take(messages.len() - 1).map(|m| approx_tokens(&m.content)).sum();
        assert!(total <= builder.send_token_limit - RESPONSE_RESERVE);
    }

    #[tokio::test]
    async fn test_history_window_is_last_ten_entries() {
        let (_dir, tools) = registry();
        let transcript: Vec<ChatMessage> =
            (0..15).map(|i| ChatMessage::user(format!("entry {i}"))).collect();

        let messages = PromptBuilder::default()
            .build(&[], &tools, &transcript, &memory(), USER_INPUT)
            .await
            .unwrap();

        let history = &messages[3..messages.len() - 1];
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].content, "entry 5");
        assert_eq!(history[9].content, "entry 14");
    }

    #[tokio::test]
    async fn test_memories_are_rendered_and_budgeted() {
        let (_dir, tools) = registry();
        let mut store = memory();
        store
            .add_documents(&[
                "Assistant Reply: list \nResult: Command list_repo returned: main.py ".to_string(),
                "y".repeat(400),
            ])
            .await
            .unwrap();

        let builder = PromptBuilder {
            memory_token_budget: 50,
            ..PromptBuilder::default()
        };
        let transcript = vec![ChatMessage::system("Command list_repo returned: main.py")];
        let messages = builder
            .build(&[], &tools, &transcript, &store, USER_INPUT)
            .await
            .unwrap();

        let memory_block = &messages[2].content;
        assert!(memory_block.contains("Command list_repo returned: main.py"));
        assert!(!memory_block.contains("yyyy"));
    }
}
