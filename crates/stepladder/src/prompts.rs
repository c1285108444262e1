//! Prompt templates for the planner, tiered developers, merger and the
//! single-agent baseline.
//!
//! Every template is paired with a JSON contract generated from the
//! response struct the decoder expects, so the prompt and the parser
//! cannot drift apart.

use coordination::{CodeResponse, PlanResponse, Tier};
use schemars::JsonSchema;

use crate::llm::ChatMessage;

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a senior engineer estimating how hard a programming task is.

Rate the task in story points on this scale:
- 1 (Trivial): obvious implementation, almost no edge cases
- 2 (Small): straightforward, a few edge cases
- 3 (Medium): needs care, a moderate number of edge cases
- 5 (Challenging): a non-trivial approach with several edge cases
- 8 (Hard): a difficult algorithm or design with real uncertainty

Judge along five dimensions:
1. Algorithmic complexity
2. Edge cases and input validation
3. External constraints (time, memory, input size)
4. Coupling between parts of the solution
5. Ambiguity in the statement

Only the values 1, 2, 3, 5 and 8 are allowed. In the rationale explain why
you chose this value and not the next lower one."#;

pub const DEVELOPER_FIRST_PROMPT: &str = r#"Write a complete Python 3 program for the task below.

The program reads all input from standard input and writes the answer to
standard output. Print nothing else: no prompts, no debug output.

## Task

{subtask}"#;

pub const DEVELOPER_RETRY_PROMPT: &str = r#"Your previous program for the task below failed validation. Fix it.

The program reads all input from standard input and writes the answer to
standard output. Print nothing else.

## Task

{subtask}

## Previous program

```python
{prior_code}
```

## Failures so far

{failure_history}"#;

pub const SINGLE_AGENT_SYSTEM_PROMPT: &str =
    "You are an expert Python developer. You solve programming tasks with a single, complete program.";

pub const MERGER_SYSTEM_PROMPT: &str =
    "You are an integrator. You combine several candidate programs into the single most correct one.";

pub const MERGE_PROMPT: &str = r#"Several developers proposed programs for the task below. Produce one
program that keeps what is correct in each and fixes what is wrong. The
result must read standard input and write only the answer to standard
output.

## Task

{subtask}

## Proposals

{proposals}"#;

/// JSON schema for `T`, pretty-printed.
pub fn response_schema<T: JsonSchema>() -> String {
    let schema = schemars::schema_for!(T);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

/// System message pinning the reply to one JSON object of shape `T`.
pub fn json_contract<T: JsonSchema>() -> ChatMessage {
    ChatMessage::system(format!(
        "Return ONLY a valid JSON object, with no prose and no code fences.\nSchema:\n{}",
        response_schema::<T>()
    ))
}

pub fn developer_system_prompt(tier: Tier) -> String {
    format!("You are a {tier} tier developer. You write correct, self-contained Python 3 programs.")
}

pub fn planner_messages(task_id: &str, description: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(PLANNER_SYSTEM_PROMPT),
        json_contract::<PlanResponse>(),
        ChatMessage::user(format!(
            "Task ID: {task_id}\n\nTask Description:\n{description}"
        )),
    ]
}

/// Developer prompt: first attempt when `prior_code` is absent, repair otherwise.
pub fn developer_messages(
    system: String,
    subtask: &str,
    prior_code: Option<&str>,
    failure_history: &[String],
) -> Vec<ChatMessage> {
    let user = match prior_code {
        None => DEVELOPER_FIRST_PROMPT.replace("{subtask}", subtask),
        Some(code) => DEVELOPER_RETRY_PROMPT
            .replace("{subtask}", subtask)
            .replace("{prior_code}", code)
            .replace("{failure_history}", &format_failures(failure_history)),
    };
    vec![
        ChatMessage::system(system),
        json_contract::<CodeResponse>(),
        ChatMessage::user(user),
    ]
}

pub fn merge_messages(subtask: &str, proposals: &[String]) -> Vec<ChatMessage> {
    let listed = proposals
        .iter()
        .enumerate()
        .map(|(i, code)| format!("### Developer {}\n\n```python\n{}\n```", i + 1, code.trim()))
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![
        ChatMessage::system(MERGER_SYSTEM_PROMPT),
        json_contract::<CodeResponse>(),
        ChatMessage::user(
            MERGE_PROMPT
                .replace("{subtask}", subtask)
                .replace("{proposals}", &listed),
        ),
    ]
}

fn format_failures(failure_history: &[String]) -> String {
    if failure_history.is_empty() {
        return "(none recorded)".to_string();
    }
    failure_history
        .iter()
        .map(|line| format!("- {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
