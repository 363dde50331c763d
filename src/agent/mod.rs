//! Tool-augmented ReAct reasoning loop.
//!
//! Each step sends the ReAct prompt plus the scratchpad of earlier
//! steps to the [`ReasoningModel`], stopping at `"\nObservation:"`, and
//! parses the reply into a [`Directive`]:
//!
//! ```text
//! Thinking ──Act──▶ tool ──observation──▶ Thinking
//!    │                                        │
//!    └──────────────Finish──▶ answer ◀────────┘
//! ```
//!
//! The loop ends with one of three [`AgentOutcome`]s. Malformed replies are
//! answered with a corrective observation and count against the step budget,
//! so a model that never produces the format still terminates.

pub mod model;
pub mod parse;
pub mod tools;

use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use model::ReasoningModel;
use parse::{parse, Directive};
use tools::{ToolCall, ToolKind, Toolbox};

pub const STOP_SEQUENCE: &str = "\nObservation:";

pub const ITERATION_LIMIT_TEXT: &str =
    "I wasn't able to reach an answer within the allowed number of reasoning steps. \
     Please try rephrasing your question.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    Completed,
    MaxIterationsExceeded,
    ToolFailure,
}

impl AgentOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentOutcome::Completed => "completed",
            AgentOutcome::MaxIterationsExceeded => "max_iterations_exceeded",
            AgentOutcome::ToolFailure => "tool_failure",
        }
    }
}

impl std::fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened in one step after the thought.
#[derive(Debug, Clone)]
pub enum StepAction {
    Tool { call: ToolCall, observation: String },
    InvalidFormat { observation: String },
    Finish { answer: String },
}

#[derive(Debug, Clone)]
pub struct AgentStep {
    pub thought: String,
    pub action: StepAction,
}

#[derive(Debug, Clone)]
pub struct AgentAnswer {
    pub text: String,
    pub outcome: AgentOutcome,
    pub steps: Vec<AgentStep>,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("reasoning model failed: {0}")]
    Model(String),
}

pub struct ReasoningAgent {
    model: Arc<dyn ReasoningModel>,
    max_steps: usize,
}

impl ReasoningAgent {
    pub fn new(model: Arc<dyn ReasoningModel>, max_steps: usize) -> Self {
        Self {
            model,
            max_steps: max_steps.max(1),
        }
    }

    /// Run the loop for `input` until a final answer, a fatal tool error or
    /// the step budget runs out.
    pub async fn answer(&self, input: &str, tools: &Toolbox) -> Result<AgentAnswer, AgentError> {
        let mut scratchpad = String::new();
        let mut steps = Vec::new();

        for step in 1..=self.max_steps {
            let prompt = render_prompt(input, &scratchpad);
            let output = self
                .model
                .complete(&prompt, &[STOP_SEQUENCE])
                .await
                .map_err(|e| AgentError::Model(format!("{:#}", e)))?;
            tracing::debug!(step, model = self.model.name(), "agent step");

            let (thought, observation, action) = match parse(&output) {
                Ok(Directive::Finish { thought, answer }) => {
                    steps.push(AgentStep {
                        thought,
                        action: StepAction::Finish {
                            answer: answer.clone(),
                        },
                    });
                    return Ok(AgentAnswer {
                        text: answer,
                        outcome: AgentOutcome::Completed,
                        steps,
                    });
                }
                Ok(Directive::Act { thought, tool, input }) => {
                    let Some(kind) = ToolKind::from_name(&tool) else {
                        tracing::warn!(tool = %tool, "agent requested unknown tool");
                        return Ok(AgentAnswer {
                            text: format!(
                                "I couldn't complete your request: the reasoning step asked for \
                                 an unavailable tool ({}).",
                                tool
                            ),
                            outcome: AgentOutcome::ToolFailure,
                            steps,
                        });
                    };
                    let call = kind.call(&input);
                    let observation = match tools.execute(&call).await {
                        Ok(obs) => obs,
                        Err(e) => {
                            tracing::warn!(tool = kind.name(), error = %e, "tool failed");
                            format!("Tool {} failed: {:#}", kind.name(), e)
                        }
                    };
                    let action = StepAction::Tool {
                        call,
                        observation: observation.clone(),
                    };
                    (thought, observation, action)
                }
                Err(e) => {
                    tracing::debug!(step, error = %e, "unparseable model output");
                    let observation = e.corrective_observation();
                    let action = StepAction::InvalidFormat {
                        observation: observation.clone(),
                    };
                    (String::new(), observation, action)
                }
            };

            scratchpad.push_str(output.trim_end());
            scratchpad.push_str("\nObservation: ");
            scratchpad.push_str(&observation);
            scratchpad.push_str("\nThought: ");
            steps.push(AgentStep { thought, action });
        }

        tracing::warn!(max_steps = self.max_steps, "agent exhausted its step budget");
        Ok(AgentAnswer {
            text: ITERATION_LIMIT_TEXT.to_string(),
            outcome: AgentOutcome::MaxIterationsExceeded,
            steps,
        })
    }
}

fn render_prompt(input: &str, scratchpad: &str) -> String {
    let tools: Vec<String> = ToolKind::ALL
        .iter()
        .map(|k| format!("{}: {}", k.name(), k.description()))
        .collect();
    let names: Vec<&str> = ToolKind::ALL.iter().map(|k| k.name()).collect();

    format!(
        "Answer the following questions as best you can. You have access to the following tools:\n\
         \n\
         {tools}\n\
         \n\
         Use the following format:\n\
         \n\
         Question: the input question you must answer\n\
         Thought: you should always think about what to do\n\
         Action: the action to take, should be one of [{names}]\n\
         Action Input: the input to the action\n\
         Observation: the result of the action\n\
         ... (this Thought/Action/Action Input/Observation can repeat N times)\n\
         Thought: I now know the final answer\n\
         Final Answer: the final answer to the original input question\n\
         \n\
         Begin!\n\
         \n\
         Question: {input}\n\
         Thought:{scratchpad}",
        tools = tools.join("\n"),
        names = names.join(", "),
        input = input,
        scratchpad = scratchpad,
    )
}
