//! Parsing of one model turn in the ReAct text format.
//!
//! ```text
//! Thought: I need the full report
//! Action: getAllChunks
//! Action Input: alice
//! ```
//!
//! or
//!
//! ```text
//! Thought: I now know the final answer
//! Final Answer: Your glucose is slightly elevated...
//! ```

use thiserror::Error;

const FINAL_ANSWER: &str = "Final Answer:";
const ACTION: &str = "Action:";
const ACTION_INPUT: &str = "Action Input:";
const OBSERVATION: &str = "Observation:";

/// What the model asked for in one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Act {
        thought: String,
        tool: String,
        input: String,
    },
    Finish {
        thought: String,
        answer: String,
    },
}

/// The turn could not be understood. Recoverable: the loop re-prompts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("model returned no output")]
    Empty,
    #[error("output contains both a final answer and an action")]
    Ambiguous,
    #[error("missing 'Action:' after 'Thought:'")]
    MissingAction,
    #[error("missing 'Action Input:' after 'Action:'")]
    MissingActionInput,
    #[error("final answer is empty")]
    EmptyAnswer,
}

impl ParseError {
    /// Observation fed back to the model so it can correct itself.
    pub fn corrective_observation(&self) -> String {
        format!(
            "Invalid format: {}. Respond with either 'Action:' and 'Action Input:' lines, \
             or a 'Final Answer:' line.",
            self
        )
    }
}

pub fn parse(output: &str) -> Result<Directive, ParseError> {
    let text = output.trim();
    if text.is_empty() {
        return Err(ParseError::Empty);
    }

    let action_at = find_label(text, ACTION);
    let final_at = text.find(FINAL_ANSWER);

    match (action_at, final_at) {
        (Some(a), Some(f)) => {
            // An action followed by a hallucinated answer is still an action
            // only if an input line sits between them.
            if a < f && find_label(&text[a..f], ACTION_INPUT).is_some() {
                parse_action(text, a, Some(f))
            } else {
                Err(ParseError::Ambiguous)
            }
        }
        (None, Some(f)) => {
            let answer = text[f + FINAL_ANSWER.len()..].trim();
            if answer.is_empty() {
                return Err(ParseError::EmptyAnswer);
            }
            Ok(Directive::Finish {
                thought: thought_of(&text[..f]),
                answer: answer.to_string(),
            })
        }
        (Some(a), None) => parse_action(text, a, None),
        (None, None) => Err(ParseError::MissingAction),
    }
}

fn parse_action(text: &str, action_at: usize, end: Option<usize>) -> Result<Directive, ParseError> {
    let body = &text[action_at + ACTION.len()..end.unwrap_or(text.len())];
    let input_at = find_label(body, ACTION_INPUT).ok_or(ParseError::MissingActionInput)?;

    let tool = clean_tool_name(&body[..input_at]);
    if tool.is_empty() {
        return Err(ParseError::MissingAction);
    }

    let mut input = &body[input_at + ACTION_INPUT.len()..];
    if let Some(obs) = input.find(OBSERVATION) {
        input = &input[..obs];
    }

    Ok(Directive::Act {
        thought: thought_of(&text[..action_at]),
        tool,
        input: clean_input(input),
    })
}

/// Position of `label` at the start of a line.
fn find_label(text: &str, label: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim_start();
        if trimmed.starts_with(label) {
            return Some(offset + (line.len() - trimmed.len()));
        }
        offset += line.len();
    }
    None
}

fn thought_of(prefix: &str) -> String {
    let t = prefix.trim();
    t.strip_prefix("Thought:").unwrap_or(t).trim().to_string()
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '`' || c == '*' || c == '"' || c == '\'')
        .trim()
        .to_string()
}

fn clean_input(raw: &str) -> String {
    let mut s = raw.trim();
    if let Some(inner) = s.strip_prefix("```") {
        s = inner.trim_start_matches(|c: char| c.is_ascii_alphabetic());
        s = s.strip_suffix("```").unwrap_or(s).trim();
    }
    let quoted = s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')));
    if quoted {
        s = &s[1..s.len() - 1];
    }
    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_action() {
        let d = parse("Thought: I should look it up\nAction: search\nAction Input: normal glucose range")
            .unwrap();
        assert_eq!(
            d,
            Directive::Act {
                thought: "I should look it up".into(),
                tool: "search".into(),
                input: "normal glucose range".into(),
            }
        );
    }

    #[test]
    fn parses_final_answer_across_lines() {
        let d = parse("Thought: done\nFinal Answer: Glucose is 110 mg/dL.\nThat is slightly high.")
            .unwrap();
        match d {
            Directive::Finish { thought, answer } => {
                assert_eq!(thought, "done");
                assert_eq!(answer, "Glucose is 110 mg/dL.\nThat is slightly high.");
            }
            other => panic!("expected finish, got {:?}", other),
        }
    }

    #[test]
    fn strips_quotes_fences_and_trailing_observation() {
        let d = parse("Action: `getAllChunks`\nAction Input: \"alice\"\nObservation: made up").unwrap();
        assert_eq!(
            d,
            Directive::Act {
                thought: String::new(),
                tool: "getAllChunks".into(),
                input: "alice".into(),
            }
        );

        let d = parse("Action: search\nAction Input: ```text\nldl cholesterol\n```").unwrap();
        match d {
            Directive::Act { input, .. } => assert_eq!(input, "ldl cholesterol"),
            other => panic!("expected act, got {:?}", other),
        }
    }

    #[test]
    fn action_before_hallucinated_answer_is_an_action() {
        let d = parse("Action: search\nAction Input: hba1c\nFinal Answer: guess").unwrap();
        assert!(matches!(d, Directive::Act { .. }));
    }

    #[test]
    fn malformed_outputs() {
        assert_eq!(parse("   "), Err(ParseError::Empty));
        assert_eq!(parse("I think the answer is 42"), Err(ParseError::MissingAction));
        assert_eq!(parse("Action: search"), Err(ParseError::MissingActionInput));
        assert_eq!(parse("Final Answer:   "), Err(ParseError::EmptyAnswer));
        assert_eq!(
            parse("Final Answer: yes\nAction: search"),
            Err(ParseError::Ambiguous)
        );
    }
}
